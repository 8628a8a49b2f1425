use embassy_time::Duration;
use embedded_io::{Read, ReadReady, Write};

use crate::{
    client::{deadline, GprsClient, DEFAULT_TIMEOUT},
    error::Error,
    parse,
    power::ModemPower,
};

/// Network delivery of the submit can take a while.
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Terminates the message body in text mode.
const CTRL_Z: u8 = 0x1a;

impl<S, P, const BUF_SIZE: usize> GprsClient<'_, S, P, BUF_SIZE>
where
    S: Read + ReadReady + Write,
    P: ModemPower,
{
    /// Sends a text-mode SMS: set text mode, address the recipient, feed the
    /// body at the prompt, terminate with Ctrl-Z and await the send report.
    pub fn send_sms(&mut self, number: &str, text: &str) -> Result<(), Error> {
        self.attach()?;

        self.send_command_wait_for_ok("+CMGF=1", DEFAULT_TIMEOUT)?;

        self.send_command(|c| {
            c.push_str("+CMGS=");
            c.push_quoted(number);
        })?;
        self.wait_for_prompt(b"> ", deadline(DEFAULT_TIMEOUT))?;

        self.serial
            .write_all(text.as_bytes())
            .map_err(|_| Error::Write)?;
        self.serial.write_all(&[CTRL_Z]).map_err(|_| Error::Write)?;
        self.serial.flush().map_err(|_| Error::Write)?;

        let ix = self.wait_for_messages(
            &[b"+CMGS:", b"ERROR", b"+CMS ERROR:"],
            deadline(SEND_TIMEOUT),
        )?;
        match ix {
            0 => self.wait_for_ok(DEFAULT_TIMEOUT),
            2 => {
                let rest = &self.line.as_slice()[b"+CMS ERROR:".len()..];
                Err(parse::error_code(rest).map_or(Error::Error, Error::CmsError))
            }
            _ => Err(Error::Error),
        }
    }
}
