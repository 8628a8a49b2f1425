//! Protocol adapters layered on the command engine. Each adapter runs a short
//! state sequence specific to its protocol and leaves the session's attach
//! state alone on failure.

mod ftp;
mod http;
mod mqtt;
mod sms;
mod tcp;

use embassy_time::Duration;
use embedded_io::{Read, ReadReady, Write};

use crate::{
    client::{GprsClient, DEFAULT_TIMEOUT},
    config::Apn,
    error::Error,
    power::ModemPower,
};

const BEARER_TIMEOUT: Duration = Duration::from_secs(30);

impl<S, P, const BUF_SIZE: usize> GprsClient<'_, S, P, BUF_SIZE>
where
    S: Read + ReadReady + Write,
    P: ModemPower,
{
    /// Opens the SAPBR application bearer used by the HTTP and FTP stacks.
    /// The CIP bearer used for raw TCP is separate; see
    /// [`connect`](GprsClient::connect).
    pub(crate) fn open_app_bearer(&mut self) -> Result<(), Error> {
        let (apn, user, pwd) = match &self.config.apn {
            Apn::Given {
                name,
                username,
                password,
            } => (*name, *username, *password),
            Apn::None => ("", None, None),
        };

        self.send_command(|c| {
            c.push_str("+SAPBR=3,1,");
            c.push_quoted("CONTYPE");
            c.push_char(',');
            c.push_quoted("GPRS");
        })?;
        self.wait_for_ok(DEFAULT_TIMEOUT)?;

        self.send_command(|c| {
            c.push_str("+SAPBR=3,1,");
            c.push_quoted("APN");
            c.push_char(',');
            c.push_quoted(apn);
        })?;
        self.wait_for_ok(DEFAULT_TIMEOUT)?;

        if let Some(user) = user {
            self.send_command(|c| {
                c.push_str("+SAPBR=3,1,");
                c.push_quoted("USER");
                c.push_char(',');
                c.push_quoted(user);
            })?;
            self.wait_for_ok(DEFAULT_TIMEOUT)?;
        }
        if let Some(pwd) = pwd {
            self.send_command(|c| {
                c.push_str("+SAPBR=3,1,");
                c.push_quoted("PWD");
                c.push_char(',');
                c.push_quoted(pwd);
            })?;
            self.wait_for_ok(DEFAULT_TIMEOUT)?;
        }

        self.send_command_wait_for_ok("+SAPBR=1,1", BEARER_TIMEOUT)?;
        Ok(())
    }

    /// Best-effort close of the SAPBR bearer.
    pub(crate) fn close_app_bearer(&mut self) {
        let _ = self.send_command_wait_for_ok("+SAPBR=0,1", BEARER_TIMEOUT);
    }
}
