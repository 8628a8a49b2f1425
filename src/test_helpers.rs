use std::collections::VecDeque;
use std::vec::Vec;

use embassy_time::Duration;
use embedded_io::{ErrorType, Read, ReadReady, Write};

use crate::{
    client::GprsClient,
    config::{Apn, Config},
    power::NoPower,
};

#[derive(Debug)]
pub struct IoError;

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        embedded_io::ErrorKind::Other
    }
}

/// Scripted serial transport.
///
/// RX bytes either sit in the receive queue up front ([`inject`]) or are
/// released once a given TX frame has gone out ([`expect`]), which is enough
/// to script whole command/response state machines deterministically.
///
/// [`inject`]: MockSerial::inject
/// [`expect`]: MockSerial::expect
pub struct MockSerial {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    script: VecDeque<(Vec<u8>, Vec<u8>)>,
    pub fail_writes: bool,
}

impl MockSerial {
    pub fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            tx: Vec::new(),
            script: VecDeque::new(),
            fail_writes: false,
        }
    }

    /// Makes `bytes` immediately available for reading.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    /// Queues `reply` to become readable once the transmitted bytes end with
    /// `trigger`. Entries fire in order.
    pub fn expect(&mut self, trigger: &[u8], reply: &[u8]) {
        self.script.push_back((trigger.to_vec(), reply.to_vec()));
    }

    /// Drains and returns everything written so far.
    pub fn tx(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx)
    }

    /// True once every scripted exchange has fired.
    pub fn script_done(&self) -> bool {
        self.script.is_empty()
    }

    fn run_script(&mut self) {
        while let Some((trigger, _)) = self.script.front() {
            if self.tx.ends_with(trigger) {
                let (_, reply) = self.script.pop_front().unwrap();
                self.rx.extend(reply);
            } else {
                break;
            }
        }
    }
}

/// Session configuration with instant cooldowns and short poll deadlines, so
/// failing polls bound test runtime.
pub fn test_config() -> Config<'static> {
    Config::new()
        .cmd_cooldown(Duration::from_millis(0))
        .signal_timeout(Duration::from_millis(100))
        .registration_timeout(Duration::from_millis(100))
        .with_apn(Apn::Given {
            name: "internet",
            username: None,
            password: None,
        })
}

pub fn test_client(serial: MockSerial) -> GprsClient<'static, MockSerial, NoPower, 64> {
    GprsClient::new(serial, NoPower, test_config())
}

/// Scripts the full happy-path connect exchange.
pub fn script_connect(serial: &mut MockSerial) {
    serial.expect(b"ATE0\r\n", b"ATE0\r\nOK\r\n");
    serial.expect(b"AT\r\n", b"\r\nOK\r\n");
    serial.expect(b"ATI\r\n", b"\r\nSIM800 R14.18\r\n\r\nOK\r\n");
    serial.expect(b"AT+CSQ\r\n", b"\r\n+CSQ: 14,0\r\n\r\nOK\r\n");
    serial.expect(b"AT+CREG?\r\n", b"\r\n+CREG: 0,5\r\n\r\nOK\r\n");
    serial.expect(b"AT+CGATT=1\r\n", b"\r\nOK\r\n");
    serial.expect(b"AT+CSTT=\"internet\",\"\",\"\"\r\n", b"\r\nOK\r\n");
    serial.expect(b"AT+CIICR\r\n", b"\r\nOK\r\n");
    serial.expect(b"AT+CIFSR\r\n", b"\r\n10.87.33.2\r\n");
}

impl ErrorType for MockSerial {
    type Error = IoError;
}

impl Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut n = 0;
        for slot in buf.iter_mut() {
            match self.rx.pop_front() {
                Some(b) => {
                    *slot = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

impl ReadReady for MockSerial {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.rx.is_empty())
    }
}

impl Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.fail_writes {
            return Err(IoError);
        }
        self.tx.extend_from_slice(buf);
        self.run_script();
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.run_script();
        Ok(())
    }
}
