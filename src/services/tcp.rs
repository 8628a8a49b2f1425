use embassy_time::{Duration, Instant};
use embedded_io::{Read, ReadReady, Write};

use crate::{
    blocking_timer::BlockingTimer,
    client::{deadline, ConnectionState, FtpState, GprsClient, TcpState, DEFAULT_TIMEOUT},
    error::Error,
    line, module_timing,
    power::ModemPower,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

impl<S, P, const BUF_SIZE: usize> GprsClient<'_, S, P, BUF_SIZE>
where
    S: Read + ReadReady + Write,
    P: ModemPower,
{
    /// Opens the single TCP socket this modem generation provides.
    ///
    /// Runs the network attach and bearer bring-up first when not already
    /// connected; a failed attach means the socket connect is never
    /// attempted. In transparent mode all subsequent bytes stream raw.
    pub fn open_tcp(&mut self, server: &str, port: u16, transparent: bool) -> Result<(), Error> {
        match self.tcp_state {
            TcpState::Open { .. } => return Ok(()),
            TcpState::Closed => {}
            _ => return Err(Error::IllegalState),
        }
        if self.ftp_state != FtpState::Closed {
            return Err(Error::IllegalState);
        }

        let started = Instant::now();
        self.tcp_state = TcpState::Opening;
        let res = self.try_open_tcp(server, port, transparent);
        match res {
            Ok(()) => {
                self.tcp_state = TcpState::Open { transparent };
                self.time_to_open_tcp = Some(started.elapsed());
                info!("tcp open to {}:{}", server, port);
            }
            Err(_) => self.tcp_state = TcpState::Closed,
        }
        res
    }

    fn try_open_tcp(&mut self, server: &str, port: u16, transparent: bool) -> Result<(), Error> {
        if !self.is_connected() {
            self.connect()?;
        }

        self.send_command(|c| {
            c.push_str("+CIPMODE=");
            c.push_int(transparent as i32);
        })?;
        self.wait_for_ok(DEFAULT_TIMEOUT)?;

        self.send_command(|c| {
            c.push_str("+CIPSTART=");
            c.push_quoted("TCP");
            c.push_char(',');
            c.push_quoted(server);
            c.push_char(',');
            c.push_int(port as i32);
        })?;
        // The socket connect acknowledges with OK first, then reports the
        // outcome asynchronously
        self.wait_for_ok(DEFAULT_TIMEOUT)?;
        let ix = self.wait_for_messages(
            &[
                b"CONNECT OK",
                b"CONNECT FAIL",
                b"ALREADY CONNECT",
                b"STATE: ",
                b"CONNECT",
            ],
            deadline(CONNECT_TIMEOUT),
        )?;
        match ix {
            0 | 2 => Ok(()),
            // Transparent mode reports a bare CONNECT when the pipe is up
            4 if transparent => Ok(()),
            _ => Err(Error::Error),
        }
    }

    /// Closes the TCP session, optionally powering the modem off afterwards.
    ///
    /// Teardown is best effort and idempotent: a failed close never prevents
    /// the power-off, and closing an already-closed session returns promptly.
    pub fn close_tcp(&mut self, switch_off: bool) {
        if let TcpState::Open { transparent } = self.tcp_state {
            let started = Instant::now();
            if transparent {
                self.escape_transparent_mode();
            }
            self.tcp_state = TcpState::Closing;
            if self.send_command(|c| c.push_str("+CIPSHUT")).is_ok() {
                let _ = self.wait_for_messages(&[b"SHUT OK", b"ERROR"], deadline(CLOSE_TIMEOUT));
            }
            self.time_to_close_tcp = Some(started.elapsed());
            // CIPSHUT deactivates the CIP bearer with the socket
            if self.state == ConnectionState::DataActive {
                self.state = ConnectionState::NetworkAttached;
            }
        }
        self.tcp_state = TcpState::Closed;

        if switch_off {
            let _ = self.disconnect();
        }
    }

    /// Drops out of transparent data mode back to command mode.
    fn escape_transparent_mode(&mut self) {
        BlockingTimer::after(module_timing::escape_guard_time()).wait();
        let _ = self.serial.write_all(b"+++");
        let _ = self.serial.flush();
        BlockingTimer::after(module_timing::escape_guard_time()).wait();
        let _ = self.wait_for_ok(DEFAULT_TIMEOUT);
    }

    /// Whether the TCP session is up. In command mode this queries the module
    /// for the actual socket state, since the peer may have dropped the link.
    pub fn is_tcp_connected(&mut self) -> bool {
        match self.tcp_state {
            TcpState::Open { transparent: true } => true,
            TcpState::Open { transparent: false } => {
                if self.send_command(|c| c.push_str("+CIPSTATUS")).is_err() {
                    return false;
                }
                if self.wait_for_ok(DEFAULT_TIMEOUT).is_err() {
                    return false;
                }
                matches!(
                    self.wait_for_messages(
                        &[b"STATE: CONNECT OK", b"STATE: "],
                        deadline(DEFAULT_TIMEOUT),
                    ),
                    Ok(0)
                )
            }
            _ => false,
        }
    }

    /// Sends application data over the open session. Command mode wraps the
    /// payload in a length-prefixed `CIPSEND`; transparent mode streams it.
    pub fn send_data_tcp(&mut self, data: &[u8]) -> Result<(), Error> {
        let transparent = match self.tcp_state {
            TcpState::Open { transparent } => transparent,
            _ => return Err(Error::IllegalState),
        };
        if data.is_empty() {
            return Ok(());
        }

        if transparent {
            self.serial.write_all(data).map_err(|_| Error::Write)?;
            return self.serial.flush().map_err(|_| Error::Write);
        }

        self.send_command(|c| {
            c.push_str("+CIPSEND=");
            c.push_int(data.len() as i32);
        })?;
        self.wait_for_prompt(b"> ", deadline(DEFAULT_TIMEOUT))?;
        self.serial.write_all(data).map_err(|_| Error::Write)?;
        self.serial.flush().map_err(|_| Error::Write)?;
        self.wait_for_message(b"SEND OK", deadline(SEND_TIMEOUT))
    }

    /// Fills `data` completely with received bytes, or fails with `Timeout`.
    pub fn receive_data_tcp(&mut self, data: &mut [u8], timeout: Duration) -> Result<(), Error> {
        if !matches!(self.tcp_state, TcpState::Open { .. }) {
            return Err(Error::IllegalState);
        }
        line::read_exact(&mut self.serial, data, deadline(timeout))
    }

    /// Reads one received line through the session's line buffer.
    ///
    /// Some payloads need a far larger buffer than the 64 byte default; the
    /// buffer is sized once via the `BUF_SIZE` parameter and never grows, so
    /// pick the capacity up front.
    pub fn receive_line_tcp(&mut self, timeout: Duration) -> Result<&[u8], Error> {
        if !matches!(self.tcp_state, TcpState::Open { .. }) {
            return Err(Error::IllegalState);
        }
        self.line.read_line(&mut self.serial, deadline(timeout))?;
        Ok(self.line.as_slice())
    }
}
