use embassy_time::Duration;
use embedded_io::{Read, ReadReady, Write};

use crate::{
    client::{deadline, FtpState, GprsClient, TcpState, DEFAULT_TIMEOUT},
    error::Error,
    parse,
    power::ModemPower,
};

/// FTP control exchanges ride on the network; give them room.
const FTP_TIMEOUT: Duration = Duration::from_secs(30);

impl<S, P, const BUF_SIZE: usize> GprsClient<'_, S, P, BUF_SIZE>
where
    S: Read + ReadReady + Write,
    P: ModemPower,
{
    /// Attaches, opens the application bearer and logs in to the FTP server.
    pub fn open_ftp(&mut self, server: &str, username: &str, password: &str) -> Result<(), Error> {
        if self.ftp_state != FtpState::Closed || self.tcp_state != TcpState::Closed {
            return Err(Error::IllegalState);
        }

        self.attach()?;
        self.open_app_bearer()?;

        if let Err(e) = self.ftp_login(server, username, password) {
            self.close_app_bearer();
            return Err(e);
        }

        self.ftp_state = FtpState::Open;
        info!("ftp session open to {}", server);
        Ok(())
    }

    fn ftp_login(&mut self, server: &str, username: &str, password: &str) -> Result<(), Error> {
        self.send_command_wait_for_ok("+FTPCID=1", DEFAULT_TIMEOUT)?;

        self.send_command(|c| {
            c.push_str("+FTPSERV=");
            c.push_quoted(server);
        })?;
        self.wait_for_ok(DEFAULT_TIMEOUT)?;

        self.send_command(|c| {
            c.push_str("+FTPUN=");
            c.push_quoted(username);
        })?;
        self.wait_for_ok(DEFAULT_TIMEOUT)?;

        self.send_command(|c| {
            c.push_str("+FTPPW=");
            c.push_quoted(password);
        })?;
        self.wait_for_ok(DEFAULT_TIMEOUT)
    }

    /// Selects the remote file for upload and starts the put session. The
    /// module reports the largest chunk it will accept per transfer; sends
    /// are sliced accordingly.
    pub fn open_ftp_file(&mut self, filename: &str, path: &str) -> Result<(), Error> {
        if self.ftp_state != FtpState::Open {
            return Err(Error::IllegalState);
        }

        self.send_command(|c| {
            c.push_str("+FTPPUTNAME=");
            c.push_quoted(filename);
        })?;
        self.wait_for_ok(DEFAULT_TIMEOUT)?;

        self.send_command(|c| {
            c.push_str("+FTPPUTPATH=");
            c.push_quoted(path);
        })?;
        self.wait_for_ok(DEFAULT_TIMEOUT)?;

        self.send_command_wait_for_ok("+FTPPUT=1", DEFAULT_TIMEOUT)?;

        // `+FTPPUT: 1,1,<maxlen>` opens the session; `+FTPPUT: 1,<err>`
        // reports a login or path failure
        let off = self.wait_for_reply_value(b"+FTPPUT:", deadline(FTP_TIMEOUT))?;
        match parse::int_triple(&self.line.as_slice()[off..]) {
            Ok((1, 1, maxlen)) if maxlen > 0 => {
                self.ftp_max_length = maxlen as usize;
                self.ftp_state = FtpState::FileOpen;
                Ok(())
            }
            _ => Err(Error::Error),
        }
    }

    /// Uploads a buffer, sliced into chunks the module will accept.
    pub fn send_ftp_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.ftp_state != FtpState::FileOpen {
            return Err(Error::IllegalState);
        }

        let mut rest = data;
        while !rest.is_empty() {
            let granted = self.ftp_request_chunk(rest.len())?;
            let (chunk, tail) = rest.split_at(granted.min(rest.len()));
            self.serial.write_all(chunk).map_err(|_| Error::Write)?;
            self.serial.flush().map_err(|_| Error::Write)?;
            self.wait_for_ok(FTP_TIMEOUT)?;
            rest = tail;
        }
        Ok(())
    }

    /// Uploads `size` bytes pulled one at a time from `read`, for sources
    /// too large or too dynamic to buffer wholesale.
    ///
    /// A zero `size` completes immediately without touching the wire.
    pub fn send_ftp_data_from(
        &mut self,
        mut read: impl FnMut() -> u8,
        size: usize,
    ) -> Result<(), Error> {
        if self.ftp_state != FtpState::FileOpen {
            return Err(Error::IllegalState);
        }

        let mut remaining = size;
        while remaining > 0 {
            let granted = self.ftp_request_chunk(remaining)?;
            let n = granted.min(remaining);
            for _ in 0..n {
                let byte = [read()];
                self.serial.write_all(&byte).map_err(|_| Error::Write)?;
            }
            self.serial.flush().map_err(|_| Error::Write)?;
            self.wait_for_ok(FTP_TIMEOUT)?;
            remaining -= n;
        }
        Ok(())
    }

    /// Announces a chunk of up to `want` bytes and returns how many the
    /// module granted.
    fn ftp_request_chunk(&mut self, want: usize) -> Result<usize, Error> {
        let req = want.min(self.ftp_max_length);
        self.send_command(|c| {
            c.push_str("+FTPPUT=2,");
            c.push_int(req as i32);
        })?;
        let off = self.wait_for_reply_value(b"+FTPPUT:", deadline(FTP_TIMEOUT))?;
        match parse::int_pair(&self.line.as_slice()[off..]) {
            Ok((2, granted)) if granted > 0 => Ok(granted as usize),
            _ => Err(Error::Error),
        }
    }

    /// Finishes the upload with a zero-length put.
    pub fn close_ftp_file(&mut self) -> Result<(), Error> {
        if self.ftp_state != FtpState::FileOpen {
            return Err(Error::IllegalState);
        }
        self.send_command_wait_for_ok("+FTPPUT=2,0", DEFAULT_TIMEOUT)?;
        self.wait_for_message(b"+FTPPUT: 1,0", deadline(FTP_TIMEOUT))?;
        self.ftp_state = FtpState::Open;
        Ok(())
    }

    /// Closes the FTP session and its bearer. The network attach survives.
    pub fn close_ftp(&mut self) -> Result<(), Error> {
        if self.ftp_state == FtpState::Closed {
            return Ok(());
        }
        self.close_app_bearer();
        self.ftp_state = FtpState::Closed;
        Ok(())
    }
}
