use embassy_time::{Duration, Instant};
use embedded_io::{Read, ReadReady, Write};

use crate::{
    blocking_timer::BlockingTimer,
    command::CommandBuffer,
    config::{Apn, Config},
    datetime::DateTime,
    error::Error,
    helpers::{LossyStr, SliceExt},
    line::{self, LineBuffer},
    module_timing, parse,
    power::ModemPower,
};

/// Timeout for a single command/response exchange.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);
/// GPRS service attach can take a while on a congested cell.
const ATTACH_TIMEOUT: Duration = Duration::from_secs(30);
/// `AT+CIICR` worst case per the SIM900 AT command manual.
const BEARER_TIMEOUT: Duration = Duration::from_secs(85);
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(500);
const REGISTRATION_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) fn deadline(timeout: Duration) -> Instant {
    Instant::now() + timeout
}

/// Connection state of the session, from power-off to an activated data
/// bearer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    Disconnected,
    NetworkAttached,
    DataActive,
}

/// Module generation as reported by `ATI`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProductId {
    Unknown,
    Sim900,
    Sim800,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum TcpState {
    Closed,
    Opening,
    Open { transparent: bool },
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum FtpState {
    Closed,
    Open,
    FileOpen,
}

/// One modem session over one serial link.
///
/// All operations block the calling thread until they complete or their
/// deadline lapses; the session holds no locks and supports no concurrent
/// invocation. The response line buffer capacity is the `BUF_SIZE` const
/// parameter, fixed for the session's lifetime; size it up front when large
/// TCP lines are expected (see [`receive_line_tcp`]).
///
/// [`receive_line_tcp`]: GprsClient::receive_line_tcp
pub struct GprsClient<'a, S, P, const BUF_SIZE: usize = 64>
where
    S: Read + ReadReady + Write,
    P: ModemPower,
{
    pub(crate) serial: S,
    pub(crate) power: P,
    pub(crate) config: Config<'a>,
    pub(crate) line: LineBuffer<BUF_SIZE>,
    pub(crate) cmd: CommandBuffer,
    pub(crate) state: ConnectionState,
    product_id: ProductId,
    pub(crate) tcp_state: TcpState,
    pub(crate) ftp_state: FtpState,
    /// Largest chunk the module accepts per FTP data transfer, learned when
    /// the remote file is opened.
    pub(crate) ftp_max_length: usize,
    cooldown_timer: Option<BlockingTimer>,
    pub(crate) time_to_open_tcp: Option<Duration>,
    pub(crate) time_to_close_tcp: Option<Duration>,
}

impl<'a, S, P, const BUF_SIZE: usize> GprsClient<'a, S, P, BUF_SIZE>
where
    S: Read + ReadReady + Write,
    P: ModemPower,
{
    pub fn new(serial: S, power: P, config: Config<'a>) -> Self {
        Self {
            serial,
            power,
            config,
            line: LineBuffer::new(),
            cmd: CommandBuffer::new(),
            state: ConnectionState::Disconnected,
            product_id: ProductId::Unknown,
            tcp_state: TcpState::Closed,
            ftp_state: FtpState::Closed,
            ftp_max_length: 0,
            cooldown_timer: None,
            time_to_open_tcp: None,
            time_to_close_tcp: None,
        }
    }

    /// Default baud rate of the module, for configuring the serial link.
    pub const fn default_baudrate() -> u32 {
        9600
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    /// Pure state query; performs no I/O.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::DataActive
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    /// Wall-clock duration of the most recent TCP open, if any.
    pub fn time_to_open_tcp(&self) -> Option<Duration> {
        self.time_to_open_tcp
    }

    /// Wall-clock duration of the most recent TCP close, if any.
    pub fn time_to_close_tcp(&self) -> Option<Duration> {
        self.time_to_close_tcp
    }

    // ------------------------------------------------------------------
    // Command transmission
    // ------------------------------------------------------------------

    /// Assembles and transmits one command frame. Pending input is dropped
    /// first; replies to earlier commands have been consumed by their own
    /// matchers, so anything still buffered is stale unsolicited traffic.
    pub(crate) fn send_command(
        &mut self,
        build: impl FnOnce(&mut CommandBuffer),
    ) -> Result<(), Error> {
        self.wait_cooldown_timer();
        line::flush_input(&mut self.serial);
        self.cmd.begin();
        build(&mut self.cmd);
        let res = self.cmd.send(&mut self.serial);
        self.start_cooldown_timer();
        res
    }

    /// Sends a plain command body and waits for `OK`.
    pub fn send_command_wait_for_ok(&mut self, cmd: &str, timeout: Duration) -> Result<(), Error> {
        self.send_command(|c| c.push_str(cmd))?;
        self.wait_for_ok(timeout)
    }

    fn start_cooldown_timer(&mut self) {
        self.cooldown_timer = Some(BlockingTimer::after(self.config.cmd_cooldown));
    }

    fn wait_cooldown_timer(&mut self) {
        if let Some(cooldown) = self.cooldown_timer.take() {
            cooldown.wait();
        }
    }

    // ------------------------------------------------------------------
    // Response matching
    // ------------------------------------------------------------------

    /// Reads lines until `OK`, an error token, or the timeout. Unsolicited
    /// lines are discarded; they carry no verdict on the pending command.
    pub fn wait_for_ok(&mut self, timeout: Duration) -> Result<(), Error> {
        self.wait_for_ok_deadline(deadline(timeout))
    }

    pub(crate) fn wait_for_ok_deadline(&mut self, deadline: Instant) -> Result<(), Error> {
        loop {
            self.line.read_line(&mut self.serial, deadline)?;
            let line = self.line.as_slice();
            if line == b"OK" {
                return Ok(());
            }
            if line == b"ERROR" {
                return Err(Error::Error);
            }
            if let Some(rest) = line.strip_prefix(b"+CME ERROR:") {
                return Err(parse::error_code(rest).map_or(Error::Error, Error::CmeError));
            }
            if let Some(rest) = line.strip_prefix(b"+CMS ERROR:") {
                return Err(parse::error_code(rest).map_or(Error::Error, Error::CmsError));
            }
            debug!("ignoring {:?}", LossyStr(line));
        }
    }

    /// Waits for one specific reply line (prefix match), ignoring all else.
    pub(crate) fn wait_for_message(&mut self, msg: &[u8], deadline: Instant) -> Result<(), Error> {
        loop {
            self.line.read_line(&mut self.serial, deadline)?;
            if self.line.as_slice().starts_with(msg) {
                return Ok(());
            }
            debug!("ignoring {:?}", LossyStr(self.line.as_slice()));
        }
    }

    /// First-match-wins over an ordered candidate list; returns the index of
    /// the matching candidate so callers can branch on it.
    pub(crate) fn wait_for_messages(
        &mut self,
        msgs: &[&[u8]],
        deadline: Instant,
    ) -> Result<usize, Error> {
        loop {
            self.line.read_line(&mut self.serial, deadline)?;
            let line = self.line.as_slice();
            if let Some(ix) = msgs.iter().position(|msg| line.starts_with(msg)) {
                return Ok(ix);
            }
            debug!("ignoring {:?}", LossyStr(line));
        }
    }

    /// Waits for a short prompt such as `> `. Prompts arrive without a
    /// trailing terminator, so this matches byte-wise rather than line-wise.
    pub(crate) fn wait_for_prompt(&mut self, prompt: &[u8], deadline: Instant) -> Result<(), Error> {
        debug_assert!(!prompt.is_empty());
        let mut matched = 0;
        loop {
            let byte = line::read_byte(&mut self.serial, deadline)?;
            if byte == prompt[matched] {
                matched += 1;
                if matched == prompt.len() {
                    return Ok(());
                }
            } else if byte == prompt[0] {
                matched = 1;
            } else {
                matched = 0;
            }
        }
    }

    /// Reads lines until one starts with `prefix`, leaving it in the line
    /// buffer and returning the offset of the value part. Error tokens abort
    /// the scan; anything else is unsolicited and skipped.
    pub(crate) fn wait_for_reply_value(
        &mut self,
        prefix: &[u8],
        deadline: Instant,
    ) -> Result<usize, Error> {
        loop {
            self.line.read_line(&mut self.serial, deadline)?;
            let line = self.line.as_slice();
            if line.starts_with(prefix) {
                return Ok(prefix.len());
            }
            if line == b"ERROR" {
                return Err(Error::Error);
            }
            if let Some(rest) = line.strip_prefix(b"+CME ERROR:") {
                return Err(parse::error_code(rest).map_or(Error::Error, Error::CmeError));
            }
            debug!("ignoring {:?}", LossyStr(line));
        }
    }

    /// Sends a query command and parses an integer out of the `reply`
    /// prefixed response line.
    pub(crate) fn get_int_value(
        &mut self,
        cmd: &str,
        reply: &str,
        timeout: Duration,
    ) -> Result<i32, Error> {
        let deadline = deadline(timeout);
        self.send_command(|c| c.push_str(cmd))?;
        let off = self.wait_for_reply_value(reply.as_bytes(), deadline)?;
        let value = parse::int(&self.line.as_slice()[off..])?;
        self.wait_for_ok_deadline(deadline)?;
        Ok(value)
    }

    /// Sends a query command and copies the value part of the `reply`
    /// prefixed response line into `out`. The output is never partially
    /// filled: a value larger than `out` fails with `BufferTooSmall`.
    pub(crate) fn get_str_value(
        &mut self,
        cmd: &str,
        reply: &str,
        out: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, Error> {
        let deadline = deadline(timeout);
        self.send_command(|c| c.push_str(cmd))?;
        let off = self.wait_for_reply_value(reply.as_bytes(), deadline)?;
        let value = self.line.as_slice()[off..].trim(&[b' ', b'\t']);
        if value.len() > out.len() {
            return Err(Error::BufferTooSmall);
        }
        let len = value.len();
        out[..len].copy_from_slice(value);
        self.wait_for_ok_deadline(deadline)?;
        Ok(len)
    }

    /// As [`get_str_value`], for replies that carry no prefix at all (`AT+GSN`
    /// answers with a bare digit line).
    ///
    /// [`get_str_value`]: GprsClient::get_str_value
    pub(crate) fn get_str_value_bare(
        &mut self,
        cmd: &str,
        out: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, Error> {
        let deadline = deadline(timeout);
        self.send_command(|c| c.push_str(cmd))?;
        loop {
            self.line.read_line(&mut self.serial, deadline)?;
            let line = self.line.as_slice();
            if line == b"OK" {
                // Reply line never came
                return Err(Error::InvalidResponse);
            }
            if line == b"ERROR" {
                return Err(Error::Error);
            }
            if let Some(rest) = line.strip_prefix(b"+CME ERROR:") {
                return Err(parse::error_code(rest).map_or(Error::Error, Error::CmeError));
            }
            if line.starts_with(b"+") {
                debug!("ignoring {:?}", LossyStr(line));
                continue;
            }
            let value = line.trim(&[b' ', b'\t']);
            if value.len() > out.len() {
                return Err(Error::BufferTooSmall);
            }
            let len = value.len();
            out[..len].copy_from_slice(value);
            self.wait_for_ok_deadline(deadline)?;
            return Ok(len);
        }
    }

    // ------------------------------------------------------------------
    // Session core
    // ------------------------------------------------------------------

    /// Powers the module, attaches to the network and activates the data
    /// bearer. On any failure the session rolls back to `Disconnected`; the
    /// caller decides whether to retry.
    pub fn connect(&mut self) -> Result<(), Error> {
        let res = self.try_connect();
        if res.is_err() {
            self.state = ConnectionState::Disconnected;
        }
        res
    }

    fn try_connect(&mut self) -> Result<(), Error> {
        self.attach()?;
        if self.state < ConnectionState::DataActive {
            self.activate_bearer()?;
            self.state = ConnectionState::DataActive;
            info!("data connection active");
        }
        Ok(())
    }

    /// Network attach half of [`connect`]: power-up, echo-off, signal and
    /// registration waits, GPRS service attach. No data bearer yet.
    ///
    /// [`connect`]: GprsClient::connect
    pub fn attach(&mut self) -> Result<(), Error> {
        if self.state >= ConnectionState::NetworkAttached {
            return Ok(());
        }

        if !self.power.is_on() {
            self.power.turn_on();
            BlockingTimer::after(module_timing::boot_time()).wait();
        }
        line::flush_input(&mut self.serial);

        // One shot each; no reply here means the modem is not responding,
        // which no amount of in-loop retrying fixes.
        self.switch_echo_off()?;
        self.check_alive()?;

        self.detect_product_id();

        self.wait_for_signal_quality()?;
        self.wait_for_registration()?;

        if !self.config.skip_attach {
            self.send_command_wait_for_ok("+CGATT=1", ATTACH_TIMEOUT)?;
        }

        self.state = ConnectionState::NetworkAttached;
        info!("attached to network");
        Ok(())
    }

    /// Tears the session down and powers the module off.
    ///
    /// Teardown is best effort: a failing close command must never leave the
    /// hardware stranded half-open, so power-off always runs.
    pub fn disconnect(&mut self) -> Result<(), Error> {
        if self.state == ConnectionState::DataActive {
            if self.send_command(|c| c.push_str("+CIPSHUT")).is_ok() {
                let _ = self.wait_for_messages(
                    &[b"SHUT OK", b"ERROR"],
                    deadline(DEFAULT_TIMEOUT),
                );
            }
        }
        if self.state >= ConnectionState::NetworkAttached && !self.config.skip_attach {
            let _ = self.send_command_wait_for_ok("+CGATT=0", DEFAULT_TIMEOUT);
        }

        self.power.turn_off();
        self.state = ConnectionState::Disconnected;
        self.tcp_state = TcpState::Closed;
        self.ftp_state = FtpState::Closed;
        info!("disconnected");
        Ok(())
    }

    fn switch_echo_off(&mut self) -> Result<(), Error> {
        self.send_command_wait_for_ok("E0", DEFAULT_TIMEOUT)
    }

    fn check_alive(&mut self) -> Result<(), Error> {
        self.send_command_wait_for_ok("", DEFAULT_TIMEOUT)
    }

    fn detect_product_id(&mut self) {
        let mut buf = [0u8; 32];
        if let Ok(len) = self.get_str_value_bare("I", &mut buf, DEFAULT_TIMEOUT) {
            let id = &buf[..len];
            if contains(id, b"SIM900") {
                self.product_id = ProductId::Sim900;
            } else if contains(id, b"SIM800") {
                self.product_id = ProductId::Sim800;
            }
            debug!("product id {:?}", LossyStr(id));
        }
    }

    /// Polls `AT+CSQ` until the module reports a usable signal level. Any
    /// value in 1..=31 passes; 0 and 99 mean "unknown or not detectable".
    fn wait_for_signal_quality(&mut self) -> Result<(), Error> {
        let deadline = deadline(self.config.signal_timeout);
        loop {
            if let Ok(csq) = self.get_int_value("+CSQ", "+CSQ:", DEFAULT_TIMEOUT) {
                if (1..=31).contains(&csq) {
                    debug!("signal quality {}", csq);
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            BlockingTimer::after(SIGNAL_POLL_INTERVAL).wait();
        }
    }

    /// Polls `AT+CREG?` until registered, home (1) or roaming (5).
    fn wait_for_registration(&mut self) -> Result<(), Error> {
        let deadline = deadline(self.config.registration_timeout);
        loop {
            if let Ok(stat) = self.registration_status() {
                if stat == 1 || stat == 5 {
                    debug!("registered, stat {}", stat);
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(Error::NotRegistered);
            }
            BlockingTimer::after(REGISTRATION_POLL_INTERVAL).wait();
        }
    }

    fn registration_status(&mut self) -> Result<i32, Error> {
        let deadline = deadline(DEFAULT_TIMEOUT);
        self.send_command(|c| c.push_str("+CREG?"))?;
        let off = self.wait_for_reply_value(b"+CREG:", deadline)?;
        let (_, stat) = parse::int_pair(&self.line.as_slice()[off..])?;
        self.wait_for_ok_deadline(deadline)?;
        Ok(stat)
    }

    /// `AT+CSTT`/`AT+CIICR`/`AT+CIFSR` bearer bring-up for the CIP stack.
    fn activate_bearer(&mut self) -> Result<(), Error> {
        let (apn, user, pwd) = match &self.config.apn {
            Apn::Given {
                name,
                username,
                password,
            } => (*name, (*username).unwrap_or(""), (*password).unwrap_or("")),
            Apn::None => ("", "", ""),
        };

        self.send_command(|c| {
            c.push_str("+CSTT=");
            c.push_quoted(apn);
            c.push_char(',');
            c.push_quoted(user);
            c.push_char(',');
            c.push_quoted(pwd);
        })?;
        self.wait_for_ok(DEFAULT_TIMEOUT)?;

        self.send_command_wait_for_ok("+CIICR", BEARER_TIMEOUT)?;

        // CIFSR answers with the bare local address and no OK
        self.send_command(|c| c.push_str("+CIFSR"))?;
        self.line
            .read_line(&mut self.serial, deadline(DEFAULT_TIMEOUT))?;
        if self.line.as_slice() == b"ERROR" {
            return Err(Error::Error);
        }
        debug!("local address {:?}", LossyStr(self.line.as_slice()));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Identity and clock queries
    // ------------------------------------------------------------------

    /// International Mobile Equipment Identity. `buf` must hold at least 16
    /// bytes.
    pub fn get_imei(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.len() < 16 {
            return Err(Error::BufferTooSmall);
        }
        self.get_str_value_bare("+GSN", buf, DEFAULT_TIMEOUT)
    }

    /// Integrated Circuit Card ID of the SIM. `buf` must hold at least 21
    /// bytes.
    pub fn get_ccid(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.len() < 21 {
            return Err(Error::BufferTooSmall);
        }
        self.get_str_value_bare("+CCID", buf, DEFAULT_TIMEOUT)
    }

    /// International Mobile Subscriber Identity. `buf` must hold at least 16
    /// bytes.
    pub fn get_imsi(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.len() < 16 {
            return Err(Error::BufferTooSmall);
        }
        self.get_str_value_bare("+CIMI", buf, DEFAULT_TIMEOUT)
    }

    /// Complete TA capabilities list.
    pub fn get_gcap(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.get_str_value("+GCAP", "+GCAP:", buf, DEFAULT_TIMEOUT)
    }

    /// Current network operator, raw `<mode>,<format>,<oper>` value.
    pub fn get_cops(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.get_str_value("+COPS?", "+COPS:", buf, DEFAULT_TIMEOUT)
    }

    /// Calling line identity presentation setting.
    pub fn get_clip(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.get_str_value("+CLIP?", "+CLIP:", buf, DEFAULT_TIMEOUT)
    }

    /// Calling line identity restriction setting.
    pub fn get_clir(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.get_str_value("+CLIR?", "+CLIR:", buf, DEFAULT_TIMEOUT)
    }

    /// Connected line identity presentation setting.
    pub fn get_colp(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.get_str_value("+COLP?", "+COLP:", buf, DEFAULT_TIMEOUT)
    }

    /// Service provider name from the SIM.
    pub fn get_cspn(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.get_str_value("+CSPN?", "+CSPN:", buf, DEFAULT_TIMEOUT)
    }

    /// SIM card group identifier.
    pub fn get_cgid(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.get_str_value_bare("+CGID", buf, DEFAULT_TIMEOUT)
    }

    /// Raw network clock value, quotes included.
    pub fn get_cclk(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.get_str_value("+CCLK?", "+CCLK:", buf, DEFAULT_TIMEOUT)
    }

    /// Sets the module clock.
    pub fn set_cclk(&mut self, dt: &DateTime) -> Result<(), Error> {
        let mut value: heapless::String<20> = heapless::String::new();
        dt.write_cclk(&mut value);
        self.send_command(|c| {
            c.push_str("+CCLK=");
            c.push_quoted(&value);
        })?;
        self.wait_for_ok(DEFAULT_TIMEOUT)
    }

    /// Network time as seconds since the Unix epoch. Requires local time
    /// stamps to be enabled, see [`enable_lts`].
    ///
    /// [`enable_lts`]: GprsClient::enable_lts
    pub fn get_unix_epoch(&mut self) -> Result<u32, Error> {
        let mut buf = [0u8; 32];
        let len = self.get_cclk(&mut buf)?;
        let value = buf[..len].trim(&[b'"', b' ']);
        Ok(DateTime::parse_cclk(value)?.to_unix_epoch())
    }

    /// Network time as seconds since the Y2K epoch.
    pub fn get_y2k_epoch(&mut self) -> Result<u32, Error> {
        let mut buf = [0u8; 32];
        let len = self.get_cclk(&mut buf)?;
        let value = buf[..len].trim(&[b'"', b' ']);
        Ok(DateTime::parse_cclk(value)?.to_y2k_epoch())
    }

    /// Unsolicited result code presentation setting.
    pub fn get_ciurc(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.get_str_value("+CIURC?", "+CIURC:", buf, DEFAULT_TIMEOUT)
    }

    pub fn set_ciurc(&mut self, value: u8) -> Result<(), Error> {
        self.send_command(|c| {
            c.push_str("+CIURC=");
            c.push_int(value as i32);
        })?;
        self.wait_for_ok(DEFAULT_TIMEOUT)
    }

    pub fn enable_ciurc(&mut self) -> Result<(), Error> {
        self.set_ciurc(1)
    }

    pub fn disable_ciurc(&mut self) -> Result<(), Error> {
        self.set_ciurc(0)
    }

    /// Phone functionality mode.
    pub fn get_cfun(&mut self) -> Result<u8, Error> {
        Ok(self.get_int_value("+CFUN?", "+CFUN:", DEFAULT_TIMEOUT)? as u8)
    }

    pub fn set_cfun(&mut self, value: u8) -> Result<(), Error> {
        self.send_command(|c| {
            c.push_str("+CFUN=");
            c.push_int(value as i32);
        })?;
        self.wait_for_ok(DEFAULT_TIMEOUT)
    }

    /// Enables network time stamps, making `AT+CCLK?` report network time.
    pub fn enable_lts(&mut self) -> Result<(), Error> {
        self.send_command_wait_for_ok("+CLTS=1", DEFAULT_TIMEOUT)
    }

    pub fn disable_lts(&mut self) -> Result<(), Error> {
        self.send_command_wait_for_ok("+CLTS=0", DEFAULT_TIMEOUT)
    }

    /// Received signal strength and bit error rate. The strength comes back
    /// converted to dBm.
    pub fn get_rssi_and_ber(&mut self) -> Result<(i8, u8), Error> {
        let deadline = deadline(DEFAULT_TIMEOUT);
        self.send_command(|c| c.push_str("+CSQ"))?;
        let off = self.wait_for_reply_value(b"+CSQ:", deadline)?;
        let (csq, ber) = parse::int_pair(&self.line.as_slice()[off..])?;
        self.wait_for_ok_deadline(deadline)?;
        Ok((csq_to_rssi(csq as u8), ber as u8))
    }
}

/// Converts a `+CSQ` value to dBm. 99 means "not detectable".
pub fn csq_to_rssi(csq: u8) -> i8 {
    match csq {
        0..=31 => -113 + 2 * csq as i8,
        _ => 0,
    }
}

/// Converts a dBm value to the `+CSQ` scale.
pub fn rssi_to_csq(rssi: i8) -> u8 {
    ((rssi as i16 + 113) / 2).clamp(0, 31) as u8
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{script_connect, test_client, MockSerial};

    #[test]
    fn wait_for_ok_ignores_unsolicited() {
        let mut serial = MockSerial::new();
        serial.inject(b"\r\n+CIEV: rssi,3\r\nRING\r\nOK\r\n");

        let mut client = test_client(serial);
        assert_eq!(client.wait_for_ok(Duration::from_millis(100)), Ok(()));
    }

    #[test]
    fn wait_for_ok_error_token() {
        let mut serial = MockSerial::new();
        serial.inject(b"\r\nERROR\r\n");

        let mut client = test_client(serial);
        assert_eq!(
            client.wait_for_ok(Duration::from_millis(100)),
            Err(Error::Error)
        );
    }

    #[test]
    fn wait_for_ok_cme_error() {
        let mut serial = MockSerial::new();
        serial.inject(b"\r\n+CME ERROR: 107\r\n");

        let mut client = test_client(serial);
        assert_eq!(
            client.wait_for_ok(Duration::from_millis(100)),
            Err(Error::CmeError(107))
        );
    }

    #[test]
    fn wait_for_ok_times_out() {
        let serial = MockSerial::new();
        let mut client = test_client(serial);
        assert_eq!(
            client.wait_for_ok(Duration::from_millis(20)),
            Err(Error::Timeout)
        );
    }

    #[test]
    fn wait_for_messages_returns_index() {
        let mut serial = MockSerial::new();
        serial.inject(b"\r\nsome noise\r\nCONNECT FAIL\r\n");

        let mut client = test_client(serial);
        let ix = client.wait_for_messages(
            &[b"CONNECT OK", b"CONNECT FAIL", b"ALREADY CONNECT"],
            deadline(Duration::from_millis(100)),
        );
        assert_eq!(ix, Ok(1));
    }

    #[test]
    fn wait_for_prompt_without_terminator() {
        let mut serial = MockSerial::new();
        serial.inject(b"\r\n> ");

        let mut client = test_client(serial);
        assert_eq!(
            client.wait_for_prompt(b"> ", deadline(Duration::from_millis(100))),
            Ok(())
        );
    }

    #[test]
    fn get_int_value_skips_unsolicited() {
        let mut serial = MockSerial::new();
        serial.expect(b"AT+CSQ\r\n", b"\r\nRING\r\n+CSQ: 23,0\r\n\r\nOK\r\n");

        let mut client = test_client(serial);
        assert_eq!(
            client.get_int_value("+CSQ", "+CSQ:", Duration::from_millis(100)),
            Ok(23)
        );
        assert_eq!(client.serial.tx(), b"AT+CSQ\r\n");
    }

    #[test]
    fn get_str_value_rejects_small_buffer() {
        let mut serial = MockSerial::new();
        serial.expect(
            b"AT+COPS?\r\n",
            b"\r\n+COPS: 0,0,\"Operator of Considerable Length\"\r\n\r\nOK\r\n",
        );

        let mut client = test_client(serial);
        let mut buf = [0u8; 8];
        assert_eq!(
            client.get_str_value("+COPS?", "+COPS:", &mut buf, Duration::from_millis(100)),
            Err(Error::BufferTooSmall)
        );
        // Nothing semantics-bearing was written
        assert_eq!(buf, [0u8; 8]);
    }

    #[test]
    fn connect_reaches_data_active() {
        let mut serial = MockSerial::new();
        script_connect(&mut serial);

        let mut client = test_client(serial);
        assert_eq!(client.connect(), Ok(()));
        assert!(client.is_connected());
        assert_eq!(client.connection_state(), ConnectionState::DataActive);
        assert_eq!(client.product_id(), ProductId::Sim800);
        assert!(client.serial.script_done());
    }

    #[test]
    fn connect_rolls_back_when_not_registered() {
        let mut serial = MockSerial::new();
        serial.expect(b"ATE0\r\n", b"ATE0\r\nOK\r\n");
        serial.expect(b"AT\r\n", b"\r\nOK\r\n");
        serial.expect(b"ATI\r\n", b"\r\nSIM900 R11.0\r\n\r\nOK\r\n");
        serial.expect(b"AT+CSQ\r\n", b"\r\n+CSQ: 14,0\r\n\r\nOK\r\n");
        // Searching, never registered; the poll loop re-queries until its
        // (shortened) overall deadline
        serial.expect(b"AT+CREG?\r\n", b"\r\n+CREG: 0,2\r\n\r\nOK\r\n");
        serial.expect(b"AT+CREG?\r\n", b"\r\n+CREG: 0,2\r\n\r\nOK\r\n");

        let mut client = test_client(serial);
        assert_eq!(client.connect(), Err(Error::NotRegistered));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        // Bearer commands were never attempted
        let tx = client.serial.tx();
        assert!(!contains(&tx, b"+CSTT"));
    }

    #[test]
    fn echo_off_failure_is_fatal_for_the_attempt() {
        let mut serial = MockSerial::new();
        serial.expect(b"ATE0\r\n", b"\r\nERROR\r\n");

        let mut client = test_client(serial);
        assert_eq!(client.connect(), Err(Error::Error));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn get_imei_enforces_minimum_buffer() {
        let serial = MockSerial::new();
        let mut client = test_client(serial);
        let mut small = [0u8; 8];
        assert_eq!(client.get_imei(&mut small), Err(Error::BufferTooSmall));
    }

    #[test]
    fn get_imei_reads_bare_line() {
        let mut serial = MockSerial::new();
        serial.expect(b"AT+GSN\r\n", b"\r\n490154203237518\r\n\r\nOK\r\n");

        let mut client = test_client(serial);
        let mut buf = [0u8; 16];
        assert_eq!(client.get_imei(&mut buf), Ok(15));
        assert_eq!(&buf[..15], b"490154203237518");
    }

    #[test]
    fn get_unix_epoch_parses_cclk() {
        let mut serial = MockSerial::new();
        serial.expect(
            b"AT+CCLK?\r\n",
            b"\r\n+CCLK: \"23/06/01,12:30:00+08\"\r\n\r\nOK\r\n",
        );

        let mut client = test_client(serial);
        assert_eq!(client.get_unix_epoch(), Ok(1_685_615_400));
    }

    #[test]
    fn csq_conversions() {
        assert_eq!(csq_to_rssi(0), -113);
        assert_eq!(csq_to_rssi(31), -51);
        assert_eq!(csq_to_rssi(99), 0);
        assert_eq!(rssi_to_csq(-113), 0);
        assert_eq!(rssi_to_csq(-51), 31);
    }
}
