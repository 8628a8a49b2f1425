use embassy_time::Duration;
use embedded_io::{Read, ReadReady, Write};

use crate::{
    client::{deadline, GprsClient, DEFAULT_TIMEOUT},
    error::Error,
    line, parse,
    power::ModemPower,
};

/// `+HTTPACTION` completes asynchronously once the server answers.
const ACTION_TIMEOUT: Duration = Duration::from_secs(30);
/// Maximum time the module waits for the POST body, also passed to
/// `+HTTPDATA` as its latency parameter.
const DATA_TIMEOUT: Duration = Duration::from_secs(10);

const METHOD_GET: u8 = 0;
const METHOD_POST: u8 = 1;

impl<S, P, const BUF_SIZE: usize> GprsClient<'_, S, P, BUF_SIZE>
where
    S: Read + ReadReady + Write,
    P: ModemPower,
{
    /// Performs an HTTP GET and copies the response body into `out`.
    ///
    /// Returns the body length. A body larger than `out` fails with
    /// [`Error::BufferTooSmall`] rather than truncating, and a non-2xx status
    /// fails with [`Error::HttpStatus`] even though the transfer itself
    /// succeeded; transport outcome and HTTP outcome are distinct.
    pub fn do_http_get(&mut self, url: &str, out: &mut [u8]) -> Result<usize, Error> {
        self.http_prolog()?;
        let res = self.do_http_get_middle(url, out);
        self.http_epilog();
        res
    }

    /// HTTP POST without reading the reply body.
    pub fn do_http_post(&mut self, url: &str, body: &[u8]) -> Result<(), Error> {
        self.http_prolog()?;
        let res = self.do_http_post_middle(url, body);
        self.http_epilog();
        res
    }

    /// HTTP POST, copying the reply body into `out`. Same buffer and status
    /// semantics as [`do_http_get`](GprsClient::do_http_get).
    pub fn do_http_post_with_reply(
        &mut self,
        url: &str,
        body: &[u8],
        out: &mut [u8],
    ) -> Result<usize, Error> {
        self.http_prolog()?;
        let res = match self.do_http_post_middle(url, body) {
            Ok(()) => self.http_read(out),
            Err(e) => Err(e),
        };
        self.http_epilog();
        res
    }

    fn do_http_get_middle(&mut self, url: &str, out: &mut [u8]) -> Result<usize, Error> {
        self.http_set_url(url)?;
        self.http_action(METHOD_GET)?;
        self.http_read(out)
    }

    fn do_http_post_middle(&mut self, url: &str, body: &[u8]) -> Result<(), Error> {
        self.http_set_url(url)?;

        let content_type = self.config.content_type;
        if let Some(content_type) = content_type {
            self.send_command(|c| {
                c.push_str("+HTTPPARA=");
                c.push_quoted("CONTENT");
                c.push_char(',');
                c.push_quoted(content_type);
            })?;
            self.wait_for_ok(DEFAULT_TIMEOUT)?;
        }

        self.send_command(|c| {
            c.push_str("+HTTPDATA=");
            c.push_int(body.len() as i32);
            c.push_char(',');
            c.push_int(DATA_TIMEOUT.as_millis() as i32);
        })?;
        self.wait_for_message(b"DOWNLOAD", deadline(DEFAULT_TIMEOUT))?;
        self.serial.write_all(body).map_err(|_| Error::Write)?;
        self.serial.flush().map_err(|_| Error::Write)?;
        self.wait_for_ok(DATA_TIMEOUT)?;

        self.http_action(METHOD_POST)
    }

    fn http_set_url(&mut self, url: &str) -> Result<(), Error> {
        self.send_command(|c| {
            c.push_str("+HTTPPARA=");
            c.push_quoted("URL");
            c.push_char(',');
            c.push_quoted(url);
        })?;
        self.wait_for_ok(DEFAULT_TIMEOUT)?;

        // Caller-supplied headers go in verbatim
        let headers = self.config.http_headers;
        if let Some(headers) = headers {
            self.send_command(|c| {
                c.push_str("+HTTPPARA=");
                c.push_quoted("USERDATA");
                c.push_char(',');
                c.push_quoted(headers);
            })?;
            self.wait_for_ok(DEFAULT_TIMEOUT)?;
        }
        Ok(())
    }

    /// Fires the HTTP action and awaits its `+HTTPACTION: <method>,<status>,
    /// <len>` completion report.
    fn http_action(&mut self, method: u8) -> Result<(), Error> {
        self.send_command(|c| {
            c.push_str("+HTTPACTION=");
            c.push_int(method as i32);
        })?;
        self.wait_for_ok(DEFAULT_TIMEOUT)?;

        let off = self.wait_for_reply_value(b"+HTTPACTION:", deadline(ACTION_TIMEOUT))?;
        let (_method, status, _len) = parse::int_triple(&self.line.as_slice()[off..])?;
        if !(200..300).contains(&status) {
            warn!("http status {}", status);
            return Err(Error::HttpStatus(status as u16));
        }
        Ok(())
    }

    /// Streams the response body into `out` via `+HTTPREAD`.
    fn http_read(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        let deadline = deadline(DEFAULT_TIMEOUT);
        self.send_command(|c| c.push_str("+HTTPREAD"))?;
        let off = self.wait_for_reply_value(b"+HTTPREAD:", deadline)?;
        let len = parse::int(&self.line.as_slice()[off..])? as usize;

        if len == 0 {
            self.wait_for_ok_deadline(deadline)?;
            return Ok(0);
        }
        if len > out.len() {
            return Err(Error::BufferTooSmall);
        }
        line::read_exact(&mut self.serial, &mut out[..len], deadline)?;
        self.wait_for_ok_deadline(deadline)?;
        Ok(len)
    }

    /// Session bring-up: attach, application bearer, HTTP service init.
    fn http_prolog(&mut self) -> Result<(), Error> {
        self.attach()?;
        self.open_app_bearer()?;

        if let Err(e) = self.try_http_init() {
            self.close_app_bearer();
            return Err(e);
        }
        Ok(())
    }

    fn try_http_init(&mut self) -> Result<(), Error> {
        self.send_command_wait_for_ok("+HTTPINIT", DEFAULT_TIMEOUT)?;
        self.send_command(|c| {
            c.push_str("+HTTPPARA=");
            c.push_quoted("CID");
            c.push_char(',');
            c.push_int(1);
        })?;
        self.wait_for_ok(DEFAULT_TIMEOUT)
    }

    /// Best-effort teardown; leftover response bytes are dropped so a failed
    /// read cannot wedge the next request.
    fn http_epilog(&mut self) {
        let _ = self.send_command_wait_for_ok("+HTTPTERM", DEFAULT_TIMEOUT);
        self.close_app_bearer();
        line::flush_input(&mut self.serial);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ConnectionState;
    use crate::test_helpers::{test_client, MockSerial};

    /// HTTP only needs the attach half of connect, not the CIP bearer.
    fn script_attach(serial: &mut MockSerial) {
        serial.expect(b"ATE0\r\n", b"ATE0\r\nOK\r\n");
        serial.expect(b"AT\r\n", b"\r\nOK\r\n");
        serial.expect(b"ATI\r\n", b"\r\nSIM800 R14.18\r\n\r\nOK\r\n");
        serial.expect(b"AT+CSQ\r\n", b"\r\n+CSQ: 14,0\r\n\r\nOK\r\n");
        serial.expect(b"AT+CREG?\r\n", b"\r\n+CREG: 0,1\r\n\r\nOK\r\n");
        serial.expect(b"AT+CGATT=1\r\n", b"\r\nOK\r\n");
    }

    fn script_http_prolog(serial: &mut MockSerial) {
        script_attach(serial);
        serial.expect(b"AT+SAPBR=3,1,\"CONTYPE\",\"GPRS\"\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+SAPBR=3,1,\"APN\",\"internet\"\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+SAPBR=1,1\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+HTTPINIT\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+HTTPPARA=\"CID\",1\r\n", b"\r\nOK\r\n");
    }

    fn script_http_epilog(serial: &mut MockSerial) {
        serial.expect(b"AT+HTTPTERM\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+SAPBR=0,1\r\n", b"\r\nOK\r\n");
    }

    #[test]
    fn get_small_body_fits() {
        let mut serial = MockSerial::new();
        script_http_prolog(&mut serial);
        serial.expect(b"AT+HTTPPARA=\"URL\",\"http://example.com/x\"\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+HTTPACTION=0\r\n", b"\r\nOK\r\n\r\n+HTTPACTION: 0,200,10\r\n");
        serial.expect(b"AT+HTTPREAD\r\n", b"\r\n+HTTPREAD: 10\r\n0123456789\r\nOK\r\n");
        script_http_epilog(&mut serial);

        let mut client = test_client(serial);
        let mut out = [0u8; 32];
        assert_eq!(client.do_http_get("http://example.com/x", &mut out), Ok(10));
        assert_eq!(&out[..10], b"0123456789");
        assert!(client.serial.script_done());
        // HTTP leaves the session attached, not data-active
        assert_eq!(client.connection_state(), ConnectionState::NetworkAttached);
    }

    #[test]
    fn get_large_body_is_buffer_too_small_not_truncation() {
        let mut serial = MockSerial::new();
        script_http_prolog(&mut serial);
        serial.expect(b"AT+HTTPPARA=\"URL\",\"http://example.com/x\"\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+HTTPACTION=0\r\n", b"\r\nOK\r\n\r\n+HTTPACTION: 0,200,64\r\n");
        serial.expect(b"AT+HTTPREAD\r\n", b"\r\n+HTTPREAD: 64\r\n");
        script_http_epilog(&mut serial);

        let mut client = test_client(serial);
        let mut out = [0u8; 32];
        assert_eq!(
            client.do_http_get("http://example.com/x", &mut out),
            Err(Error::BufferTooSmall)
        );
        assert_eq!(out, [0u8; 32]);
    }

    #[test]
    fn non_2xx_status_is_semantic_failure() {
        let mut serial = MockSerial::new();
        script_http_prolog(&mut serial);
        serial.expect(b"AT+HTTPPARA=\"URL\",\"http://example.com/x\"\r\n", b"\r\nOK\r\n");
        serial.expect(b"AT+HTTPACTION=0\r\n", b"\r\nOK\r\n\r\n+HTTPACTION: 0,404,13\r\n");
        script_http_epilog(&mut serial);

        let mut client = test_client(serial);
        let mut out = [0u8; 32];
        assert_eq!(
            client.do_http_get("http://example.com/x", &mut out),
            Err(Error::HttpStatus(404))
        );
    }

    #[test]
    fn post_uploads_body_and_custom_headers() {
        let mut serial = MockSerial::new();
        script_http_prolog(&mut serial);
        serial.expect(b"AT+HTTPPARA=\"URL\",\"http://example.com/post\"\r\n", b"\r\nOK\r\n");
        serial.expect(
            b"AT+HTTPPARA=\"USERDATA\",\"X-Token: s3cr3t\"\r\n",
            b"\r\nOK\r\n",
        );
        serial.expect(
            b"AT+HTTPPARA=\"CONTENT\",\"application/json\"\r\n",
            b"\r\nOK\r\n",
        );
        serial.expect(b"AT+HTTPDATA=7,10000\r\n", b"\r\nDOWNLOAD\r\n");
        serial.expect(b"{\"a\":1}", b"\r\nOK\r\n");
        serial.expect(b"AT+HTTPACTION=1\r\n", b"\r\nOK\r\n\r\n+HTTPACTION: 1,201,0\r\n");
        script_http_epilog(&mut serial);

        let config = crate::test_helpers::test_config()
            .with_http_headers("X-Token: s3cr3t")
            .with_content_type("application/json");
        let mut client = crate::client::GprsClient::<_, _, 64>::new(
            serial,
            crate::power::NoPower,
            config,
        );

        assert_eq!(
            client.do_http_post("http://example.com/post", b"{\"a\":1}"),
            Ok(())
        );
        assert!(client.serial.script_done());
    }
}
