use embassy_time::Instant;
use embedded_io::{Read, ReadReady};
use heapless::Vec;

use crate::{error::Error, helpers::LossyStr};

/// Reads a single byte, busy-polling the transport until one is available or
/// the deadline passes.
pub(crate) fn read_byte<R>(serial: &mut R, deadline: Instant) -> Result<u8, Error>
where
    R: Read + ReadReady,
{
    loop {
        match serial.read_ready() {
            Ok(true) => {
                let mut byte = [0u8; 1];
                match serial.read(&mut byte) {
                    Ok(0) => {}
                    Ok(_) => return Ok(byte[0]),
                    Err(_) => return Err(Error::Read),
                }
            }
            Ok(false) => {}
            Err(_) => return Err(Error::Read),
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout);
        }
    }
}

/// Fills `buf` completely from the transport, or fails with `Timeout`.
pub(crate) fn read_exact<R>(serial: &mut R, buf: &mut [u8], deadline: Instant) -> Result<(), Error>
where
    R: Read + ReadReady,
{
    for slot in buf.iter_mut() {
        *slot = read_byte(serial, deadline)?;
    }
    Ok(())
}

/// Discards everything currently pending on the transport.
pub(crate) fn flush_input<R>(serial: &mut R)
where
    R: Read + ReadReady,
{
    while serial.read_ready().unwrap_or(false) {
        let mut byte = [0u8; 1];
        if serial.read(&mut byte).map(|n| n == 0).unwrap_or(true) {
            break;
        }
    }
}

/// The session's line buffer. Exactly one writer ([`read_line`]), overwritten
/// on every read; capacity is fixed for the session's lifetime.
///
/// [`read_line`]: LineBuffer::read_line
pub(crate) struct LineBuffer<const N: usize> {
    buf: Vec<u8, N>,
}

impl<const N: usize> LineBuffer<N> {
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Reads bytes until a `\r`/`\n` terminator, the deadline, or buffer
    /// exhaustion.
    ///
    /// Leading terminators are skipped and repeated terminators collapse. A
    /// line longer than the buffer is truncated and the remainder discarded
    /// up to its terminator, but still reported as a populated line; partial
    /// diagnostic text must not wedge the calling state machine.
    pub fn read_line<R>(&mut self, serial: &mut R, deadline: Instant) -> Result<usize, Error>
    where
        R: Read + ReadReady,
    {
        self.buf.clear();
        let mut truncated = false;

        loop {
            // Bounds byte floods too; `read_byte` alone only checks the
            // deadline while the link is idle
            if Instant::now() > deadline {
                return Err(Error::Timeout);
            }
            let byte = read_byte(serial, deadline)?;
            match byte {
                b'\r' | b'\n' => {
                    if self.buf.is_empty() && !truncated {
                        continue;
                    }
                    break;
                }
                _ => {
                    if !truncated && self.buf.push(byte).is_err() {
                        truncated = true;
                        warn!("response line exceeds buffer capacity {}, truncating", N);
                    }
                }
            }
        }

        trace!("<-- {:?}", LossyStr(&self.buf));
        Ok(self.buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockSerial;
    use embassy_time::Duration;

    fn deadline() -> Instant {
        Instant::now() + Duration::from_millis(100)
    }

    #[test]
    fn line_with_leading_noise() {
        let mut serial = MockSerial::new();
        serial.inject(b"\r\n\r\nOK\r\n");

        let mut line = LineBuffer::<16>::new();
        assert_eq!(line.read_line(&mut serial, deadline()), Ok(2));
        assert_eq!(line.as_slice(), b"OK");
    }

    #[test]
    fn consecutive_lines() {
        let mut serial = MockSerial::new();
        serial.inject(b"+CSQ: 14,0\r\nOK\r\n");

        let mut line = LineBuffer::<16>::new();
        assert_eq!(line.read_line(&mut serial, deadline()), Ok(10));
        assert_eq!(line.as_slice(), b"+CSQ: 14,0");
        assert_eq!(line.read_line(&mut serial, deadline()), Ok(2));
        assert_eq!(line.as_slice(), b"OK");
    }

    #[test]
    fn timeout_without_terminator() {
        let mut serial = MockSerial::new();
        serial.inject(b"half a li");

        let mut line = LineBuffer::<16>::new();
        assert_eq!(
            line.read_line(&mut serial, Instant::now() + Duration::from_millis(20)),
            Err(Error::Timeout)
        );
    }

    #[test]
    fn line_at_exact_capacity_is_kept_whole() {
        let mut serial = MockSerial::new();
        serial.inject(b"12345678\r\n");

        let mut line = LineBuffer::<8>::new();
        assert_eq!(line.read_line(&mut serial, deadline()), Ok(8));
        assert_eq!(line.as_slice(), b"12345678");
    }

    #[test]
    fn overlong_line_is_truncated_not_fatal() {
        let mut serial = MockSerial::new();
        serial.inject(b"123456789\r\nOK\r\n");

        let mut line = LineBuffer::<8>::new();
        assert_eq!(line.read_line(&mut serial, deadline()), Ok(8));
        assert_eq!(line.as_slice(), b"12345678");
        // The discarded tail must not corrupt the next line
        assert_eq!(line.read_line(&mut serial, deadline()), Ok(2));
        assert_eq!(line.as_slice(), b"OK");
    }

    #[test]
    fn read_exact_fills_buffer() {
        let mut serial = MockSerial::new();
        serial.inject(b"abcdef");

        let mut buf = [0u8; 4];
        assert_eq!(read_exact(&mut serial, &mut buf, deadline()), Ok(()));
        assert_eq!(&buf, b"abcd");
    }
}
