use embassy_time::Duration;
use embedded_io::{Read, ReadReady, Write};

use crate::{
    client::{deadline, GprsClient, TcpState},
    error::Error,
    line,
    power::ModemPower,
};

/// Brokers can be slow to produce the first byte of a packet.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(20);

/// MQTT support is a packet-framing shim over the TCP session: the modem
/// offers nothing but a byte pipe, so packet construction and protocol
/// semantics stay with the caller.
impl<S, P, const BUF_SIZE: usize> GprsClient<'_, S, P, BUF_SIZE>
where
    S: Read + ReadReady + Write,
    P: ModemPower,
{
    /// Opens a transparent TCP session to the broker.
    pub fn open_mqtt(&mut self, server: &str, port: u16) -> Result<(), Error> {
        self.open_tcp(server, port, true)
    }

    /// Closes the underlying TCP session, optionally powering off.
    pub fn close_mqtt(&mut self, switch_off: bool) {
        self.close_tcp(switch_off)
    }

    /// Writes one pre-framed packet to the broker.
    pub fn send_mqtt_packet(&mut self, pckt: &[u8]) -> Result<(), Error> {
        self.send_data_tcp(pckt)
    }

    /// Reads whatever the broker sends before the deadline, up to `pckt`'s
    /// length. Returns the byte count; 0 means nothing arrived in time,
    /// which the caller tells apart from an error by the `Ok`.
    pub fn receive_mqtt_packet(
        &mut self,
        pckt: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, Error> {
        if !matches!(self.tcp_state, TcpState::Open { .. }) {
            return Err(Error::IllegalState);
        }
        let deadline = deadline(timeout);
        let mut n = 0;
        while n < pckt.len() {
            match line::read_byte(&mut self.serial, deadline) {
                Ok(byte) => {
                    pckt[n] = byte;
                    n += 1;
                }
                Err(Error::Timeout) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(n)
    }

    /// Default receive deadline used by callers that have no better bound.
    pub const fn mqtt_receive_timeout() -> Duration {
        RECEIVE_TIMEOUT
    }
}
