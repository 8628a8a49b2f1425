#![cfg_attr(not(test), no_std)]

//! # SIMCom GPRS driver
//!
//! Blocking driver for SIMCom SIM800/SIM900 GPRS modems behind a byte
//! oriented serial link. The crate turns the module's line based AT dialect
//! into timeout-bounded network operations: network attach, raw TCP, HTTP,
//! FTP upload, MQTT byte transport and text-mode SMS.
//!
//! The transport is anything implementing the blocking `embedded-io`
//! [`Read`](embedded_io::Read) + [`ReadReady`](embedded_io::ReadReady) +
//! [`Write`](embedded_io::Write) traits; power sequencing goes through the
//! [`ModemPower`] capability, with a GPIO implementation provided for the
//! common bee-socket carriers.
//!
//! Every operation blocks its caller until it completes or its deadline
//! lapses. Deadlines are absolute: they are armed once on entry, so a flood
//! of unsolicited status lines can never extend a wait. The session is
//! strictly single threaded; there is no internal locking and no concurrent
//! invocation support.
//!
//! ```
//! use simcom_gprs::{Apn, Config, GprsClient, NoPower};
//!
//! let config = Config::new().with_apn(Apn::Given {
//!     name: "internet",
//!     username: None,
//!     password: None,
//! });
//! let mut modem: GprsClient<_, _, 64> = GprsClient::new(serial, NoPower, config);
//!
//! modem.connect()?;
//! modem.open_tcp("1.2.3.4", 8080, false)?;
//! modem.send_data_tcp(b"ping")?;
//! modem.close_tcp(true);
//! ```

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

mod blocking_timer;
pub mod client;
mod command;
pub mod config;
pub mod datetime;
pub mod error;
mod helpers;
mod line;
mod module_timing;
mod parse;
pub mod power;
mod services;

#[cfg(test)]
mod test_helpers;

pub use client::{csq_to_rssi, rssi_to_csq, ConnectionState, GprsClient, ProductId};
pub use command::MAX_CMD_LEN;
pub use config::{Apn, Config};
pub use datetime::DateTime;
pub use error::Error;
pub use power::{HwVersion, ModemPower, NoPin, NoPower, PinPower};

/// Default capacity of the session's response line buffer.
///
/// The buffer is the `BUF_SIZE` const parameter of [`GprsClient`], allocated
/// with the session and never resized. Operations that funnel large payload
/// lines through it, such as [`receive_line_tcp`](GprsClient::receive_line_tcp),
/// may need considerably more than this; pick the capacity up front.
pub const SIM_DEFAULT_BUFFER_SIZE: usize = 64;
