//! Byte-level link implementations
//!
//! The board is reached over a blocking, half-duplex byte stream. This module
//! defines the [`SerialLink`] abstraction the transport is written against,
//! plus its implementations: a real serial port and an in-memory simulated link.

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;

pub use mock::{BoardModel, MockLink, MockReply};
#[cfg(feature = "instrument_serial")]
pub use serial_adapter::{open_serial_link, SerialSettings};

use std::io::{Read, Write};
use std::time::Duration;

/// A blocking byte stream to the board.
///
/// Reads must return `ErrorKind::TimedOut` when no byte arrives within the
/// link's read timeout.
pub trait SerialLink: Read + Write + Send {
    /// Discard any received bytes that have not been read yet.
    fn clear_input(&mut self) -> std::io::Result<()>;

    /// Bound the next reads to `timeout`.
    fn set_read_timeout(&mut self, timeout: Duration) -> std::io::Result<()>;

    /// Human readable name of the link, for logs.
    fn describe(&self) -> String;
}
