//! Hardware-agnostic seams between the balance core and its transports.
//!
//! Errors cross these boundaries as `Box<dyn Error + Send + Sync>`; the core maps
//! them to its typed error enum.

pub mod clock;

pub use clock::{Clock, MonotonicClock};

use std::time::Duration;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A line-oriented, full-duplex link to one instrument.
///
/// Implementations own CRLF framing: `write_line` receives the bare command text and
/// `read_line` returns the response with the terminator stripped.
pub trait LineTransport: Send {
    fn write_line(&mut self, line: &str) -> Result<(), BoxError>;

    /// Wait up to `timeout` for one complete line.
    ///
    /// `Ok(None)` means nothing arrived in time; a closed peer is an error.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, BoxError>;

    /// Close the link. Must be safe to call more than once.
    fn close(&mut self) {}
}

impl<T: LineTransport + ?Sized> LineTransport for Box<T> {
    fn write_line(&mut self, line: &str) -> Result<(), BoxError> {
        (**self).write_line(line)
    }
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, BoxError> {
        (**self).read_line(timeout)
    }
    fn close(&mut self) {
        (**self).close();
    }
}

/// Opens a fresh `LineTransport` to the configured instrument.
pub trait Connector: Send + Sync {
    fn connect(&self, timeout: Duration) -> Result<Box<dyn LineTransport>, BoxError>;

    /// Human-readable endpoint for logs (`host:port`, `simulated`, ...).
    fn describe(&self) -> String;
}
