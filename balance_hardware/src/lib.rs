//! Concrete transports for the balance line protocol.
//!
//! - `tcp`: CRLF-framed TCP link to a networked balance (or a serial-to-TCP bridge).
//! - `sim`: deterministic in-process balance for development and tests.
pub mod error;
pub mod sim;
pub mod tcp;
pub mod util;

pub use error::HwError;
pub use sim::{SimulatedBalance, SimulatedConnector};
pub use tcp::{TcpConnector, TcpLineTransport};
