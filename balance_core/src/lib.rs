#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Balance integration core (transport-agnostic).
//!
//! All device I/O goes through `balance_traits::Connector` / `LineTransport`; concrete
//! TCP and simulated transports live in `balance_hardware`.
//!
//! ## Architecture
//!
//! - **Codec**: wire lines to typed readings (`protocol`), exact masses (`mass`)
//! - **Bridge**: one gated connection, explicit lifecycle (`bridge`)
//! - **Stability**: windowed check paired with the device status (`stability`)
//! - **Stream**: polling state machine emitting events (`stream`, `status`)
//! - **Ledger**: append-only SQLite record with supersession (`ledger`, `export`)
//!
//! ## Fixed-Point Arithmetic
//!
//! Masses are integer micrograms inside `Milligrams`; wire text is parsed without any
//! floating-point step. Only config tolerances are quantized from `f64`.

pub mod atomic;
pub mod bridge;
pub mod config;
pub mod conversions;
pub mod error;
pub mod export;
pub mod hw_error;
pub mod ledger;
pub mod mass;
pub mod mocks;
pub mod protocol;
pub mod stability;
pub mod status;
pub mod stream;

use std::sync::Arc;

use balance_traits::Clock;

/// Clock shared between the bridge, the coordinator and their worker threads.
pub type SharedClock = Arc<dyn Clock + Send + Sync>;

pub use bridge::{ConnectionState, DeviceHandle, InstrumentBridge};
pub use config::{BridgeCfg, StabilityCfg, StreamCfg};
pub use error::{BalanceError, ErrorKind, Report, Result};
pub use ledger::{Ledger, Measurement, MeasurementSource};
pub use mass::{Milligrams, Unit};
pub use protocol::{
    Command, DeviceResponse, ParseError, Status, WeightReading, parse_response, parse_response_at,
};
pub use stability::{StabilityAggregator, Verdict};
pub use status::AttemptState;
pub use stream::{CancelToken, StreamCoordinator, StreamEvent, WeighRequest, WeightStream};
