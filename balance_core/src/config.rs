//! Runtime configuration for the bridge, aggregator, and stream coordinator.
//!
//! These are separate from the TOML-deserialized config in `balance_config`;
//! see `conversions` for the mapping.

use std::time::Duration;

use crate::mass::Milligrams;

/// Windowed stability check parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityCfg {
    /// Consecutive readings that must agree. Values below 1 are treated as 1.
    pub window: usize,
    /// Max spread (max - min) across the window.
    pub tolerance: Milligrams,
}

impl Default for StabilityCfg {
    fn default() -> Self {
        Self {
            window: 5,
            tolerance: Milligrams::from_ug(500),
        }
    }
}

/// Instrument Bridge timing.
#[derive(Debug, Clone)]
pub struct BridgeCfg {
    pub connect_timeout: Duration,
    /// Max wait for one response line; exceeding it faults the connection.
    pub response_timeout: Duration,
    /// Pause between polls in `read_until_stable`.
    pub poll_interval: Duration,
    /// Window for discarding stray replies after an abort.
    pub abort_drain: Duration,
    pub stability: StabilityCfg,
}

impl Default for BridgeCfg {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(3000),
            response_timeout: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(200),
            abort_drain: Duration::from_millis(50),
            stability: StabilityCfg::default(),
        }
    }
}

/// Weight Stream Coordinator timing.
#[derive(Debug, Clone)]
pub struct StreamCfg {
    /// Terminal `timeout` after this long without stability.
    pub deadline: Duration,
    /// Pause between immediate-weight polls; the bridge gate is free during it.
    pub poll_interval: Duration,
    pub stability: StabilityCfg,
}

impl Default for StreamCfg {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(30),
            poll_interval: Duration::from_millis(200),
            stability: StabilityCfg::default(),
        }
    }
}
