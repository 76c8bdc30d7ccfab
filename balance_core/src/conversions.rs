//! `From` implementations bridging `balance_config` types to `balance_core` runtime configs.

use std::time::Duration;

use crate::config::{BridgeCfg, StabilityCfg, StreamCfg};
use crate::mass::{Milligrams, quantize_mg_to_ug};

impl From<&balance_config::StabilityCfg> for StabilityCfg {
    fn from(c: &balance_config::StabilityCfg) -> Self {
        Self {
            window: c.window,
            tolerance: Milligrams::from_ug(quantize_mg_to_ug(c.tolerance_mg).max(0)),
        }
    }
}

impl From<&balance_config::Config> for BridgeCfg {
    fn from(c: &balance_config::Config) -> Self {
        Self {
            connect_timeout: Duration::from_millis(c.device.connect_timeout_ms),
            response_timeout: Duration::from_millis(c.device.response_timeout_ms),
            poll_interval: Duration::from_millis(c.stream.poll_interval_ms),
            abort_drain: Duration::from_millis(c.device.abort_drain_ms),
            stability: (&c.stability).into(),
        }
    }
}

impl From<&balance_config::Config> for StreamCfg {
    fn from(c: &balance_config::Config) -> Self {
        Self {
            deadline: Duration::from_millis(c.stream.deadline_ms),
            poll_interval: Duration::from_millis(c.stream.poll_interval_ms),
            stability: (&c.stability).into(),
        }
    }
}
