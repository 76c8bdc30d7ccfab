//! Stability Aggregator: decides when a sequence of readings has settled.
//!
//! Both conditions are required:
//! - the last `window` values lie within `tolerance` of each other, and
//! - the device itself flags the latest reading as stable.
//!
//! The device bit alone lags step changes; the window alone cannot tell a frozen
//! link replaying a cached value from a settled pan.

use std::collections::VecDeque;

use crate::config::StabilityCfg;
use crate::mass::Milligrams;
use crate::protocol::WeightReading;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Settling,
    Stable,
}

#[derive(Debug, Clone)]
pub struct StabilityAggregator {
    window: usize,
    tolerance_ug: u64,
    values: VecDeque<Milligrams>,
}

impl StabilityAggregator {
    pub fn new(cfg: StabilityCfg) -> Self {
        let window = cfg.window.max(1);
        Self {
            window,
            tolerance_ug: cfg.tolerance.as_ug().unsigned_abs(),
            values: VecDeque::with_capacity(window),
        }
    }

    pub fn push(&mut self, reading: &WeightReading) -> Verdict {
        self.push_value(reading.value(), reading.is_stable())
    }

    /// Feed one value with the device's stability bit.
    ///
    /// Reports `Stable` at most once per window: the window is cleared on `Stable`.
    pub fn push_value(&mut self, value: Milligrams, device_stable: bool) -> Verdict {
        if let Some(last) = self.values.back()
            && last.abs_diff_ug(value) > self.tolerance_ug
        {
            tracing::trace!(
                last = %last,
                value = %value,
                "reading left tolerance band; window reset"
            );
            self.values.clear();
        }
        self.values.push_back(value);
        if self.values.len() > self.window {
            self.values.pop_front();
        }

        let full = self.values.len() == self.window;
        if device_stable && full && self.spread_ug() <= self.tolerance_ug {
            self.values.clear();
            return Verdict::Stable;
        }
        Verdict::Settling
    }

    /// Start over, e.g. when a new weighing request begins.
    pub fn reset(&mut self) {
        self.values.clear();
    }

    /// Readings currently held in the window.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn spread_ug(&self) -> u64 {
        let min = self.values.iter().min();
        let max = self.values.iter().max();
        match (min, max) {
            (Some(lo), Some(hi)) => lo.abs_diff_ug(*hi),
            _ => 0,
        }
    }
}
