//! Weighing attempt state returned by the stream coordinator.

use serde::Serialize;

/// Where a single weighing attempt stands.
///
/// `AwaitingFirstReading -> Polling -> {Stabilized | TimedOut | Errored | ManualFallback}`,
/// plus `Cancelled` when the caller walks away before a terminal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    AwaitingFirstReading,
    Polling,
    /// Stable reading accepted and already in the ledger.
    Stabilized,
    TimedOut,
    Errored,
    /// No balance configured; the caller should prompt for manual entry.
    ManualFallback,
    /// Caller closed the channel; nothing was recorded.
    Cancelled,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AttemptState::AwaitingFirstReading | AttemptState::Polling)
    }
}
