//! Weight Stream Coordinator: turns "wait for a stable weight" into a cancellable
//! sequence of events.
//!
//! One attempt polls `read_immediate`, feeds the aggregator and reports progress until
//! the weight settles or the deadline passes. The accepted reading is written to the
//! ledger before `stable` is emitted, so a caller that sees `stable` can rely on the
//! record being there.
//!
//! `start` runs an attempt on its own thread and hands back a `WeightStream`. Dropping
//! the stream cancels the attempt before its next device command and joins the thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel as xch;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::SharedClock;
use crate::bridge::InstrumentBridge;
use crate::config::StreamCfg;
use crate::error::{BalanceError, ErrorKind};
use crate::ledger::Ledger;
use crate::mass::{Milligrams, Unit};
use crate::stability::{StabilityAggregator, Verdict};
use crate::status::AttemptState;

/// Reason carried by `manual_entry` when no balance is configured.
pub const NO_DEVICE_REASON: &str = "no balance configured";

/// Events pushed to the caller. Every terminal state maps to exactly one terminal event,
/// except `Cancelled`, which has nobody left to tell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Reading {
        value: Milligrams,
        unit: Unit,
        stable: bool,
    },
    Stable {
        value: Milligrams,
        unit: Unit,
    },
    Timeout {},
    Error {
        kind: ErrorKind,
        message: String,
    },
    ManualEntry {
        reason: String,
    },
}

impl StreamEvent {
    pub fn reading(value: Milligrams, stable: bool) -> Self {
        StreamEvent::Reading {
            value,
            unit: Unit::Milligram,
            stable,
        }
    }

    pub fn stable(value: Milligrams) -> Self {
        StreamEvent::Stable {
            value,
            unit: Unit::Milligram,
        }
    }

    pub fn error(e: &BalanceError) -> Self {
        StreamEvent::Error {
            kind: e.kind(),
            message: e.to_string(),
        }
    }

    /// Wire name of the event (`reading`, `stable`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Reading { .. } => "reading",
            StreamEvent::Stable { .. } => "stable",
            StreamEvent::Timeout {} => "timeout",
            StreamEvent::Error { .. } => "error",
            StreamEvent::ManualEntry { .. } => "manual_entry",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Reading { .. })
    }

    /// Render as one server-sent-events frame.
    pub fn to_sse(&self) -> serde_json::Result<String> {
        Ok(format!(
            "event: {}\ndata: {}\n\n",
            self.name(),
            serde_json::to_string(self)?
        ))
    }
}

/// Shared flag a caller flips to abandon an attempt.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Which ledger slot a weighing attempt fills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeighRequest {
    pub session_id: String,
    pub step_key: String,
}

impl WeighRequest {
    pub fn new(session_id: impl Into<String>, step_key: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            step_key: step_key.into(),
        }
    }
}

#[derive(Clone)]
pub struct StreamCoordinator {
    bridge: Option<Arc<InstrumentBridge>>,
    ledger: Arc<Ledger>,
    cfg: StreamCfg,
    clock: SharedClock,
}

impl StreamCoordinator {
    /// `bridge = None` is manual-entry mode.
    pub fn new(
        bridge: Option<Arc<InstrumentBridge>>,
        ledger: Arc<Ledger>,
        cfg: StreamCfg,
        clock: SharedClock,
    ) -> Self {
        Self {
            bridge,
            ledger,
            cfg,
            clock,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Drive one attempt to a terminal state on the calling thread.
    ///
    /// `emit` returning `false` means the caller is gone; the attempt stops without
    /// touching the device again.
    pub fn run(
        &self,
        request: &WeighRequest,
        cancel: &CancelToken,
        mut emit: impl FnMut(StreamEvent) -> bool,
    ) -> AttemptState {
        let span = tracing::info_span!(
            "weigh",
            session = %request.session_id,
            step = %request.step_key
        );
        let _enter = span.enter();

        let Some(bridge) = &self.bridge else {
            info!("manual entry required");
            emit(StreamEvent::ManualEntry {
                reason: NO_DEVICE_REASON.to_string(),
            });
            return AttemptState::ManualFallback;
        };

        let mut agg = StabilityAggregator::new(self.cfg.stability);
        let mut state = AttemptState::AwaitingFirstReading;
        let start = self.clock.now();

        loop {
            if cancel.is_cancelled() {
                info!(?state, "weighing cancelled by caller");
                return AttemptState::Cancelled;
            }
            if self.clock.now().saturating_duration_since(start) >= self.cfg.deadline {
                info!(
                    deadline_ms = self.cfg.deadline.as_millis() as u64,
                    "no stable weight before deadline"
                );
                emit(StreamEvent::Timeout {});
                return AttemptState::TimedOut;
            }

            match bridge.read_immediate() {
                Ok(reading) => {
                    if state == AttemptState::AwaitingFirstReading {
                        debug!("first reading received");
                        state = AttemptState::Polling;
                    }
                    if agg.push(&reading) == Verdict::Stable {
                        if cancel.is_cancelled() {
                            info!("cancelled at stability; nothing recorded");
                            return AttemptState::Cancelled;
                        }
                        return match self.ledger.record_reading(
                            &request.session_id,
                            &request.step_key,
                            &reading,
                        ) {
                            Ok(m) => {
                                info!(value = %m.weight, id = m.id, "stable weight accepted");
                                emit(StreamEvent::stable(m.weight));
                                AttemptState::Stabilized
                            }
                            Err(e) => {
                                warn!(error = %e, "ledger write failed");
                                emit(StreamEvent::error(&e));
                                AttemptState::Errored
                            }
                        };
                    }
                    if !emit(StreamEvent::reading(reading.value(), reading.is_stable())) {
                        cancel.cancel();
                        info!("event channel closed; stopping");
                        return AttemptState::Cancelled;
                    }
                }
                Err(BalanceError::NotSettled) => debug!("device busy; cycle skipped"),
                Err(e) => {
                    warn!(error = %e, "weighing failed");
                    emit(StreamEvent::error(&e));
                    return AttemptState::Errored;
                }
            }

            self.clock.sleep(self.cfg.poll_interval);
        }
    }

    /// Run one attempt on a worker thread, delivering events through the returned stream.
    pub fn start(&self, request: WeighRequest) -> WeightStream {
        let (tx, rx) = xch::unbounded();
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let coord = self.clone();
        let join = std::thread::spawn(move || {
            let state = coord.run(&request, &worker_cancel, |ev| tx.send(ev).is_ok());
            tracing::trace!(?state, "weigh worker exiting");
            state
        });
        WeightStream {
            rx,
            cancel,
            join: Some(join),
        }
    }
}

/// Receiving end of a running attempt. Iterates events until the terminal one.
pub struct WeightStream {
    rx: xch::Receiver<StreamEvent>,
    cancel: CancelToken,
    join: Option<JoinHandle<AttemptState>>,
}

impl WeightStream {
    /// Ask the worker to stop before its next device command.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the worker to finish and return its final state.
    ///
    /// Events not yet consumed are discarded.
    pub fn finish(mut self) -> AttemptState {
        self.join_worker().unwrap_or(AttemptState::Errored)
    }

    fn join_worker(&mut self) -> Option<AttemptState> {
        let handle = self.join.take()?;
        match handle.join() {
            Ok(state) => Some(state),
            Err(_) => {
                warn!("weigh worker panicked");
                None
            }
        }
    }
}

impl Iterator for WeightStream {
    type Item = StreamEvent;

    fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().ok()
    }
}

impl Drop for WeightStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        let _ = self.join_worker();
    }
}
