//! Instrument Bridge: the single owner of the balance connection.
//!
//! Every command/response exchange runs under one `Mutex` gate, so the device never
//! sees a second command before it has answered the first. Connection state lives in
//! an atomic next to the gate; `state()` never queues behind an exchange in flight.
//!
//! A transport failure faults the bridge. Nothing reconnects on its own: callers
//! must invoke `reconnect()` (or `connect()`) explicitly.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use balance_traits::{Connector, LineTransport};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::SharedClock;
use crate::config::BridgeCfg;
use crate::error::BalanceError;
use crate::hw_error::map_transport_error;
use crate::protocol::{Command, DeviceResponse, WeightReading, parse_response};
use crate::stability::{StabilityAggregator, Verdict};

/// Health of the balance link as observed by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Faulted = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Faulted,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Faulted => "faulted",
        }
    }
}

type Gate = Option<Box<dyn LineTransport>>;

pub struct InstrumentBridge {
    connector: Box<dyn Connector>,
    cfg: BridgeCfg,
    clock: SharedClock,
    state: AtomicU8,
    gate: Mutex<Gate>,
}

impl std::fmt::Debug for InstrumentBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentBridge")
            .field("endpoint", &self.connector.describe())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl InstrumentBridge {
    /// Build a bridge in `Disconnected` state. No I/O happens until `connect()`.
    pub fn new(connector: Box<dyn Connector>, cfg: BridgeCfg, clock: SharedClock) -> Self {
        Self {
            connector,
            cfg,
            clock,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            gate: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> String {
        self.connector.describe()
    }

    pub fn config(&self) -> &BridgeCfg {
        &self.cfg
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: ConnectionState) {
        self.state.store(s as u8, Ordering::Release);
    }

    fn lock(&self) -> MutexGuard<'_, Gate> {
        // The transport is dropped on any fault, so a panic mid-exchange leaves
        // nothing half-written behind the guard.
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the transport. Idempotent while connected.
    ///
    /// A failed attempt leaves the previous state (`Disconnected` or `Faulted`) in place.
    pub fn connect(&self) -> Result<(), BalanceError> {
        let mut gate = self.lock();
        if gate.is_some() && self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.connect_locked(&mut gate)
    }

    /// Close and reopen the transport, whatever the current state.
    pub fn reconnect(&self) -> Result<(), BalanceError> {
        let mut gate = self.lock();
        if let Some(mut t) = gate.take() {
            t.close();
        }
        self.connect_locked(&mut gate)
    }

    fn connect_locked(&self, gate: &mut Gate) -> Result<(), BalanceError> {
        let prior = match self.state() {
            ConnectionState::Faulted => ConnectionState::Faulted,
            _ => ConnectionState::Disconnected,
        };
        self.set_state(ConnectionState::Connecting);
        let endpoint = self.connector.describe();
        match self.connector.connect(self.cfg.connect_timeout) {
            Ok(t) => {
                *gate = Some(t);
                self.set_state(ConnectionState::Connected);
                info!(endpoint = %endpoint, "balance connected");
                Ok(())
            }
            Err(e) => {
                *gate = None;
                self.set_state(prior);
                let err = map_transport_error(e.as_ref());
                warn!(endpoint = %endpoint, error = %err, "balance connect failed");
                Err(err)
            }
        }
    }

    /// Close cleanly. Safe from any state.
    pub fn disconnect(&self) {
        let mut gate = self.lock();
        if let Some(mut t) = gate.take() {
            t.close();
            info!(endpoint = %self.connector.describe(), "balance disconnected");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Drop the transport and mark the link faulted. Caller holds the gate.
    fn fault(&self, gate: &mut Gate, err: BalanceError) -> BalanceError {
        if let Some(mut t) = gate.take() {
            t.close();
        }
        self.set_state(ConnectionState::Faulted);
        warn!(error = %err, "balance link faulted; explicit reconnect required");
        err
    }

    fn not_connected(&self) -> BalanceError {
        match self.state() {
            ConnectionState::Faulted => {
                BalanceError::Connection("link faulted; reconnect required".into())
            }
            _ => BalanceError::Connection("not connected".into()),
        }
    }

    /// One command/response round-trip under the gate.
    fn exchange(&self, cmd: Command) -> Result<DeviceResponse, BalanceError> {
        let mut gate = self.lock();
        let Some(transport) = gate.as_mut() else {
            return Err(self.not_connected());
        };

        if let Err(e) = transport.write_line(cmd.token()) {
            let err = map_transport_error(e.as_ref());
            return Err(self.fault(&mut gate, err));
        }
        let line = match transport.read_line(self.cfg.response_timeout) {
            Ok(Some(line)) => line,
            Ok(None) => {
                let err = BalanceError::Connection(format!(
                    "no response to {cmd} within {} ms",
                    self.cfg.response_timeout.as_millis()
                ));
                return Err(self.fault(&mut gate, err));
            }
            Err(e) => {
                let err = map_transport_error(e.as_ref());
                return Err(self.fault(&mut gate, err));
            }
        };
        drop(gate);

        parse_response(cmd, &line).map_err(|e| {
            warn!(command = %cmd, line = %line, error = %e, "malformed balance response");
            BalanceError::Parse(e)
        })
    }

    fn into_reading(resp: DeviceResponse) -> Result<WeightReading, BalanceError> {
        match resp {
            DeviceResponse::Weight(r) => Ok(r),
            DeviceResponse::NotSettled { .. } => Err(BalanceError::NotSettled),
            DeviceResponse::Overload { .. } => Err(BalanceError::Overload),
            DeviceResponse::Underload { .. } => Err(BalanceError::Underload),
            DeviceResponse::SyntaxError { raw } => Err(BalanceError::Rejected(raw)),
        }
    }

    /// Whatever the device reports right now, stable or not.
    pub fn read_immediate(&self) -> Result<WeightReading, BalanceError> {
        let r = Self::into_reading(self.exchange(Command::ImmediateWeight)?)?;
        debug!(value = %r.value(), stable = r.is_stable(), "immediate reading");
        Ok(r)
    }

    /// Ask the device itself to wait for stability, bounded by the response timeout.
    pub fn read_stable(&self) -> Result<WeightReading, BalanceError> {
        Self::into_reading(self.exchange(Command::StableWeight)?)
    }

    /// Zero the balance. Returns the tare value the device reports.
    pub fn tare(&self) -> Result<WeightReading, BalanceError> {
        let r = Self::into_reading(self.exchange(Command::Tare)?)?;
        info!(tare = %r.value(), "balance tared");
        Ok(r)
    }

    /// Cancel a device-side wait and discard any reply that trails in within the
    /// configured drain window.
    ///
    /// The window is one wall-clock budget for the whole drain, so a device that keeps
    /// talking cannot hold the gate past it.
    pub fn abort(&self) -> Result<(), BalanceError> {
        let mut gate = self.lock();
        let Some(transport) = gate.as_mut() else {
            return Err(self.not_connected());
        };
        if let Err(e) = transport.write_line(Command::Abort.token()) {
            let err = map_transport_error(e.as_ref());
            return Err(self.fault(&mut gate, err));
        }
        let deadline = Instant::now() + self.cfg.abort_drain;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                debug!("abort drain window closed");
                return Ok(());
            }
            match transport.read_line(left) {
                Ok(Some(line)) => debug!(line = %line, "discarded after abort"),
                Ok(None) => return Ok(()),
                Err(e) => {
                    let err = map_transport_error(e.as_ref());
                    return Err(self.fault(&mut gate, err));
                }
            }
        }
    }

    /// Poll immediate readings until the aggregator and the device agree on
    /// stability, or `deadline` elapses on the injected clock.
    ///
    /// The gate is released between round-trips. `NotSettled` replies skip a cycle.
    pub fn read_until_stable(&self, deadline: Duration) -> Result<WeightReading, BalanceError> {
        let mut agg = StabilityAggregator::new(self.cfg.stability);
        let start = self.clock.now();
        loop {
            if self.clock.now().saturating_duration_since(start) >= deadline {
                return Err(BalanceError::Timeout);
            }
            match self.read_immediate() {
                Ok(r) => {
                    if agg.push(&r) == Verdict::Stable {
                        return Ok(r);
                    }
                }
                Err(BalanceError::NotSettled) => {}
                Err(e) => return Err(e),
            }
            self.clock.sleep(self.cfg.poll_interval);
        }
    }
}

/// The process-wide device slot: either a bridge, or manual-entry mode.
#[derive(Debug, Clone)]
pub enum DeviceHandle {
    Absent,
    Present(Arc<InstrumentBridge>),
}

impl DeviceHandle {
    /// Build the handle and make the single startup connection attempt.
    ///
    /// A failed attempt is logged and leaves the bridge present but disconnected;
    /// startup never fails or blocks beyond the connect timeout.
    pub fn open(connector: Box<dyn Connector>, cfg: BridgeCfg, clock: SharedClock) -> Self {
        let bridge = Arc::new(InstrumentBridge::new(connector, cfg, clock));
        if let Err(e) = bridge.connect() {
            warn!(endpoint = %bridge.endpoint(), error = %e, "balance unavailable at startup");
        }
        DeviceHandle::Present(bridge)
    }

    /// `Absent` when the config names no device; otherwise `open` with the connector
    /// built by `make_connector`, which is not called in manual-entry mode.
    pub fn from_config(
        cfg: &balance_config::Config,
        make_connector: impl FnOnce(&balance_config::Device) -> Box<dyn Connector>,
        clock: SharedClock,
    ) -> Self {
        if !cfg.device.is_configured() {
            info!("no balance configured; manual entry mode");
            return DeviceHandle::Absent;
        }
        Self::open(make_connector(&cfg.device), BridgeCfg::from(cfg), clock)
    }

    pub fn bridge(&self) -> Option<&Arc<InstrumentBridge>> {
        match self {
            DeviceHandle::Absent => None,
            DeviceHandle::Present(b) => Some(b),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, DeviceHandle::Present(_))
    }

    /// Disconnect at process shutdown.
    pub fn shutdown(&self) {
        if let DeviceHandle::Present(b) = self {
            b.disconnect();
        }
    }
}
