//! In-process balance that speaks the same line protocol as the real instrument.
//!
//! The displayed value halves its distance to the applied load on every immediate
//! request and reports `S` once it is within `settle_band_ug` of the load.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use balance_traits::{BoxError, Connector, LineTransport};
use tracing::trace;

use crate::error::HwError;
use crate::util::format_ug_as_mg;

/// Default capacity of the simulated balance (220 g).
pub const SIM_CAPACITY_UG: i64 = 220_000_000;

#[derive(Debug)]
struct SimState {
    load_ug: i64,
    display_ug: i64,
    tare_ug: i64,
    settle_band_ug: i64,
    capacity_ug: i64,
    connected: bool,
    refuse_connect: bool,
    commands: Vec<String>,
}

impl SimState {
    fn net(&self, gross: i64) -> i64 {
        gross - self.tare_ug
    }

    fn range_status(&self) -> Option<&'static str> {
        if self.display_ug > self.capacity_ug {
            Some("+")
        } else if self.display_ug < -self.capacity_ug {
            Some("-")
        } else {
            None
        }
    }

    fn weight_line(&self, echo: &str, status: &str) -> String {
        format!(
            "{echo} {status} {:>11} mg",
            format_ug_as_mg(self.net(self.display_ug))
        )
    }

    fn respond(&mut self, cmd: &str) -> Vec<String> {
        self.commands.push(cmd.to_string());
        match cmd {
            "SI" => {
                let gap = self.load_ug - self.display_ug;
                if gap.abs() <= self.settle_band_ug {
                    self.display_ug = self.load_ug;
                } else {
                    self.display_ug += gap / 2;
                }
                if let Some(code) = self.range_status() {
                    return vec![format!("SI {code}")];
                }
                let status = if self.display_ug == self.load_ug { "S" } else { "D" };
                vec![self.weight_line("SI", status)]
            }
            "S" => {
                self.display_ug = self.load_ug;
                if let Some(code) = self.range_status() {
                    return vec![format!("S {code}")];
                }
                vec![self.weight_line("S", "S")]
            }
            "T" => {
                self.display_ug = self.load_ug;
                if let Some(code) = self.range_status() {
                    return vec![format!("T {code}")];
                }
                self.tare_ug = self.display_ug;
                vec![format!("T S {:>11} mg", format_ug_as_mg(self.tare_ug))]
            }
            // abort cancels a pending wait and is not answered
            "@" => Vec::new(),
            _ => vec!["ES".to_string()],
        }
    }
}

/// Shared handle to a simulated balance. Clones observe and drive the same device.
#[derive(Debug, Clone)]
pub struct SimulatedBalance {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedBalance {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBalance {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                load_ug: 0,
                display_ug: 0,
                tare_ug: 0,
                settle_band_ug: 100,
                capacity_ug: SIM_CAPACITY_UG,
                connected: true,
                refuse_connect: false,
                commands: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panic while holding the lock only poisons test state; keep serving.
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Place a load (in micrograms) on the pan.
    pub fn set_load_ug(&self, ug: i64) {
        self.lock().load_ug = ug;
    }

    /// Distance from the load within which the display snaps and reports stable.
    pub fn set_settle_band_ug(&self, ug: i64) {
        self.lock().settle_band_ug = ug.max(0);
    }

    /// Simulate the cable being pulled (`false`) or replugged (`true`).
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
    }

    /// Make subsequent connection attempts fail as if the port were closed.
    pub fn set_refuse_connect(&self, refuse: bool) {
        self.lock().refuse_connect = refuse;
    }

    /// Every command token received so far, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn connector(&self) -> SimulatedConnector {
        SimulatedConnector { sim: self.clone() }
    }
}

/// `Connector` producing transports bound to one `SimulatedBalance`.
#[derive(Debug, Clone)]
pub struct SimulatedConnector {
    sim: SimulatedBalance,
}

impl Connector for SimulatedConnector {
    fn connect(&self, _timeout: Duration) -> Result<Box<dyn LineTransport>, BoxError> {
        let st = self.sim.lock();
        if st.refuse_connect || !st.connected {
            return Err(Box::new(HwError::Refused(self.describe())));
        }
        drop(st);
        Ok(Box::new(SimulatedTransport {
            sim: self.sim.clone(),
            outbox: VecDeque::new(),
        }))
    }

    fn describe(&self) -> String {
        "simulated".to_string()
    }
}

struct SimulatedTransport {
    sim: SimulatedBalance,
    outbox: VecDeque<String>,
}

impl LineTransport for SimulatedTransport {
    fn write_line(&mut self, line: &str) -> Result<(), BoxError> {
        let mut st = self.sim.lock();
        if !st.connected {
            return Err(Box::new(HwError::Closed));
        }
        trace!(line, "sim rx");
        let replies = st.respond(line.trim());
        self.outbox.extend(replies);
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> Result<Option<String>, BoxError> {
        if !self.sim.lock().connected {
            return Err(Box::new(HwError::Closed));
        }
        Ok(self.outbox.pop_front())
    }
}
