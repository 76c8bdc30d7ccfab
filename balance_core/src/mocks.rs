//! Test and helper mocks for balance_core.
//!
//! `ScriptedBalance` replays canned response lines and records everything that crosses
//! the wire, so tests can assert on exact command sequencing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use balance_traits::{BoxError, Connector, LineTransport};

/// One line as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    Tx(String),
    Rx(String),
}

#[derive(Debug, Clone)]
enum Reply {
    Line(String),
    Silent,
    Close,
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Reply>,
    fallback: Option<String>,
    chatter: Option<String>,
    latency: Duration,
    refuse_connect: bool,
    connects: usize,
    wire: Vec<WireEvent>,
    in_flight: bool,
    overlaps: usize,
}

/// A balance that answers every command with the next scripted reply.
///
/// When the script runs dry the fallback line is used, or silence if none is set.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBalance {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedBalance {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_line(&self, line: impl Into<String>) {
        self.lock().replies.push_back(Reply::Line(line.into()));
    }

    /// The next command gets no reply at all.
    pub fn push_silence(&self) {
        self.lock().replies.push_back(Reply::Silent);
    }

    /// The next command finds the peer gone.
    pub fn push_close(&self) {
        self.lock().replies.push_back(Reply::Close);
    }

    pub fn set_fallback_line(&self, line: impl Into<String>) {
        self.lock().fallback = Some(line.into());
    }

    /// Unsolicited line the device keeps sending whenever nothing else is queued.
    pub fn set_chatter(&self, line: impl Into<String>) {
        self.lock().chatter = Some(line.into());
    }

    /// Real time spent before each reply becomes readable.
    pub fn set_latency(&self, d: Duration) {
        self.lock().latency = d;
    }

    pub fn set_refuse_connect(&self, refuse: bool) {
        self.lock().refuse_connect = refuse;
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub fn wire(&self) -> Vec<WireEvent> {
        self.lock().wire.clone()
    }

    /// Commands sent, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .wire
            .iter()
            .filter_map(|e| match e {
                WireEvent::Tx(c) => Some(c.clone()),
                WireEvent::Rx(_) => None,
            })
            .collect()
    }

    /// Number of times a command was written while another was still unanswered.
    pub fn overlaps(&self) -> usize {
        self.lock().overlaps
    }

    pub fn connector(&self) -> ScriptedConnector {
        ScriptedConnector {
            balance: self.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedConnector {
    balance: ScriptedBalance,
}

impl Connector for ScriptedConnector {
    fn connect(&self, _timeout: Duration) -> Result<Box<dyn LineTransport>, BoxError> {
        let mut s = self.balance.lock();
        if s.refuse_connect {
            return Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "scripted balance refused connection",
            )));
        }
        s.connects += 1;
        s.in_flight = false;
        drop(s);
        Ok(Box::new(ScriptedTransport {
            balance: self.balance.clone(),
            outbox: VecDeque::new(),
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

struct ScriptedTransport {
    balance: ScriptedBalance,
    outbox: VecDeque<Reply>,
    closed: bool,
}

impl LineTransport for ScriptedTransport {
    fn write_line(&mut self, line: &str) -> Result<(), BoxError> {
        if self.closed {
            return Err(Box::new(std::io::Error::from(
                std::io::ErrorKind::NotConnected,
            )));
        }
        let mut s = self.balance.lock();
        if s.in_flight {
            s.overlaps += 1;
        }
        // abort expects no reply, so it never leaves a command outstanding
        s.in_flight = line != "@";
        s.wire.push(WireEvent::Tx(line.to_string()));
        let reply = match s.replies.pop_front() {
            Some(r) => Some(r),
            // an unscripted abort gets no reply
            None if line == "@" => None,
            None => Some(s.fallback.clone().map_or(Reply::Silent, Reply::Line)),
        };
        self.outbox.extend(reply);
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> Result<Option<String>, BoxError> {
        if self.closed {
            return Err(Box::new(std::io::Error::from(
                std::io::ErrorKind::NotConnected,
            )));
        }
        let latency = self.balance.lock().latency;
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        let mut s = self.balance.lock();
        match self.outbox.pop_front() {
            Some(Reply::Line(line)) => {
                s.in_flight = false;
                s.wire.push(WireEvent::Rx(line.clone()));
                Ok(Some(line))
            }
            Some(Reply::Close) => {
                s.in_flight = false;
                self.closed = true;
                Err(Box::new(std::io::Error::from(
                    std::io::ErrorKind::ConnectionReset,
                )))
            }
            Some(Reply::Silent) => Ok(None),
            None => match s.chatter.clone() {
                Some(line) => {
                    s.wire.push(WireEvent::Rx(line.clone()));
                    Ok(Some(line))
                }
                None => Ok(None),
            },
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.outbox.clear();
        self.balance.lock().in_flight = false;
    }
}
