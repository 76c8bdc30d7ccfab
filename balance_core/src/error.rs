use serde::Serialize;
use thiserror::Error;

use crate::protocol::ParseError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BalanceError {
    #[error("balance connection error: {0}")]
    Connection(String),
    #[error("no stable reading before the deadline")]
    Timeout,
    #[error("malformed balance response: {0}")]
    Parse(#[from] ParseError),
    #[error("balance overload (load above capacity)")]
    Overload,
    #[error("balance underload (load below zero range)")]
    Underload,
    #[error("balance rejected the command: {0}")]
    Rejected(String),
    #[error("balance busy: reading not settled")]
    NotSettled,
    #[error("no balance configured (manual entry mode)")]
    NotConfigured,
    #[error("measurement ledger error: {0}")]
    Ledger(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl BalanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BalanceError::Connection(_) => ErrorKind::Connection,
            BalanceError::Timeout => ErrorKind::Timeout,
            BalanceError::Parse(_) => ErrorKind::Parse,
            BalanceError::Overload => ErrorKind::Overload,
            BalanceError::Underload => ErrorKind::Underload,
            BalanceError::Rejected(_) => ErrorKind::Rejected,
            BalanceError::NotSettled => ErrorKind::NotSettled,
            BalanceError::NotConfigured => ErrorKind::NotConfigured,
            BalanceError::Ledger(_) => ErrorKind::Ledger,
            BalanceError::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<rusqlite::Error> for BalanceError {
    fn from(e: rusqlite::Error) -> Self {
        BalanceError::Ledger(e.to_string())
    }
}

/// Discriminant carried on `error` stream events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Timeout,
    Parse,
    Overload,
    Underload,
    Rejected,
    NotSettled,
    NotConfigured,
    Ledger,
    Config,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Parse => "parse",
            ErrorKind::Overload => "overload",
            ErrorKind::Underload => "underload",
            ErrorKind::Rejected => "rejected",
            ErrorKind::NotSettled => "not_settled",
            ErrorKind::NotConfigured => "not_configured",
            ErrorKind::Ledger => "ledger",
            ErrorKind::Config => "config",
        }
    }
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
