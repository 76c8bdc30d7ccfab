//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

pub fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}

#[derive(Parser, Debug)]
#[command(name = "balance", version, about = "Lab balance integration CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/balance.toml")]
    pub config: PathBuf,

    /// Print results, events and errors as JSON, and log as JSON lines
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides [logging] level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Take one reading from the balance
    Read {
        /// Let the balance wait for its own stability (S) instead of reading immediately (SI)
        #[arg(long, action = ArgAction::SetTrue)]
        stable: bool,
    },
    /// Stream readings until the weight settles, then record it
    Weigh {
        #[arg(long)]
        session: String,
        #[arg(long)]
        step: String,
        /// Emit server-sent-events frames instead of plain lines
        #[arg(long, action = ArgAction::SetTrue)]
        sse: bool,
    },
    /// Zero the balance
    Tare,
    /// Record a manually entered weight
    Record {
        #[arg(long)]
        session: String,
        #[arg(long)]
        step: String,
        /// Exact decimal value, e.g. 100.05
        #[arg(long, value_name = "DECIMAL", allow_hyphen_values = true)]
        weight: String,
        /// Unit of --weight: kg, g, mg or ug
        #[arg(long, default_value = "mg")]
        unit: String,
    },
    /// Current measurement of every step in a session
    Current {
        #[arg(long)]
        session: String,
    },
    /// Full audit trail of one step, oldest first
    History {
        #[arg(long)]
        session: String,
        #[arg(long)]
        step: String,
    },
    /// List sessions present in the ledger
    Sessions,
    /// Write a session's audit trail as CSV
    Export {
        #[arg(long)]
        session: String,
        #[arg(long, value_name = "FILE")]
        out: PathBuf,
    },
    /// Quick check: config, ledger, and one reading if a balance is configured
    SelfCheck,
    /// Health check for operational monitoring
    Health,
}
