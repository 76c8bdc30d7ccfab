#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas for the balance integration.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Every section is optional; an empty file is a valid manual-entry setup.
//! - A missing `[device] host` (and `simulate = false`) selects manual-entry mode.
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default TCP port of the balance's line protocol interface.
pub const DEFAULT_PORT: u16 = 4001;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Device {
    /// Balance host name or IP. Absent means manual-entry mode.
    pub host: Option<String>,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Max wait for one response line before the link is declared faulted
    pub response_timeout_ms: u64,
    /// How long to drain stray replies after an abort command
    pub abort_drain_ms: u64,
    /// Use the in-process simulated balance instead of TCP
    pub simulate: bool,
    /// Load placed on the simulated pan, exact decimal milligrams (e.g. "100.05")
    pub simulated_load_mg: Option<String>,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            connect_timeout_ms: 3000,
            response_timeout_ms: 2000,
            abort_drain_ms: 50,
            simulate: false,
            simulated_load_mg: None,
        }
    }
}

impl Device {
    /// True when a device (real or simulated) is configured.
    pub fn is_configured(&self) -> bool {
        self.simulate || self.host.as_deref().is_some_and(|h| !h.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StabilityCfg {
    /// Number of consecutive readings that must agree
    pub window: usize,
    /// Max spread across the window, in milligrams
    pub tolerance_mg: f64,
}

impl Default for StabilityCfg {
    fn default() -> Self {
        Self {
            window: 5,
            tolerance_mg: 0.5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StreamCfg {
    /// Give up on a weighing attempt after this long
    pub deadline_ms: u64,
    /// Pause between immediate-weight polls
    pub poll_interval_ms: u64,
}

impl Default for StreamCfg {
    fn default() -> Self {
        Self {
            deadline_ms: 30_000,
            poll_interval_ms: 200,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LedgerCfg {
    /// SQLite database file holding the measurement ledger
    pub path: PathBuf,
}

impl Default for LedgerCfg {
    fn default() -> Self {
        Self {
            path: PathBuf::from("measurements.sqlite3"),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub device: Device,
    pub stability: StabilityCfg,
    pub stream: StreamCfg,
    pub ledger: LedgerCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse, and validate a config file.
pub fn load_file(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {}: {}", path.display(), e))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {}: {}", path.display(), e))?;
    cfg.validate()?;
    Ok(cfg)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Device
        if let Some(host) = &self.device.host
            && host.trim().is_empty()
        {
            eyre::bail!("device.host must not be blank (omit it for manual-entry mode)");
        }
        if self.device.port == 0 {
            eyre::bail!("device.port must be > 0");
        }
        if self.device.connect_timeout_ms == 0 {
            eyre::bail!("device.connect_timeout_ms must be >= 1");
        }
        if self.device.response_timeout_ms == 0 {
            eyre::bail!("device.response_timeout_ms must be >= 1");
        }
        if self.device.response_timeout_ms > 5 * 60 * 1000 {
            eyre::bail!("device.response_timeout_ms is unreasonably large (>5min)");
        }
        if self.device.abort_drain_ms > 10_000 {
            eyre::bail!("device.abort_drain_ms is unreasonably large (>10s)");
        }
        if let Some(load) = &self.device.simulated_load_mg
            && !is_plain_decimal(load)
        {
            eyre::bail!("device.simulated_load_mg must be a decimal number, got {load:?}");
        }

        // Stability
        if self.stability.window == 0 {
            eyre::bail!("stability.window must be >= 1");
        }
        if self.stability.window > 1000 {
            eyre::bail!("stability.window is unreasonably large (>1000)");
        }
        if !self.stability.tolerance_mg.is_finite() || self.stability.tolerance_mg < 0.0 {
            eyre::bail!("stability.tolerance_mg must be a finite value >= 0.0");
        }

        // Stream
        if self.stream.deadline_ms == 0 {
            eyre::bail!("stream.deadline_ms must be >= 1");
        }
        if self.stream.deadline_ms > 60 * 60 * 1000 {
            eyre::bail!("stream.deadline_ms is unreasonably large (>1h)");
        }
        if self.stream.poll_interval_ms == 0 {
            eyre::bail!("stream.poll_interval_ms must be >= 1");
        }
        if self.stream.poll_interval_ms >= self.stream.deadline_ms {
            eyre::bail!("stream.poll_interval_ms must be < stream.deadline_ms");
        }

        // Ledger
        if self.ledger.path.as_os_str().is_empty() {
            eyre::bail!("ledger.path must not be empty");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}

/// Accepts `[-]digits[.digits]`; full exact parsing happens in the core.
fn is_plain_decimal(s: &str) -> bool {
    let s = s.trim();
    let s = s.strip_prefix('-').unwrap_or(s);
    let (int, frac) = s.split_once('.').unwrap_or((s, ""));
    !int.is_empty()
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.bytes().all(|b| b.is_ascii_digit())
        && !(s.contains('.') && frac.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_means_manual_mode() {
        let cfg = load_toml("").unwrap();
        cfg.validate().unwrap();
        assert!(!cfg.device.is_configured());
        assert_eq!(cfg.stability.window, 5);
        assert_eq!(cfg.stream.deadline_ms, 30_000);
    }

    #[test]
    fn decimal_shape_check() {
        assert!(is_plain_decimal("100.05"));
        assert!(is_plain_decimal("-3"));
        assert!(!is_plain_decimal("1e3"));
        assert!(!is_plain_decimal("12."));
        assert!(!is_plain_decimal(""));
    }
}
