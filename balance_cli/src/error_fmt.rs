//! Human-readable error descriptions and structured JSON error formatting.

use std::fmt;

use balance_core::{BalanceError, ErrorKind};

/// A weighing attempt that ended on an `error` event.
#[derive(Debug)]
pub struct AttemptError {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for AttemptError {}

fn error_kind(err: &eyre::Report) -> Option<ErrorKind> {
    if let Some(be) = err.downcast_ref::<BalanceError>() {
        return Some(be.kind());
    }
    err.downcast_ref::<AttemptError>().map(|a| a.kind)
}

fn explain(kind: ErrorKind, detail: &str) -> String {
    match kind {
        ErrorKind::Connection => format!(
            "What happened: Could not talk to the balance ({detail}).\nLikely causes: Balance off or unplugged, wrong [device] host/port, or the link dropped mid-command.\nHow to fix: Check power and network, verify host/port in the config, then rerun. The link is never re-established silently."
        ),
        ErrorKind::Timeout => "What happened: The weight did not settle before the deadline.\nLikely causes: Drafts, vibration, a sample still changing mass, or a deadline too short.\nHow to fix: Close the draft shield and rerun; raise stream.deadline_ms if the sample is slow to settle.".to_string(),
        ErrorKind::Parse => format!(
            "What happened: The balance sent a line that could not be understood ({detail}).\nLikely causes: Wrong device on this port, a non-standard output format, or line noise.\nHow to fix: Check the balance's interface settings; rerun with --log-level=debug to see the raw line."
        ),
        ErrorKind::Overload => "What happened: The load is above the balance's capacity.\nLikely causes: Sample or container too heavy.\nHow to fix: Remove load from the pan and use a smaller container.".to_string(),
        ErrorKind::Underload => "What happened: The balance reads below its zero range.\nLikely causes: Pan removed or tare taken with a heavier container.\nHow to fix: Seat the pan, clear it, and tare again.".to_string(),
        ErrorKind::Rejected => format!(
            "What happened: The balance rejected the command ({detail}).\nLikely causes: The device does not support this command or is in a menu.\nHow to fix: Return the balance to weighing mode and rerun."
        ),
        ErrorKind::NotSettled => "What happened: The balance was busy and did not report a value.\nLikely causes: The reading was still moving.\nHow to fix: Wait a moment and rerun, or use `weigh` to poll until stable.".to_string(),
        ErrorKind::NotConfigured => "What happened: No balance is configured.\nLikely causes: [device] host is not set (manual entry mode).\nHow to fix: Set [device] host (or simulate = true), or enter the value with `record`.".to_string(),
        ErrorKind::Ledger => format!(
            "What happened: The measurement ledger could not be read or written ({detail}).\nLikely causes: Unwritable ledger path, a locked database, or blank session/step names.\nHow to fix: Check [ledger] path and permissions, then rerun."
        ),
        ErrorKind::Config => format!(
            "What happened: Invalid configuration ({detail}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
        ),
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(kind) = error_kind(err) {
        return explain(kind, &err.to_string());
    }

    // String-based heuristics for errors coming from config or ledger setup
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.starts_with("read config") {
        return format!(
            "What happened: Could not read the config file.\nLikely causes: Wrong --config path.\nHow to fix: Pass --config <FILE> pointing at an existing TOML file. Original: {msg}"
        );
    }
    if lower.starts_with("parse config") || lower.contains("must be") {
        return explain(ErrorKind::Config, &msg);
    }
    if lower.contains("ledger") {
        return explain(ErrorKind::Ledger, &msg);
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error kind; anything untyped returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match error_kind(err) {
        Some(ErrorKind::Connection) => 3,
        Some(ErrorKind::Timeout) => 4,
        Some(ErrorKind::Parse) => 5,
        Some(ErrorKind::Overload | ErrorKind::Underload) => 6,
        Some(ErrorKind::Rejected) => 7,
        Some(ErrorKind::NotSettled) => 8,
        Some(ErrorKind::NotConfigured) => 9,
        Some(ErrorKind::Ledger) => 10,
        Some(ErrorKind::Config) => 11,
        None => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let reason = error_kind(err).map_or("error", ErrorKind::as_str);
    json!({ "reason": reason, "detail": err.to_string(), "message": humanize(err) }).to_string()
}
