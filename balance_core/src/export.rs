//! CSV export of a session's full audit trail.

use std::io::Write;
use std::path::Path;

use eyre::WrapErr;

use crate::atomic::write_atomic;
use crate::error::Result;
use crate::ledger::Ledger;

const HEADER: [&str; 8] = [
    "id",
    "step_key",
    "weight_mg",
    "unit",
    "source",
    "is_current",
    "recorded_at",
    "raw",
];

/// Write every record of `session_id` (superseded ones included) as CSV.
/// Returns the number of rows written.
pub fn write_session_csv<W: Write>(ledger: &Ledger, session_id: &str, out: W) -> Result<usize> {
    let rows = ledger.all_for(session_id)?;
    let mut w = csv::Writer::from_writer(out);
    w.write_record(HEADER)?;
    for m in &rows {
        w.write_record([
            m.id.to_string(),
            m.step_key.clone(),
            m.weight.to_string(),
            m.unit.to_string(),
            m.source.as_str().to_string(),
            u8::from(m.is_current).to_string(),
            m.recorded_at.to_rfc3339(),
            m.raw.clone().unwrap_or_default(),
        ])?;
    }
    w.flush()?;
    Ok(rows.len())
}

/// Export to `path`, replacing it atomically.
pub fn export_session(ledger: &Ledger, session_id: &str, path: &Path) -> Result<usize> {
    let mut buf = Vec::new();
    let n = write_session_csv(ledger, session_id, &mut buf)?;
    write_atomic(path, &buf).wrap_err_with(|| format!("write export {}", path.display()))?;
    tracing::info!(session = session_id, rows = n, path = %path.display(), "session exported");
    Ok(n)
}
