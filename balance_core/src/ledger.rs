//! Measurement Ledger: append-only record of accepted weights per (session, step).
//!
//! Re-measuring a step supersedes the previous record instead of changing it: one
//! IMMEDIATE transaction flips the old row's `is_current` to 0 and inserts the new one.
//! A partial unique index makes "at most one current row per slot" a storage-level
//! guarantee. No row is ever updated beyond that flag, and none is deleted.
//!
//! All access goes through a single `Mutex<Connection>`, so a reader can only see the
//! state before or after a supersession, never the middle of one.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use eyre::WrapErr;
use rusqlite::{Connection, Row, TransactionBehavior, params};
use serde::Serialize;

use crate::error::{BalanceError, Result};
use crate::mass::{Milligrams, Unit};
use crate::protocol::WeightReading;

/// Bumped when `SCHEMA_SQL` changes shape; stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS measurements (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id  TEXT    NOT NULL,
    step_key    TEXT    NOT NULL,
    weight_ug   INTEGER NOT NULL,
    unit        TEXT    NOT NULL,
    source      TEXT    NOT NULL CHECK (source IN ('instrument', 'manual')),
    raw         TEXT,
    is_current  INTEGER NOT NULL CHECK (is_current IN (0, 1)),
    recorded_at TEXT    NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS measurements_one_current
    ON measurements (session_id, step_key) WHERE is_current = 1;
CREATE INDEX IF NOT EXISTS measurements_slot
    ON measurements (session_id, step_key, recorded_at);
"#;

const SELECT_COLUMNS: &str =
    "id, session_id, step_key, weight_ug, unit, source, raw, is_current, recorded_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementSource {
    Instrument,
    Manual,
}

impl MeasurementSource {
    pub fn as_str(self) -> &'static str {
        match self {
            MeasurementSource::Instrument => "instrument",
            MeasurementSource::Manual => "manual",
        }
    }
}

impl FromStr for MeasurementSource {
    type Err = BalanceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "instrument" => Ok(MeasurementSource::Instrument),
            "manual" => Ok(MeasurementSource::Manual),
            other => Err(BalanceError::Ledger(format!("unknown source {other:?}"))),
        }
    }
}

/// One persisted row.
///
/// `weight` is always canonical milligrams; `unit` is the unit the value was
/// originally reported or typed in, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Measurement {
    pub id: i64,
    pub session_id: String,
    pub step_key: String,
    pub weight: Milligrams,
    pub unit: Unit,
    pub source: MeasurementSource,
    pub raw: Option<String>,
    pub is_current: bool,
    pub recorded_at: DateTime<Utc>,
}

impl Measurement {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let text_err = |idx: usize, msg: String| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(BalanceError::Ledger(msg)),
            )
        };
        let unit: String = row.get(4)?;
        let source: String = row.get(5)?;
        let recorded_at: String = row.get(8)?;
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            step_key: row.get(2)?,
            weight: Milligrams::from_ug(row.get(3)?),
            unit: unit.parse().map_err(|e| text_err(4, format!("{e}")))?,
            source: source.parse().map_err(|e| text_err(5, format!("{e}")))?,
            raw: row.get(6)?,
            is_current: row.get::<_, i64>(7)? == 1,
            recorded_at: DateTime::parse_from_rfc3339(&recorded_at)
                .map_err(|e| text_err(8, e.to_string()))?
                .with_timezone(&Utc),
        })
    }
}

pub struct Ledger {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open (creating if needed) the ledger database at `path`, in WAL mode.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .wrap_err_with(|| format!("create ledger directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .wrap_err_with(|| format!("open ledger at {}", path.display()))?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))
            .wrap_err("enable WAL journal")?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(mode = %mode, "ledger database did not switch to WAL");
        }
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .wrap_err("set busy timeout")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().wrap_err("open in-memory ledger")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .wrap_err("read schema version")?;
        if version > SCHEMA_VERSION {
            eyre::bail!(
                "ledger schema version {version} is newer than supported {SCHEMA_VERSION}"
            );
        }
        conn.execute_batch(SCHEMA_SQL)
            .wrap_err("apply ledger schema")?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .wrap_err("write schema version")?;
        tracing::debug!(version = SCHEMA_VERSION, "ledger initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // rusqlite rolls back an unfinished transaction on drop, so the connection
        // behind a poisoned lock is still consistent.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Supersede any current record for (session, step) and insert `weight` as current.
    pub fn record(
        &self,
        session_id: &str,
        step_key: &str,
        weight: Milligrams,
        unit: Unit,
        source: MeasurementSource,
        raw: Option<&str>,
    ) -> std::result::Result<Measurement, BalanceError> {
        if session_id.trim().is_empty() || step_key.trim().is_empty() {
            return Err(BalanceError::Ledger(
                "session_id and step_key must not be empty".into(),
            ));
        }
        // stored with microsecond precision; keep the returned value identical
        let recorded_at = Utc::now().trunc_subsecs(6);
        let stamp = recorded_at.to_rfc3339_opts(SecondsFormat::Micros, true);

        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let superseded = tx.execute(
            "UPDATE measurements SET is_current = 0
             WHERE session_id = ?1 AND step_key = ?2 AND is_current = 1",
            params![session_id, step_key],
        )?;
        tx.execute(
            "INSERT INTO measurements
                (session_id, step_key, weight_ug, unit, source, raw, is_current, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
            params![
                session_id,
                step_key,
                weight.as_ug(),
                unit.as_str(),
                source.as_str(),
                raw,
                stamp
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::info!(
            session = session_id,
            step = step_key,
            weight_mg = %weight,
            source = source.as_str(),
            superseded,
            "measurement recorded"
        );
        Ok(Measurement {
            id,
            session_id: session_id.to_string(),
            step_key: step_key.to_string(),
            weight,
            unit,
            source,
            raw: raw.map(str::to_string),
            is_current: true,
            recorded_at,
        })
    }

    /// Record an instrument reading, keeping its raw wire line.
    pub fn record_reading(
        &self,
        session_id: &str,
        step_key: &str,
        reading: &WeightReading,
    ) -> std::result::Result<Measurement, BalanceError> {
        self.record(
            session_id,
            step_key,
            reading.value(),
            reading.reported_unit(),
            MeasurementSource::Instrument,
            Some(reading.raw()),
        )
    }

    /// Current measurement of every step in `session_id`, ordered by step key.
    pub fn current_for(
        &self,
        session_id: &str,
    ) -> std::result::Result<Vec<Measurement>, BalanceError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM measurements
             WHERE session_id = ?1 AND is_current = 1
             ORDER BY step_key"
        ))?;
        let rows = stmt.query_map(params![session_id], Measurement::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Every record for one step, oldest first.
    pub fn history_for(
        &self,
        session_id: &str,
        step_key: &str,
    ) -> std::result::Result<Vec<Measurement>, BalanceError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM measurements
             WHERE session_id = ?1 AND step_key = ?2
             ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![session_id, step_key], Measurement::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Every record in a session, oldest first. Used for export.
    pub fn all_for(&self, session_id: &str) -> std::result::Result<Vec<Measurement>, BalanceError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM measurements WHERE session_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![session_id], Measurement::from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Distinct session ids, sorted.
    pub fn sessions(&self) -> std::result::Result<Vec<String>, BalanceError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT session_id FROM measurements ORDER BY session_id")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mg(text: &str) -> Milligrams {
        text.parse().unwrap()
    }

    #[test]
    fn record_twice_keeps_one_current_row() {
        let l = Ledger::open_in_memory().unwrap();
        l.record(
            "s1",
            "tare",
            mg("100.05"),
            Unit::Milligram,
            MeasurementSource::Instrument,
            Some("SI S 100.05 mg"),
        )
        .unwrap();
        l.record(
            "s1",
            "tare",
            mg("100.07"),
            Unit::Milligram,
            MeasurementSource::Manual,
            None,
        )
        .unwrap();

        let current = l.current_for("s1").unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].weight, mg("100.07"));
        assert_eq!(current[0].source, MeasurementSource::Manual);

        let history = l.history_for("s1", "tare").unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_current);
        assert_eq!(history[0].raw.as_deref(), Some("SI S 100.05 mg"));
        assert!(history[1].is_current);
    }

    #[test]
    fn slots_are_independent() {
        let l = Ledger::open_in_memory().unwrap();
        for (session, step, weight) in [("s1", "a", "1"), ("s1", "b", "2"), ("s2", "a", "3")] {
            l.record(session, step, mg(weight), Unit::Gram, MeasurementSource::Manual, None)
                .unwrap();
        }

        let steps: Vec<_> = l
            .current_for("s1")
            .unwrap()
            .into_iter()
            .map(|m| m.step_key)
            .collect();
        assert_eq!(steps, vec!["a", "b"]);
        assert_eq!(l.sessions().unwrap(), vec!["s1", "s2"]);
        assert_eq!(l.all_for("s1").unwrap().len(), 2);
    }

    #[test]
    fn stored_weight_is_exact() {
        let l = Ledger::open_in_memory().unwrap();
        let w = Milligrams::parse_decimal("0.10005", Unit::Gram).unwrap();
        l.record("s", "x", w, Unit::Gram, MeasurementSource::Instrument, Some("SI S 0.10005 g"))
            .unwrap();
        let m = &l.current_for("s").unwrap()[0];
        assert_eq!(m.weight.to_string(), "100.05");
        assert_eq!(m.unit, Unit::Gram);
    }

    #[test]
    fn storage_rejects_a_second_current_row() {
        let l = Ledger::open_in_memory().unwrap();
        l.record("s", "x", mg("1"), Unit::Milligram, MeasurementSource::Manual, None).unwrap();
        let conn = l.lock();
        let err = conn.execute(
            "INSERT INTO measurements
                (session_id, step_key, weight_ug, unit, source, raw, is_current, recorded_at)
             VALUES ('s', 'x', 1, 'mg', 'manual', NULL, 1, '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(err.is_err());
    }

    #[test]
    fn blank_keys_are_rejected() {
        let l = Ledger::open_in_memory().unwrap();
        let err = l
            .record(" ", "x", mg("1"), Unit::Milligram, MeasurementSource::Manual, None)
            .unwrap_err();
        assert!(matches!(err, BalanceError::Ledger(_)));
    }

    #[test]
    fn reopening_a_file_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.sqlite3");
        {
            let l = Ledger::open(&path).unwrap();
            l.record("s", "x", mg("5"), Unit::Milligram, MeasurementSource::Manual, None).unwrap();
        }
        let l = Ledger::open(&path).unwrap();
        assert_eq!(l.current_for("s").unwrap().len(), 1);
    }
}
