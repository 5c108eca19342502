//! Connection handling, schema, and row mapping.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use meetbridge_core::error::{BridgeError, Result};
use meetbridge_core::types::{
    ActionItem, DeliveryStatus, RecordSource, RecordStatus, RetryEntry, RetryKind, SourceRecord,
};
use rusqlite::{Connection, Row};

/// Durable store for source records, action items, and retry entries.
pub struct RecordStore {
    conn: Mutex<Connection>,
}

impl RecordStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| db_err("open", e))?;

        // WAL lets the dashboard read while the pipeline writes
        match enable_wal(&conn) {
            Ok(mode) if mode.eq_ignore_ascii_case("wal") => {}
            Ok(mode) => tracing::warn!("⚠️ SQLite kept journal_mode={mode} for {}; readers may block", path.display()),
            Err(e) => tracing::warn!("⚠️ Could not enable WAL for {}: {e}", path.display()),
        }

        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        tracing::debug!("💾 Record store opened: {}", path.display());
        Ok(store)
    }

    /// In-memory store, mostly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| db_err("open", e))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS source_records (
                id TEXT PRIMARY KEY,
                external_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT 'cache',     -- 'cache', 'upload'
                meeting_date TEXT,
                participants TEXT NOT NULL DEFAULT '[]',  -- JSON array
                status TEXT NOT NULL DEFAULT 'captured',
                last_error TEXT,
                first_seen_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_records_status ON source_records(status);
            CREATE INDEX IF NOT EXISTS idx_records_first_seen ON source_records(first_seen_at);

            CREATE TABLE IF NOT EXISTS action_items (
                id TEXT PRIMARY KEY,
                record_id TEXT NOT NULL REFERENCES source_records(id),
                position INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                context TEXT NOT NULL DEFAULT '',
                assignee TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                in_flight INTEGER NOT NULL DEFAULT 0,
                remote_id TEXT,
                remote_url TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_items_record ON action_items(record_id);
            CREATE INDEX IF NOT EXISTS idx_items_status ON action_items(status);

            CREATE TABLE IF NOT EXISTS retry_entries (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,                       -- 'extraction', 'delivery'
                target_id TEXT NOT NULL,
                attempt_count INTEGER NOT NULL,
                next_eligible_at TEXT NOT NULL,
                last_error TEXT NOT NULL DEFAULT '',
                in_flight INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (kind, target_id)
            );
            CREATE INDEX IF NOT EXISTS idx_retry_due ON retry_entries(next_eligible_at);
            ",
        )
        .map_err(|e| db_err("migration", e))
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| BridgeError::Database(format!("lock poisoned: {e}")))
    }
}

pub(crate) fn db_err(what: &str, e: rusqlite::Error) -> BridgeError {
    BridgeError::Database(format!("{what}: {e}"))
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Fixed-width UTC timestamps: text order equals time order.
pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Ask for WAL and return the journal mode SQLite actually settled on.
fn enable_wal(conn: &Connection) -> rusqlite::Result<String> {
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
}

fn bad_value(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unexpected value '{value}'").into(),
    )
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| bad_value(idx, &raw))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|_| bad_value(idx, &raw)),
        None => Ok(None),
    }
}

pub(crate) const RECORD_COLUMNS: &str = "id, external_id, title, content, source, meeting_date, \
     participants, status, last_error, first_seen_at, updated_at";

pub(crate) fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SourceRecord> {
    let source: String = row.get(4)?;
    let participants: String = row.get(6)?;
    let status: String = row.get(7)?;
    Ok(SourceRecord {
        id: row.get(0)?,
        external_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        source: RecordSource::parse(&source).ok_or_else(|| bad_value(4, &source))?,
        meeting_date: opt_ts_col(row, 5)?,
        participants: serde_json::from_str(&participants).map_err(|_| bad_value(6, &participants))?,
        status: RecordStatus::parse(&status).ok_or_else(|| bad_value(7, &status))?,
        last_error: row.get(8)?,
        first_seen_at: ts_col(row, 9)?,
        updated_at: ts_col(row, 10)?,
    })
}

pub(crate) const ITEM_COLUMNS: &str = "id, record_id, position, title, description, context, \
     assignee, status, remote_id, remote_url, last_error, created_at, updated_at";

pub(crate) fn item_from_row(row: &Row<'_>) -> rusqlite::Result<ActionItem> {
    let status: String = row.get(7)?;
    Ok(ActionItem {
        id: row.get(0)?,
        record_id: row.get(1)?,
        position: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        context: row.get(5)?,
        assignee: row.get(6)?,
        status: DeliveryStatus::parse(&status).ok_or_else(|| bad_value(7, &status))?,
        remote_id: row.get(8)?,
        remote_url: row.get(9)?,
        last_error: row.get(10)?,
        created_at: ts_col(row, 11)?,
        updated_at: ts_col(row, 12)?,
    })
}

pub(crate) const RETRY_COLUMNS: &str = "id, kind, target_id, attempt_count, next_eligible_at, \
     last_error, in_flight, created_at, updated_at";

pub(crate) fn retry_from_row(row: &Row<'_>) -> rusqlite::Result<RetryEntry> {
    let kind: String = row.get(1)?;
    Ok(RetryEntry {
        id: row.get(0)?,
        kind: RetryKind::parse(&kind).ok_or_else(|| bad_value(1, &kind))?,
        target_id: row.get(2)?,
        attempt_count: row.get(3)?,
        next_eligible_at: ts_col(row, 4)?,
        last_error: row.get(5)?,
        in_flight: row.get::<_, i32>(6)? != 0,
        created_at: ts_col(row, 7)?,
        updated_at: ts_col(row, 8)?,
    })
}
