//! Startup recovery after an unclean stop.

use chrono::{DateTime, Utc};
use meetbridge_core::error::Result;
use meetbridge_core::policy::RetryPolicy;
use meetbridge_core::types::RetryKind;
use rusqlite::params;

use crate::db::{RecordStore, db_err, ts};
use crate::retries::{insert_first_attempt, retry_by_target};

const INTERRUPTED: &str = "interrupted by restart";

/// What [`RecordStore::recover_interrupted`] repaired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records stuck in `extracting` with no retry entry, now captured with a fresh entry.
    pub requeued_records: Vec<String>,
    /// Records stuck in `extracting` during a scheduled retry, put back to captured.
    pub released_records: usize,
    /// Items that were mid-delivery, now scheduled for another attempt.
    pub requeued_items: Vec<String>,
    /// Retry entries that were claimed when the process died.
    pub released_entries: usize,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.requeued_records.is_empty()
            && self.released_records == 0
            && self.requeued_items.is_empty()
            && self.released_entries == 0
    }
}

impl RecordStore {
    /// Undo work that was in flight when the process stopped.
    ///
    /// Must run before any pipeline task starts. Every interrupted target
    /// ends up with exactly one unclaimed retry entry so progress resumes.
    pub fn recover_interrupted(&self, policy: &RetryPolicy, now: DateTime<Utc>) -> Result<RecoveryReport> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| db_err("begin", e))?;
        let mut report = RecoveryReport::default();

        // Extraction calls that never returned
        let stuck: Vec<String> = {
            let mut stmt = tx
                .prepare("SELECT id FROM source_records WHERE status = 'extracting'")
                .map_err(|e| db_err("scan extracting", e))?;
            let rows = stmt
                .query_map([], |r| r.get::<_, String>(0))
                .map_err(|e| db_err("scan extracting", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| db_err("scan extracting", e))?
        };
        for record_id in stuck {
            if retry_by_target(&tx, RetryKind::Extraction, &record_id)?.is_none() {
                insert_first_attempt(&tx, RetryKind::Extraction, &record_id, INTERRUPTED, policy, now)?;
                report.requeued_records.push(record_id.clone());
            } else {
                report.released_records += 1;
            }
            tx.execute(
                "UPDATE source_records SET status = 'captured', updated_at = ?2 WHERE id = ?1",
                params![record_id, ts(now)],
            )
            .map_err(|e| db_err("reset record", e))?;
        }

        // Delivery calls that never returned: the remote side may or may not have the task
        let in_flight: Vec<String> = {
            let mut stmt = tx
                .prepare("SELECT id FROM action_items WHERE in_flight = 1")
                .map_err(|e| db_err("scan items", e))?;
            let rows = stmt
                .query_map([], |r| r.get::<_, String>(0))
                .map_err(|e| db_err("scan items", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| db_err("scan items", e))?
        };
        for item_id in in_flight {
            if retry_by_target(&tx, RetryKind::Delivery, &item_id)?.is_none() {
                insert_first_attempt(&tx, RetryKind::Delivery, &item_id, INTERRUPTED, policy, now)?;
                report.requeued_items.push(item_id.clone());
            }
            tx.execute(
                "UPDATE action_items SET in_flight = 0, updated_at = ?2 WHERE id = ?1",
                params![item_id, ts(now)],
            )
            .map_err(|e| db_err("reset item", e))?;
        }

        report.released_entries = tx
            .execute("UPDATE retry_entries SET in_flight = 0 WHERE in_flight = 1", [])
            .map_err(|e| db_err("release retries", e))?;

        tx.commit().map_err(|e| db_err("commit", e))?;

        if !report.is_clean() {
            tracing::info!(
                "🩹 Recovered after restart: {} record(s) requeued, {} released, {} item(s) requeued, {} retry claim(s) released",
                report.requeued_records.len(),
                report.released_records,
                report.requeued_items.len(),
                report.released_entries
            );
        }
        Ok(report)
    }
}
