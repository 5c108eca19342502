//! The durable retry queue.

use chrono::{DateTime, Utc};
use meetbridge_core::error::Result;
use meetbridge_core::policy::RetryPolicy;
use meetbridge_core::types::{RetryEntry, RetryKind, RetryOutcome};
use rusqlite::{Connection, OptionalExtension, params};

use crate::db::{RETRY_COLUMNS, RecordStore, db_err, new_id, retry_from_row, ts};

impl RecordStore {
    /// The retry entry for a target, if any.
    pub fn retry_for(&self, kind: RetryKind, target_id: &str) -> Result<Option<RetryEntry>> {
        let conn = self.conn()?;
        retry_by_target(&conn, kind, target_id)
    }

    /// Unclaimed entries due at `now`, oldest-due first.
    pub fn due_retries(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<RetryEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RETRY_COLUMNS} FROM retry_entries
                 WHERE in_flight = 0 AND next_eligible_at <= ?1
                 ORDER BY next_eligible_at ASC, created_at ASC
                 LIMIT ?2"
            ))
            .map_err(|e| db_err("due retries", e))?;
        let rows = stmt
            .query_map(params![ts(now), limit as i64], retry_from_row)
            .map_err(|e| db_err("due retries", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("due retries", e))
    }

    /// Every entry, soonest first.
    pub fn list_retries(&self) -> Result<Vec<RetryEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RETRY_COLUMNS} FROM retry_entries ORDER BY next_eligible_at ASC, created_at ASC"
            ))
            .map_err(|e| db_err("list retries", e))?;
        let rows = stmt
            .query_map([], retry_from_row)
            .map_err(|e| db_err("list retries", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("list retries", e))
    }

    /// Mark an entry in flight. Returns `false` if someone else holds it.
    pub fn claim_retry(&self, entry_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE retry_entries SET in_flight = 1 WHERE id = ?1 AND in_flight = 0",
                params![entry_id],
            )
            .map_err(|e| db_err("claim retry", e))?;
        Ok(changed == 1)
    }

    /// Give a claimed entry back without recording an attempt.
    pub fn release_retry(&self, entry_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE retry_entries SET in_flight = 0 WHERE id = ?1",
            params![entry_id],
        )
        .map_err(|e| db_err("release retry", e))?;
        Ok(())
    }

    /// Drop an entry whose target no longer needs it.
    pub fn delete_retry(&self, entry_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute("DELETE FROM retry_entries WHERE id = ?1", params![entry_id])
            .map_err(|e| db_err("delete retry", e))?;
        Ok(changed == 1)
    }

    pub fn get_retry(&self, entry_id: &str) -> Result<Option<RetryEntry>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {RETRY_COLUMNS} FROM retry_entries WHERE id = ?1"),
            params![entry_id],
            retry_from_row,
        )
        .optional()
        .map_err(|e| db_err("get retry", e))
    }

    /// Make a waiting entry due at `now` without touching its attempt count.
    /// Returns `false` for an unknown entry or one already in flight.
    pub fn retry_now(&self, entry_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE retry_entries SET next_eligible_at = ?2, updated_at = ?2
                 WHERE id = ?1 AND in_flight = 0",
                params![entry_id, ts(now)],
            )
            .map_err(|e| db_err("retry now", e))?;
        Ok(changed == 1)
    }

    /// Drop a waiting entry by hand. An entry in flight is left alone.
    pub fn discard_retry(&self, entry_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "DELETE FROM retry_entries WHERE id = ?1 AND in_flight = 0",
                params![entry_id],
            )
            .map_err(|e| db_err("discard retry", e))?;
        Ok(changed == 1)
    }

    pub fn retry_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        conn.query_row("SELECT COUNT(*) FROM retry_entries", [], |r| r.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(|e| db_err("count retries", e))
    }
}

pub(crate) fn retry_by_target(
    conn: &Connection,
    kind: RetryKind,
    target_id: &str,
) -> Result<Option<RetryEntry>> {
    conn.query_row(
        &format!("SELECT {RETRY_COLUMNS} FROM retry_entries WHERE kind = ?1 AND target_id = ?2"),
        params![kind.as_str(), target_id],
        retry_from_row,
    )
    .optional()
    .map_err(|e| db_err("get retry", e))
}

/// Insert a fresh entry at attempt 1. Used by startup recovery.
pub(crate) fn insert_first_attempt(
    conn: &Connection,
    kind: RetryKind,
    target_id: &str,
    error: &str,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let next = policy.next_eligible(now, 1);
    conn.execute(
        "INSERT INTO retry_entries
         (id, kind, target_id, attempt_count, next_eligible_at, last_error, in_flight,
          created_at, updated_at)
         VALUES (?1, ?2, ?3, 1, ?4, ?5, 0, ?6, ?6)",
        params![new_id(), kind.as_str(), target_id, ts(next), error, ts(now)],
    )
    .map_err(|e| db_err("insert retry", e))?;
    Ok(next)
}

/// Count one failure against a target inside the caller's transaction.
///
/// The attempt count only moves here, once per recorded failure. When the
/// new count reaches the policy's limit the entry is deleted and the caller
/// applies the terminal status.
pub(crate) fn record_failure(
    conn: &Connection,
    kind: RetryKind,
    target_id: &str,
    error: &str,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Result<RetryOutcome> {
    let existing = retry_by_target(conn, kind, target_id)?;
    let attempt = existing.as_ref().map_or(0, |e| e.attempt_count) + 1;

    if policy.is_exhausted(attempt) {
        if let Some(entry) = existing {
            conn.execute("DELETE FROM retry_entries WHERE id = ?1", params![entry.id])
                .map_err(|e| db_err("delete retry", e))?;
        }
        tracing::warn!(
            "🛑 {} for {} gave up after {} attempt(s): {}",
            kind.as_str(),
            target_id,
            attempt,
            error
        );
        return Ok(RetryOutcome::Exhausted { attempts: attempt });
    }

    let next_eligible_at = match existing {
        Some(entry) => {
            let next = policy.next_eligible(now, attempt);
            conn.execute(
                "UPDATE retry_entries
                 SET attempt_count = ?2, next_eligible_at = ?3, last_error = ?4, in_flight = 0,
                     updated_at = ?5
                 WHERE id = ?1",
                params![entry.id, attempt, ts(next), error, ts(now)],
            )
            .map_err(|e| db_err("update retry", e))?;
            next
        }
        None => insert_first_attempt(conn, kind, target_id, error, policy, now)?,
    };

    tracing::info!(
        "🔁 {} for {} scheduled: attempt {} failed, next at {}",
        kind.as_str(),
        target_id,
        attempt,
        next_eligible_at.format("%H:%M:%S UTC")
    );
    Ok(RetryOutcome::Scheduled {
        attempt,
        next_eligible_at,
    })
}
