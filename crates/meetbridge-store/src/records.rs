//! Source records and the extraction state machine.

use chrono::{DateTime, Utc};
use meetbridge_core::error::{BridgeError, Result};
use meetbridge_core::policy::RetryPolicy;
use meetbridge_core::types::{
    ActionItem, CandidateRecord, ExtractedItem, RecordSource, RecordStatus, RetryKind,
    RetryOutcome, SourceRecord,
};
use rusqlite::{Connection, OptionalExtension, params};

use crate::db::{RECORD_COLUMNS, RecordStore, db_err, new_id, record_from_row, ts};
use crate::items::insert_items;
use crate::retries::record_failure;

impl RecordStore {
    // ─── Capture ──────────────────────────────────────────────

    /// Insert a record unless its external id is already known.
    ///
    /// Returns the stored record and whether it was created by this call.
    /// A known id is returned untouched: the first content seen wins.
    pub fn upsert_if_new(
        &self,
        candidate: &CandidateRecord,
        now: DateTime<Utc>,
    ) -> Result<(SourceRecord, bool)> {
        self.insert_candidate(candidate, RecordSource::Cache, now)
    }

    /// Store a transcript uploaded by hand under a fresh external id.
    pub fn insert_upload(&self, title: &str, content: &str, now: DateTime<Utc>) -> Result<SourceRecord> {
        let candidate = CandidateRecord::new(format!("upload-{}", new_id()), content).with_title(title);
        let (record, _) = self.insert_candidate(&candidate, RecordSource::Upload, now)?;
        Ok(record)
    }

    fn insert_candidate(
        &self,
        candidate: &CandidateRecord,
        source: RecordSource,
        now: DateTime<Utc>,
    ) -> Result<(SourceRecord, bool)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| db_err("begin", e))?;

        if let Some(existing) = record_by_external_id(&tx, &candidate.external_id)? {
            // Nothing written; dropping the transaction rolls back a no-op
            return Ok((existing, false));
        }

        let record = SourceRecord {
            id: new_id(),
            external_id: candidate.external_id.clone(),
            title: candidate.title.clone(),
            content: candidate.content.clone(),
            source,
            meeting_date: candidate.meeting_date,
            participants: candidate.participants.clone(),
            status: RecordStatus::Captured,
            last_error: None,
            first_seen_at: now,
            updated_at: now,
        };
        tx.execute(
            "INSERT INTO source_records
             (id, external_id, title, content, source, meeting_date, participants, status,
              last_error, first_seen_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?9)",
            params![
                record.id,
                record.external_id,
                record.title,
                record.content,
                source.as_str(),
                record.meeting_date.map(ts),
                serde_json::to_string(&record.participants)?,
                record.status.as_str(),
                ts(now),
            ],
        )
        .map_err(|e| db_err("insert record", e))?;
        tx.commit().map_err(|e| db_err("commit", e))?;

        Ok((record, true))
    }

    // ─── Reads ────────────────────────────────────────────────

    pub fn get_record(&self, record_id: &str) -> Result<Option<SourceRecord>> {
        let conn = self.conn()?;
        record_by_id(&conn, record_id)
    }

    pub fn get_record_by_external_id(&self, external_id: &str) -> Result<Option<SourceRecord>> {
        let conn = self.conn()?;
        record_by_external_id(&conn, external_id)
    }

    /// Newest first.
    pub fn list_records(&self, limit: usize, offset: usize) -> Result<Vec<SourceRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM source_records
                 ORDER BY first_seen_at DESC, id LIMIT ?1 OFFSET ?2"
            ))
            .map_err(|e| db_err("list records", e))?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], record_from_row)
            .map_err(|e| db_err("list records", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("list records", e))
    }

    pub fn record_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        conn.query_row("SELECT COUNT(*) FROM source_records", [], |r| r.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(|e| db_err("count records", e))
    }

    /// Records a human may re-drive: not extracted, and nothing scheduled.
    pub fn unprocessed_records(&self) -> Result<Vec<SourceRecord>> {
        self.records_where(
            "status IN ('captured', 'extraction_failed')
             AND NOT EXISTS (SELECT 1 FROM retry_entries r
                             WHERE r.kind = 'extraction' AND r.target_id = source_records.id)",
        )
    }

    /// Captured records that were never attempted (no retry entry either).
    pub fn pending_captured(&self) -> Result<Vec<SourceRecord>> {
        self.records_where(
            "status = 'captured'
             AND NOT EXISTS (SELECT 1 FROM retry_entries r
                             WHERE r.kind = 'extraction' AND r.target_id = source_records.id)",
        )
    }

    fn records_where(&self, clause: &str) -> Result<Vec<SourceRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM source_records WHERE {clause} ORDER BY first_seen_at"
            ))
            .map_err(|e| db_err("query records", e))?;
        let rows = stmt
            .query_map([], record_from_row)
            .map_err(|e| db_err("query records", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("query records", e))
    }

    // ─── Extraction state machine ─────────────────────────────

    /// Set a record's status directly.
    pub fn update_status(&self, record_id: &str, status: RecordStatus, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE source_records SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![record_id, status.as_str(), ts(now)],
            )
            .map_err(|e| db_err("update status", e))?;
        if changed == 0 {
            return Err(BridgeError::NotFound(format!("record {record_id}")));
        }
        Ok(())
    }

    /// Claim a record for extraction, moving it to `extracting`.
    ///
    /// The live path (`from_retry == false`) only claims records with no
    /// retry entry at all. The retry path only claims records whose entry the
    /// scheduler holds in flight. Either way at most one attempt runs per
    /// record. Returns `None` when the claim was refused.
    pub fn start_extraction(
        &self,
        record_id: &str,
        from_retry: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<SourceRecord>> {
        let sql = if from_retry {
            "UPDATE source_records SET status = 'extracting', updated_at = ?2
             WHERE id = ?1 AND status = 'captured'
               AND EXISTS (SELECT 1 FROM retry_entries
                           WHERE kind = 'extraction' AND target_id = ?1 AND in_flight = 1)"
        } else {
            "UPDATE source_records SET status = 'extracting', updated_at = ?2
             WHERE id = ?1 AND status IN ('captured', 'extraction_failed')
               AND NOT EXISTS (SELECT 1 FROM retry_entries
                               WHERE kind = 'extraction' AND target_id = ?1)"
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| db_err("begin", e))?;
        let changed = tx
            .execute(sql, params![record_id, ts(now)])
            .map_err(|e| db_err("start extraction", e))?;
        if changed == 0 {
            return Ok(None);
        }
        let record = record_by_id(&tx, record_id)?;
        tx.commit().map_err(|e| db_err("commit", e))?;
        Ok(record)
    }

    /// Persist extracted items without touching the record's status.
    pub fn add_action_items(
        &self,
        record_id: &str,
        items: &[ExtractedItem],
        now: DateTime<Utc>,
    ) -> Result<Vec<ActionItem>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| db_err("begin", e))?;
        if record_by_id(&tx, record_id)?.is_none() {
            return Err(BridgeError::NotFound(format!("record {record_id}")));
        }
        let stored = insert_items(&tx, record_id, items, now)?;
        tx.commit().map_err(|e| db_err("commit", e))?;
        Ok(stored)
    }

    /// Persist items, mark the record `extracted`, and drop its retry entry.
    /// One transaction: either all of it lands or none of it does.
    pub fn complete_extraction(
        &self,
        record_id: &str,
        items: &[ExtractedItem],
        now: DateTime<Utc>,
    ) -> Result<Vec<ActionItem>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| db_err("begin", e))?;

        let changed = tx
            .execute(
                "UPDATE source_records SET status = 'extracted', last_error = NULL, updated_at = ?2
                 WHERE id = ?1 AND status = 'extracting'",
                params![record_id, ts(now)],
            )
            .map_err(|e| db_err("complete extraction", e))?;
        if changed == 0 {
            return Err(BridgeError::Other(format!(
                "record {record_id} is not being extracted"
            )));
        }

        let stored = insert_items(&tx, record_id, items, now)?;
        tx.execute(
            "DELETE FROM retry_entries WHERE kind = 'extraction' AND target_id = ?1",
            params![record_id],
        )
        .map_err(|e| db_err("clear retry", e))?;
        tx.commit().map_err(|e| db_err("commit", e))?;

        Ok(stored)
    }

    /// Record a failed extraction attempt.
    ///
    /// The record goes back to `captured` with a retry entry, or to
    /// `extraction_failed` once the policy's budget is spent.
    pub fn fail_extraction(
        &self,
        record_id: &str,
        error: &str,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<RetryOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| db_err("begin", e))?;

        if record_by_id(&tx, record_id)?.is_none() {
            return Err(BridgeError::NotFound(format!("record {record_id}")));
        }
        let outcome = record_failure(&tx, RetryKind::Extraction, record_id, error, policy, now)?;
        let status = match outcome {
            RetryOutcome::Scheduled { .. } => RecordStatus::Captured,
            RetryOutcome::Exhausted { .. } => RecordStatus::ExtractionFailed,
        };
        tx.execute(
            "UPDATE source_records SET status = ?2, last_error = ?3, updated_at = ?4 WHERE id = ?1",
            params![record_id, status.as_str(), error, ts(now)],
        )
        .map_err(|e| db_err("fail extraction", e))?;
        tx.commit().map_err(|e| db_err("commit", e))?;

        Ok(outcome)
    }
}

pub(crate) fn record_by_id(conn: &Connection, record_id: &str) -> Result<Option<SourceRecord>> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM source_records WHERE id = ?1"),
        params![record_id],
        record_from_row,
    )
    .optional()
    .map_err(|e| db_err("get record", e))
}

fn record_by_external_id(conn: &Connection, external_id: &str) -> Result<Option<SourceRecord>> {
    conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM source_records WHERE external_id = ?1"),
        params![external_id],
        record_from_row,
    )
    .optional()
    .map_err(|e| db_err("get record", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::seconds(30), Duration::seconds(600))
    }

    fn candidate(id: &str, content: &str) -> CandidateRecord {
        CandidateRecord::new(id, content).with_title("Weekly sync")
    }

    #[test]
    fn test_only_first_upsert_is_new() {
        let store = RecordStore::open_in_memory().unwrap();
        let now = Utc::now();

        let (first, is_new) = store.upsert_if_new(&candidate("doc-1", "first take"), now).unwrap();
        assert!(is_new);

        for (i, content) in ["second take", "", "first take", "third"].iter().enumerate() {
            let later = now + Duration::seconds(i as i64 + 1);
            let (again, is_new) = store.upsert_if_new(&candidate("doc-1", content), later).unwrap();
            assert!(!is_new);
            assert_eq!(again.id, first.id);
            assert_eq!(again.content, "first take");
            assert_eq!(again.first_seen_at, first.first_seen_at);
        }

        assert_eq!(store.record_count().unwrap(), 1);
        let stored = store.get_record_by_external_id("doc-1").unwrap().unwrap();
        assert_eq!(stored.content, "first take");
        assert_eq!(stored.status, RecordStatus::Captured);
    }

    #[test]
    fn test_upload_gets_its_own_id() {
        let store = RecordStore::open_in_memory().unwrap();
        let a = store.insert_upload("Standup", "same text", Utc::now()).unwrap();
        let b = store.insert_upload("Standup", "same text", Utc::now()).unwrap();
        assert_ne!(a.external_id, b.external_id);
        assert_eq!(a.source, RecordSource::Upload);
        assert!(a.external_id.starts_with("upload-"));
    }

    #[test]
    fn test_live_start_refused_while_retry_pending() {
        let store = RecordStore::open_in_memory().unwrap();
        let now = Utc::now();
        let (rec, _) = store.upsert_if_new(&candidate("doc-2", "text"), now).unwrap();

        assert!(store.start_extraction(&rec.id, false, now).unwrap().is_some());
        // Already extracting: a second live attempt is refused
        assert!(store.start_extraction(&rec.id, false, now).unwrap().is_none());

        store.fail_extraction(&rec.id, "timeout", &policy(), now).unwrap();
        // Retry entry exists: the live path stays out
        assert!(store.start_extraction(&rec.id, false, now).unwrap().is_none());
        // And the retry path needs the entry claimed first
        assert!(store.start_extraction(&rec.id, true, now).unwrap().is_none());

        let entry = store.retry_for(RetryKind::Extraction, &rec.id).unwrap().unwrap();
        assert!(store.claim_retry(&entry.id).unwrap());
        let claimed = store.start_extraction(&rec.id, true, now).unwrap().unwrap();
        assert_eq!(claimed.status, RecordStatus::Extracting);
    }

    #[test]
    fn test_first_failure_schedules_attempt_one() {
        let store = RecordStore::open_in_memory().unwrap();
        let now = Utc::now();
        let (rec, _) = store.upsert_if_new(&candidate("doc-3", "text"), now).unwrap();
        store.start_extraction(&rec.id, false, now).unwrap();

        let outcome = store.fail_extraction(&rec.id, "connection refused", &policy(), now).unwrap();
        let entry = store.retry_for(RetryKind::Extraction, &rec.id).unwrap().unwrap();
        assert_eq!(entry.attempt_count, 1);
        assert_eq!(entry.last_error, "connection refused");
        assert_eq!(
            outcome,
            RetryOutcome::Scheduled {
                attempt: 1,
                next_eligible_at: entry.next_eligible_at
            }
        );
        assert_eq!(entry.next_eligible_at - now, Duration::seconds(30));

        let rec = store.get_record(&rec.id).unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Captured);
        assert_eq!(rec.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_complete_extraction_is_atomic_and_clears_retry() {
        let store = RecordStore::open_in_memory().unwrap();
        let now = Utc::now();
        let (rec, _) = store.upsert_if_new(&candidate("doc-4", "text"), now).unwrap();
        store.start_extraction(&rec.id, false, now).unwrap();
        store.fail_extraction(&rec.id, "timeout", &policy(), now).unwrap();
        let entry = store.retry_for(RetryKind::Extraction, &rec.id).unwrap().unwrap();
        store.claim_retry(&entry.id).unwrap();
        store.start_extraction(&rec.id, true, now).unwrap().unwrap();

        let items = vec![
            ExtractedItem::titled("Send the deck"),
            ExtractedItem::titled("Book the venue"),
        ];
        let stored = store.complete_extraction(&rec.id, &items, now).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].position, 1);

        let rec = store.get_record(&rec.id).unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::Extracted);
        assert!(store.retry_for(RetryKind::Extraction, &rec.id).unwrap().is_none());
        assert_eq!(store.items_for_record(&rec.id).unwrap().len(), 2);
    }

    #[test]
    fn test_complete_requires_extracting() {
        let store = RecordStore::open_in_memory().unwrap();
        let now = Utc::now();
        let (rec, _) = store.upsert_if_new(&candidate("doc-5", "text"), now).unwrap();
        let err = store.complete_extraction(&rec.id, &[ExtractedItem::titled("x")], now);
        assert!(err.is_err());
        // Nothing leaked into the items table
        assert!(store.items_for_record(&rec.id).unwrap().is_empty());
    }

    #[test]
    fn test_exhaustion_sets_terminal_and_removes_entry() {
        let store = RecordStore::open_in_memory().unwrap();
        let mut now = Utc::now();
        let (rec, _) = store.upsert_if_new(&candidate("doc-6", "text"), now).unwrap();
        let policy = policy();

        let mut outcome = None;
        for _ in 0..policy.max_attempts {
            outcome = Some(store.fail_extraction(&rec.id, "timeout", &policy, now).unwrap());
            now += Duration::hours(2);
        }
        assert_eq!(outcome, Some(RetryOutcome::Exhausted { attempts: 5 }));
        assert!(store.retry_for(RetryKind::Extraction, &rec.id).unwrap().is_none());
        let rec = store.get_record(&rec.id).unwrap().unwrap();
        assert_eq!(rec.status, RecordStatus::ExtractionFailed);

        // Terminal records can be re-driven by hand
        let unprocessed = store.unprocessed_records().unwrap();
        assert_eq!(unprocessed.len(), 1);
        assert!(store.start_extraction(&rec.id, false, now).unwrap().is_some());
    }

    #[test]
    fn test_pending_captured_excludes_scheduled_and_failed() {
        let store = RecordStore::open_in_memory().unwrap();
        let now = Utc::now();
        let (a, _) = store.upsert_if_new(&candidate("a", "text"), now).unwrap();
        let (b, _) = store.upsert_if_new(&candidate("b", "text"), now).unwrap();
        store.fail_extraction(&b.id, "timeout", &policy(), now).unwrap();

        let pending: Vec<String> = store.pending_captured().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(pending, vec![a.id]);
    }

    #[test]
    fn test_update_status_unknown_record() {
        let store = RecordStore::open_in_memory().unwrap();
        let err = store.update_status("missing", RecordStatus::Extracted, Utc::now());
        assert!(matches!(err, Err(BridgeError::NotFound(_))));
    }

    #[test]
    fn test_list_records_newest_first() {
        let store = RecordStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.upsert_if_new(&candidate("old", "text"), now).unwrap();
        store.upsert_if_new(&candidate("new", "text"), now + Duration::minutes(5)).unwrap();
        let page = store.list_records(1, 0).unwrap();
        assert_eq!(page[0].external_id, "new");
        let page = store.list_records(10, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].external_id, "old");
    }
}
