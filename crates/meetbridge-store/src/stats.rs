//! Read-only aggregates for the dashboard and the daily summary.

use chrono::{DateTime, Duration, Utc};
use meetbridge_core::error::Result;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::db::{RecordStore, db_err, ts};

/// Dashboard counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_records: u64,
    pub records_today: u64,
    pub records_this_week: u64,
    pub captured: u64,
    pub extracting: u64,
    pub extracted: u64,
    pub extraction_failed: u64,
    pub items_total: u64,
    pub items_pending: u64,
    pub items_delivered: u64,
    pub items_failed: u64,
    pub retries_pending: u64,
    /// Records a human could re-drive right now.
    pub unprocessed: u64,
}

/// Activity over a window, for the daily summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub records_captured: u64,
    pub items_extracted: u64,
    pub items_delivered: u64,
    pub extraction_failures: u64,
    pub delivery_failures: u64,
}

impl ActivitySummary {
    pub fn is_quiet(&self) -> bool {
        *self == Self::default()
    }
}

fn count(conn: &Connection, sql: &str, arg: &str) -> Result<u64> {
    let result: rusqlite::Result<i64> = if arg.is_empty() {
        conn.query_row(sql, [], |r| r.get(0))
    } else {
        conn.query_row(sql, params![arg], |r| r.get(0))
    };
    let n = result.map_err(|e| db_err("stats", e))?;
    Ok(n.max(0) as u64)
}

impl RecordStore {
    /// Counters as of `now`. "Today" is the current UTC day.
    pub fn stats(&self, now: DateTime<Utc>) -> Result<StoreStats> {
        let conn = self.conn()?;
        let day_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|d| d.and_utc())
            .unwrap_or(now);
        let week_start = now - Duration::days(7);

        let status = |s: &str| {
            count(&conn, "SELECT COUNT(*) FROM source_records WHERE status = ?1", s)
        };
        let item_status = |s: &str| {
            count(&conn, "SELECT COUNT(*) FROM action_items WHERE status = ?1", s)
        };

        Ok(StoreStats {
            total_records: count(&conn, "SELECT COUNT(*) FROM source_records", "")?,
            records_today: count(
                &conn,
                "SELECT COUNT(*) FROM source_records WHERE first_seen_at >= ?1",
                &ts(day_start),
            )?,
            records_this_week: count(
                &conn,
                "SELECT COUNT(*) FROM source_records WHERE first_seen_at >= ?1",
                &ts(week_start),
            )?,
            captured: status("captured")?,
            extracting: status("extracting")?,
            extracted: status("extracted")?,
            extraction_failed: status("extraction_failed")?,
            items_total: count(&conn, "SELECT COUNT(*) FROM action_items", "")?,
            items_pending: item_status("pending")?,
            items_delivered: item_status("delivered")?,
            items_failed: item_status("delivery_failed")?,
            retries_pending: count(&conn, "SELECT COUNT(*) FROM retry_entries", "")?,
            unprocessed: count(
                &conn,
                "SELECT COUNT(*) FROM source_records
                 WHERE status IN ('captured', 'extraction_failed')
                   AND NOT EXISTS (SELECT 1 FROM retry_entries r
                                   WHERE r.kind = 'extraction' AND r.target_id = source_records.id)",
                "",
            )?,
        })
    }

    /// What happened since `since`.
    pub fn summary_since(&self, since: DateTime<Utc>) -> Result<ActivitySummary> {
        let conn = self.conn()?;
        let since = ts(since);
        Ok(ActivitySummary {
            records_captured: count(
                &conn,
                "SELECT COUNT(*) FROM source_records WHERE first_seen_at >= ?1",
                &since,
            )?,
            items_extracted: count(
                &conn,
                "SELECT COUNT(*) FROM action_items WHERE created_at >= ?1",
                &since,
            )?,
            items_delivered: count(
                &conn,
                "SELECT COUNT(*) FROM action_items WHERE status = 'delivered' AND updated_at >= ?1",
                &since,
            )?,
            extraction_failures: count(
                &conn,
                "SELECT COUNT(*) FROM source_records
                 WHERE status = 'extraction_failed' AND updated_at >= ?1",
                &since,
            )?,
            delivery_failures: count(
                &conn,
                "SELECT COUNT(*) FROM action_items
                 WHERE status = 'delivery_failed' AND updated_at >= ?1",
                &since,
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meetbridge_core::policy::RetryPolicy;
    use meetbridge_core::types::{CandidateRecord, ExtractedItem};

    #[test]
    fn test_stats_counts() {
        let store = RecordStore::open_in_memory().unwrap();
        let now = Utc::now();
        let policy = RetryPolicy::new(3, Duration::seconds(30), Duration::seconds(300));

        store
            .upsert_if_new(&CandidateRecord::new("old", "t"), now - Duration::days(10))
            .unwrap();
        let (a, _) = store.upsert_if_new(&CandidateRecord::new("a", "t"), now).unwrap();
        let (b, _) = store.upsert_if_new(&CandidateRecord::new("b", "t"), now).unwrap();

        store.start_extraction(&a.id, false, now).unwrap();
        let items = store
            .complete_extraction(
                &a.id,
                &[ExtractedItem::titled("one"), ExtractedItem::titled("two")],
                now,
            )
            .unwrap();
        store.mark_delivered(&items[0].id, None, now).unwrap();
        store.fail_extraction(&b.id, "timeout", &policy, now).unwrap();

        let stats = store.stats(now).unwrap();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.records_this_week, 2);
        assert_eq!(stats.extracted, 1);
        assert_eq!(stats.captured, 2);
        assert_eq!(stats.items_total, 2);
        assert_eq!(stats.items_delivered, 1);
        assert_eq!(stats.items_pending, 1);
        assert_eq!(stats.retries_pending, 1);
        // "old" has no retry entry; "b" does
        assert_eq!(stats.unprocessed, 1);
    }

    #[test]
    fn test_summary_window() {
        let store = RecordStore::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .upsert_if_new(&CandidateRecord::new("yesterday", "t"), now - Duration::hours(30))
            .unwrap();
        let (rec, _) = store.upsert_if_new(&CandidateRecord::new("today", "t"), now).unwrap();
        store.start_extraction(&rec.id, false, now).unwrap();
        store.complete_extraction(&rec.id, &[ExtractedItem::titled("x")], now).unwrap();

        let summary = store.summary_since(now - Duration::hours(24)).unwrap();
        assert_eq!(summary.records_captured, 1);
        assert_eq!(summary.items_extracted, 1);
        assert_eq!(summary.items_delivered, 0);
        assert!(!summary.is_quiet());

        let later = store.summary_since(now + Duration::hours(1)).unwrap();
        assert!(later.is_quiet());
    }
}
