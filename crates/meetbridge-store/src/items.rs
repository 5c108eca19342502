//! Action items and the delivery state machine.

use chrono::{DateTime, Utc};
use meetbridge_core::error::{BridgeError, Result};
use meetbridge_core::policy::RetryPolicy;
use meetbridge_core::types::{
    ActionItem, CreatedTask, DeliveryStatus, ExtractedItem, RetryKind, RetryOutcome,
};
use rusqlite::{Connection, OptionalExtension, ToSql, params};

use crate::db::{ITEM_COLUMNS, RecordStore, db_err, item_from_row, new_id, ts};
use crate::retries::record_failure;

impl RecordStore {
    pub fn get_item(&self, item_id: &str) -> Result<Option<ActionItem>> {
        let conn = self.conn()?;
        item_by_id(&conn, item_id)
    }

    /// Items of one record, in extraction order.
    pub fn items_for_record(&self, record_id: &str) -> Result<Vec<ActionItem>> {
        self.items_where("record_id = ?1", &[&record_id])
    }

    /// Pending items nobody is working on and nothing has scheduled.
    pub fn undelivered_items(&self) -> Result<Vec<ActionItem>> {
        self.items_where(
            "status = 'pending' AND in_flight = 0
             AND NOT EXISTS (SELECT 1 FROM retry_entries r
                             WHERE r.kind = 'delivery' AND r.target_id = action_items.id)",
            &[],
        )
    }

    fn items_where(&self, clause: &str, args: &[&dyn ToSql]) -> Result<Vec<ActionItem>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM action_items WHERE {clause}
                 ORDER BY created_at, record_id, position"
            ))
            .map_err(|e| db_err("query items", e))?;
        let rows = stmt
            .query_map(args, item_from_row)
            .map_err(|e| db_err("query items", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("query items", e))
    }

    /// Claim an item for delivery.
    ///
    /// Mirrors [`RecordStore::start_extraction`]: the live path needs no retry
    /// entry, the retry path needs the scheduler's claimed entry, and an item
    /// already in flight is never claimed twice.
    pub fn start_delivery(
        &self,
        item_id: &str,
        from_retry: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<ActionItem>> {
        let sql = if from_retry {
            "UPDATE action_items SET in_flight = 1, updated_at = ?2
             WHERE id = ?1 AND status = 'pending' AND in_flight = 0
               AND EXISTS (SELECT 1 FROM retry_entries
                           WHERE kind = 'delivery' AND target_id = ?1 AND in_flight = 1)"
        } else {
            "UPDATE action_items SET in_flight = 1, updated_at = ?2
             WHERE id = ?1 AND status = 'pending' AND in_flight = 0
               AND NOT EXISTS (SELECT 1 FROM retry_entries
                               WHERE kind = 'delivery' AND target_id = ?1)"
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| db_err("begin", e))?;
        let changed = tx
            .execute(sql, params![item_id, ts(now)])
            .map_err(|e| db_err("start delivery", e))?;
        if changed == 0 {
            return Ok(None);
        }
        let item = item_by_id(&tx, item_id)?;
        tx.commit().map_err(|e| db_err("commit", e))?;
        Ok(item)
    }

    /// Mark an item delivered. Idempotent.
    ///
    /// Returns `true` when this call made the transition and `false` when
    /// the item had already left `pending`.
    pub fn mark_delivered(
        &self,
        item_id: &str,
        remote: Option<&CreatedTask>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| db_err("begin", e))?;

        let changed = tx
            .execute(
                "UPDATE action_items
                 SET status = 'delivered', in_flight = 0, remote_id = ?2, remote_url = ?3,
                     last_error = NULL, updated_at = ?4
                 WHERE id = ?1 AND status = 'pending'",
                params![
                    item_id,
                    remote.map(|t| t.id.as_str()),
                    remote.and_then(|t| t.url.as_deref()),
                    ts(now)
                ],
            )
            .map_err(|e| db_err("mark delivered", e))?;

        if changed == 0 {
            return match item_by_id(&tx, item_id)? {
                Some(_) => Ok(false),
                None => Err(BridgeError::NotFound(format!("action item {item_id}"))),
            };
        }

        tx.execute(
            "DELETE FROM retry_entries WHERE kind = 'delivery' AND target_id = ?1",
            params![item_id],
        )
        .map_err(|e| db_err("clear retry", e))?;
        tx.commit().map_err(|e| db_err("commit", e))?;
        Ok(true)
    }

    /// Record a failed delivery attempt, scheduling a retry or giving up.
    pub fn fail_delivery(
        &self,
        item_id: &str,
        error: &str,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<RetryOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| db_err("begin", e))?;

        match item_by_id(&tx, item_id)? {
            Some(item) if item.status == DeliveryStatus::Pending => {}
            Some(item) => {
                return Err(BridgeError::Other(format!(
                    "action item {item_id} is already {}",
                    item.status.as_str()
                )));
            }
            None => return Err(BridgeError::NotFound(format!("action item {item_id}"))),
        }

        let outcome = record_failure(&tx, RetryKind::Delivery, item_id, error, policy, now)?;
        let status = match outcome {
            RetryOutcome::Scheduled { .. } => DeliveryStatus::Pending,
            RetryOutcome::Exhausted { .. } => DeliveryStatus::DeliveryFailed,
        };
        tx.execute(
            "UPDATE action_items SET status = ?2, in_flight = 0, last_error = ?3, updated_at = ?4
             WHERE id = ?1",
            params![item_id, status.as_str(), error, ts(now)],
        )
        .map_err(|e| db_err("fail delivery", e))?;
        tx.commit().map_err(|e| db_err("commit", e))?;

        Ok(outcome)
    }

    /// Manual re-trigger for an item that ended in `delivery_failed`.
    ///
    /// The item goes back to `pending` with no retry entry, so its next
    /// attempt counts from one again. Returns `false` when the item is in
    /// any other state.
    pub fn redrive_delivery(&self, item_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| db_err("begin", e))?;

        let changed = tx
            .execute(
                "UPDATE action_items SET status = 'pending', in_flight = 0, updated_at = ?2
                 WHERE id = ?1 AND status = 'delivery_failed'",
                params![item_id, ts(now)],
            )
            .map_err(|e| db_err("redrive delivery", e))?;
        if changed == 0 {
            return match item_by_id(&tx, item_id)? {
                Some(_) => Ok(false),
                None => Err(BridgeError::NotFound(format!("action item {item_id}"))),
            };
        }

        tx.execute(
            "DELETE FROM retry_entries WHERE kind = 'delivery' AND target_id = ?1",
            params![item_id],
        )
        .map_err(|e| db_err("clear retry", e))?;
        tx.commit().map_err(|e| db_err("commit", e))?;
        Ok(true)
    }
}

pub(crate) fn item_by_id(conn: &Connection, item_id: &str) -> Result<Option<ActionItem>> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM action_items WHERE id = ?1"),
        params![item_id],
        item_from_row,
    )
    .optional()
    .map_err(|e| db_err("get item", e))
}

/// Insert items for a record inside the caller's transaction.
pub(crate) fn insert_items(
    conn: &Connection,
    record_id: &str,
    items: &[ExtractedItem],
    now: DateTime<Utc>,
) -> Result<Vec<ActionItem>> {
    let offset: u32 = conn
        .query_row(
            "SELECT COUNT(*) FROM action_items WHERE record_id = ?1",
            params![record_id],
            |r| r.get(0),
        )
        .map_err(|e| db_err("count items", e))?;

    let mut stored = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let action = ActionItem {
            id: new_id(),
            record_id: record_id.to_string(),
            position: offset + i as u32,
            title: item.title.clone(),
            description: item.description.clone(),
            context: item.context.clone(),
            assignee: item.assignee.clone(),
            status: DeliveryStatus::Pending,
            remote_id: None,
            remote_url: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        conn.execute(
            "INSERT INTO action_items
             (id, record_id, position, title, description, context, assignee, status,
              in_flight, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)",
            params![
                action.id,
                action.record_id,
                action.position,
                action.title,
                action.description,
                action.context,
                action.assignee,
                action.status.as_str(),
                ts(now),
            ],
        )
        .map_err(|e| db_err("insert item", e))?;
        stored.push(action);
    }
    Ok(stored)
}
