//! API route handlers for the dashboard.

use axum::extract::{Path, Query, State};
use axum::Json;
use meetbridge_core::types::{ActionItem, RetryEntry, RetryKind, SourceRecord};
use serde::Deserialize;
use std::sync::Arc;

use super::server::AppState;

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 500;

fn error_json(e: impl std::fmt::Display) -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": false, "error": e.to_string()}))
}

fn record_json(r: &SourceRecord) -> serde_json::Value {
    serde_json::json!({
        "id": r.id,
        "external_id": r.external_id,
        "title": r.title,
        "source": r.source.as_str(),
        "status": r.status.as_str(),
        "meeting_date": r.meeting_date.map(|d| d.to_rfc3339()),
        "participants": r.participants,
        "content_chars": r.content.chars().count(),
        "last_error": r.last_error,
        "first_seen_at": r.first_seen_at.to_rfc3339(),
        "updated_at": r.updated_at.to_rfc3339(),
    })
}

fn item_json(i: &ActionItem, retry: Option<&RetryEntry>) -> serde_json::Value {
    serde_json::json!({
        "id": i.id,
        "title": i.title,
        "description": i.description,
        "context": i.context,
        "assignee": i.assignee,
        "status": i.status.as_str(),
        "remote_id": i.remote_id,
        "remote_url": i.remote_url,
        "last_error": i.last_error,
        "retry": retry.map(retry_json),
    })
}

fn retry_json(e: &RetryEntry) -> serde_json::Value {
    serde_json::json!({
        "id": e.id,
        "kind": e.kind.as_str(),
        "target_id": e.target_id,
        "attempt_count": e.attempt_count,
        "next_eligible_at": e.next_eligible_at.to_rfc3339(),
        "last_error": e.last_error,
        "in_flight": e.in_flight,
    })
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "meetbridge-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Store counters plus process uptime.
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.store.stats(state.clock.now()) {
        Ok(stats) => Json(serde_json::json!({
            "ok": true,
            "stats": stats,
            "uptime_secs": state.start_time.elapsed().as_secs(),
        })),
        Err(e) => error_json(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Newest meetings first, without transcript bodies.
pub async fn list_meetings(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageQuery>,
) -> Json<serde_json::Value> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE);
    let offset = page.offset.unwrap_or(0);
    let records = match state.store.list_records(limit, offset) {
        Ok(r) => r,
        Err(e) => return error_json(e),
    };
    let total = match state.store.record_count() {
        Ok(n) => n,
        Err(e) => return error_json(e),
    };
    let meetings: Vec<_> = records.iter().map(record_json).collect();
    Json(serde_json::json!({
        "ok": true,
        "meetings": meetings,
        "total": total,
        "limit": limit,
        "offset": offset,
    }))
}

/// One meeting with its transcript, items and any pending retries.
pub async fn get_meeting(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let record = match state.store.get_record(&id) {
        Ok(Some(r)) => r,
        Ok(None) => return Json(serde_json::json!({"ok": false, "error": format!("Meeting '{id}' not found")})),
        Err(e) => return error_json(e),
    };
    let items = match state.store.items_for_record(&id) {
        Ok(items) => items,
        Err(e) => return error_json(e),
    };
    let extraction_retry = match state.store.retry_for(RetryKind::Extraction, &id) {
        Ok(entry) => entry,
        Err(e) => return error_json(e),
    };

    let mut item_values = Vec::with_capacity(items.len());
    for item in &items {
        match state.store.retry_for(RetryKind::Delivery, &item.id) {
            Ok(retry) => item_values.push(item_json(item, retry.as_ref())),
            Err(e) => return error_json(e),
        }
    }

    let mut meeting = record_json(&record);
    meeting["content"] = serde_json::Value::String(record.content);
    Json(serde_json::json!({
        "ok": true,
        "meeting": meeting,
        "items": item_values,
        "retry": extraction_retry.as_ref().map(retry_json),
    }))
}

/// Every pending retry, soonest first.
pub async fn list_retries(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.store.list_retries() {
        Ok(entries) => {
            let retries: Vec<_> = entries.iter().map(retry_json).collect();
            Json(serde_json::json!({"ok": true, "retries": retries, "count": retries.len()}))
        }
        Err(e) => error_json(e),
    }
}

/// Upload a transcript by hand: `{"title": "...", "transcript": "..."}`.
pub async fn upload_transcript(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let title = body["title"].as_str().unwrap_or("");
    let transcript = body["transcript"].as_str().unwrap_or("");

    match state.pipeline.upload(title, transcript).await {
        Ok(record) => Json(serde_json::json!({
            "ok": true,
            "id": record.id,
            "title": record.title,
            "status": record.status.as_str(),
        })),
        Err(e) => error_json(e),
    }
}

/// Queue every record that is neither extracted nor waiting on a retry.
pub async fn process_unprocessed(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match state.pipeline.process_unprocessed().await {
        Ok(queued) => Json(serde_json::json!({"ok": true, "queued": queued})),
        Err(e) => error_json(e),
    }
}

/// Re-trigger a delivery that ended in `delivery_failed`.
pub async fn retry_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.pipeline.redrive_item(&id).await {
        Ok(true) => Json(serde_json::json!({"ok": true, "id": id, "queued": true})),
        Ok(false) => Json(serde_json::json!({
            "ok": false,
            "error": format!("Action item '{id}' has not failed delivery")
        })),
        Err(e) => error_json(e),
    }
}

/// Make a waiting retry due immediately.
pub async fn retry_entry_now(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.pipeline.retry_now(&id) {
        Ok(true) => Json(serde_json::json!({"ok": true, "id": id})),
        Ok(false) => Json(serde_json::json!({
            "ok": false,
            "error": format!("Retry '{id}' not found or already running")
        })),
        Err(e) => error_json(e),
    }
}

/// Drop a waiting retry.
pub async fn delete_retry_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.pipeline.discard_retry(&id) {
        Ok(true) => Json(serde_json::json!({"ok": true, "id": id})),
        Ok(false) => Json(serde_json::json!({
            "ok": false,
            "error": format!("Retry '{id}' not found or already running")
        })),
        Err(e) => error_json(e),
    }
}

/// Get notification history.
pub async fn notifications(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let history: Vec<_> = state
        .notifier
        .history()
        .iter()
        .rev()
        .map(|n| {
            serde_json::json!({
                "title": n.title,
                "body": n.body,
                "source": n.source,
                "priority": n.priority,
                "timestamp": n.timestamp.to_rfc3339(),
            })
        })
        .collect();
    Json(serde_json::json!({"ok": true, "notifications": history}))
}
