//! Parser for the meeting app's cache file.
//!
//! The file is `{"cache": "<json string>"}` where the inner document holds
//! `state.documents` (id → meeting) and `state.transcripts` (id → segments).
//! Older files have the state unwrapped at the top level.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use meetbridge_core::error::{BridgeError, Result};
use meetbridge_core::types::CandidateRecord;
use serde_json::{Map, Value};

/// Parses cache bytes into candidate records.
#[derive(Debug, Clone)]
pub struct CacheParser {
    min_transcript_chars: usize,
}

impl Default for CacheParser {
    fn default() -> Self {
        Self::new(20)
    }
}

impl CacheParser {
    pub fn new(min_transcript_chars: usize) -> Self {
        Self { min_transcript_chars }
    }

    /// Parse the whole file. Malformed structure is an error; individual
    /// documents without usable text are skipped.
    pub fn parse(&self, bytes: &[u8]) -> Result<Vec<CandidateRecord>> {
        let root: Value = serde_json::from_slice(bytes)
            .map_err(|e| BridgeError::Parse(format!("cache is not JSON: {e}")))?;
        let state = unwrap_state(root)?;

        let documents = match state.get("documents") {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Object(docs)) => docs,
            Some(_) => return Err(BridgeError::Parse("state.documents is not an object".into())),
        };
        let empty = Map::new();
        let transcripts = state
            .get("transcripts")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let mut records = Vec::new();
        for (key, doc) in documents {
            if let Some(record) = self.parse_document(key, doc, transcripts) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn parse_document(&self, key: &str, doc: &Value, transcripts: &Map<String, Value>) -> Option<CandidateRecord> {
        let doc = doc.as_object()?;
        let id = match doc.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ if !key.is_empty() => key.to_string(),
            _ => return None,
        };

        let text = transcript_text(&id, doc, transcripts)?;
        if text.trim().chars().count() < self.min_transcript_chars {
            tracing::debug!("Document {id} has no usable transcript, skipping");
            return None;
        }

        let title = doc
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("Untitled Meeting");

        Some(CandidateRecord {
            external_id: id,
            title: title.to_string(),
            content: text,
            meeting_date: doc.get("created_at").and_then(parse_date),
            participants: doc.get("people").map(participants).unwrap_or_default(),
        })
    }
}

/// Unwrap `{"cache": "<json>"}` or `{"cache": {...}}` or `{"state": {...}}`.
fn unwrap_state(mut root: Value) -> Result<Map<String, Value>> {
    if let Some(cache) = root.get_mut("cache").map(Value::take) {
        let inner = match cache {
            Value::String(raw) => serde_json::from_str::<Value>(&raw)
                .map_err(|e| BridgeError::Parse(format!("inner cache is not JSON: {e}")))?,
            other => other,
        };
        return take_state(inner);
    }
    take_state(root)
}

fn take_state(mut value: Value) -> Result<Map<String, Value>> {
    match value.get_mut("state").map(Value::take) {
        Some(Value::Object(state)) => Ok(state),
        _ => Err(BridgeError::Parse("could not find state in cache".into())),
    }
}

/// Joined transcript segments, falling back to the document's own notes.
fn transcript_text(id: &str, doc: &Map<String, Value>, transcripts: &Map<String, Value>) -> Option<String> {
    if let Some(Value::Array(segments)) = transcripts.get(id) {
        let joined = join_segments(segments);
        if !joined.trim().is_empty() {
            return Some(joined);
        }
    }
    ["notes_plain", "notes_markdown", "summary"]
        .iter()
        .filter_map(|field| doc.get(*field).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn join_segments(segments: &[Value]) -> String {
    let mut ordered: Vec<&Value> = segments.iter().collect();
    ordered.sort_by_key(|s| {
        s.get("start_timestamp")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    });

    let mut parts = Vec::with_capacity(ordered.len());
    for segment in ordered {
        match segment {
            Value::String(s) if !s.is_empty() => parts.push(s.clone()),
            Value::Object(obj) => {
                let text = obj.get("text").and_then(Value::as_str).unwrap_or_default();
                if text.is_empty() {
                    continue;
                }
                if obj.get("source").and_then(Value::as_str) == Some("system_audio") {
                    parts.push(format!("[Remote] {text}"));
                } else {
                    parts.push(text.to_string());
                }
            }
            _ => {}
        }
    }
    parts.join(" ")
}

fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n.as_f64()?;
            // Millisecond epochs are common in JS-written caches
            let secs = if secs > 1e12 { secs / 1000.0 } else { secs };
            Utc.timestamp_opt(secs as i64, 0).single()
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(naive.and_utc());
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d.and_utc())
        }
        _ => None,
    }
}

fn participants(people: &Value) -> Vec<String> {
    let Some(list) = people.as_array() else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|person| match person {
            Value::String(name) => Some(name.clone()),
            Value::Object(p) => p
                .get("name")
                .or_else(|| p.get("displayName"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| {
                    p.get("email")
                        .and_then(Value::as_str)
                        .and_then(|e| e.split('@').next())
                        .map(str::to_string)
                }),
            _ => None,
        })
        .filter(|name| !name.is_empty())
        .collect()
}
