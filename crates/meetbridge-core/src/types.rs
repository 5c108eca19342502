//! Domain types shared across MeetBridge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing status of a source record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Captured,
    Extracting,
    Extracted,
    ExtractionFailed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Captured => "captured",
            Self::Extracting => "extracting",
            Self::Extracted => "extracted",
            Self::ExtractionFailed => "extraction_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "captured" => Some(Self::Captured),
            "extracting" => Some(Self::Extracting),
            "extracted" => Some(Self::Extracted),
            "extraction_failed" => Some(Self::ExtractionFailed),
            _ => None,
        }
    }
}

/// Delivery status of an action item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    DeliveryFailed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::DeliveryFailed => "delivery_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "delivered" => Some(Self::Delivered),
            "delivery_failed" => Some(Self::DeliveryFailed),
            _ => None,
        }
    }
}

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    /// Seen by the change detector in the cache file.
    Cache,
    /// Uploaded by hand through the dashboard.
    Upload,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Upload => "upload",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cache" => Some(Self::Cache),
            "upload" => Some(Self::Upload),
            _ => None,
        }
    }
}

/// Which stage a retry entry re-drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryKind {
    Extraction,
    Delivery,
}

impl RetryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Delivery => "delivery",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "extraction" => Some(Self::Extraction),
            "delivery" => Some(Self::Delivery),
            _ => None,
        }
    }
}

/// A record as parsed from the cache file, before it touches the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Stable identifier assigned by the external application.
    pub external_id: String,
    pub title: String,
    pub content: String,
    pub meeting_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub participants: Vec<String>,
}

impl CandidateRecord {
    pub fn new(external_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            title: "Untitled Meeting".into(),
            content: content.into(),
            meeting_date: None,
            participants: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// A known meeting transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    pub external_id: String,
    pub title: String,
    pub content: String,
    pub source: RecordSource,
    pub meeting_date: Option<DateTime<Utc>>,
    pub participants: Vec<String>,
    pub status: RecordStatus,
    pub last_error: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One extracted task, owned by a source record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub id: String,
    pub record_id: String,
    /// Order within the record's extraction result.
    pub position: u32,
    pub title: String,
    pub description: String,
    pub context: String,
    pub assignee: Option<String>,
    pub status: DeliveryStatus,
    pub remote_id: Option<String>,
    pub remote_url: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An item as produced by the extractor, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub assignee: Option<String>,
}

impl ExtractedItem {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            context: String::new(),
            assignee: None,
        }
    }
}

/// What came back from the text-generation collaborator.
///
/// Field presence in the raw response is never trusted: anything that
/// does not parse into at least a list lands in `Malformed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// A well-formed list. May be empty when the meeting had no tasks.
    Valid(Vec<ExtractedItem>),
    /// The collaborator answered with nothing at all.
    Empty,
    /// The collaborator answered with something that is not a list of items.
    Malformed(String),
}

/// A durable pending re-attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryEntry {
    pub id: String,
    pub kind: RetryKind,
    /// Record id for extraction, item id for delivery.
    pub target_id: String,
    /// Number of failed attempts recorded so far.
    pub attempt_count: u32,
    pub next_eligible_at: DateTime<Utc>,
    pub last_error: String,
    /// Claimed by the scheduler and currently being re-attempted.
    pub in_flight: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of recording a failure against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// A retry entry now exists with this attempt count.
    Scheduled {
        attempt: u32,
        next_eligible_at: DateTime<Utc>,
    },
    /// The budget is spent; the target took its terminal status.
    Exhausted { attempts: u32 },
}

/// A unit of work for the pipeline worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkItem {
    /// Run extraction for a record, then deliver whatever it produced.
    Extract { record_id: String },
    /// Deliver one pending action item.
    Deliver { item_id: String },
}

/// Request sent to the task-tracking collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub title: String,
    pub description: String,
    pub assignee: Option<String>,
    /// Link back to the source record on the dashboard.
    pub source_link: String,
}

/// Identity of a task created remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedTask {
    pub id: String,
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_match_storage() {
        assert_eq!(
            RecordStatus::parse(RecordStatus::ExtractionFailed.as_str()),
            Some(RecordStatus::ExtractionFailed)
        );
        assert_eq!(DeliveryStatus::parse("delivery_failed"), Some(DeliveryStatus::DeliveryFailed));
        assert_eq!(RetryKind::parse("bogus"), None);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&RecordStatus::ExtractionFailed).unwrap();
        assert_eq!(json, "\"extraction_failed\"");
    }

    #[test]
    fn test_extracted_item_defaults() {
        let item: ExtractedItem = serde_json::from_str(r#"{"title": "Send deck"}"#).unwrap();
        assert_eq!(item, ExtractedItem::titled("Send deck"));
    }
}
