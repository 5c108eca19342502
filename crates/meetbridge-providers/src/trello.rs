//! Trello task tracker.
//!
//! One action item becomes one card on the configured list. Card creation
//! is not idempotent: a retried delivery after a lost response creates a
//! second card.

use std::time::Duration;

use async_trait::async_trait;
use meetbridge_core::config::TrackerConfig;
use meetbridge_core::error::{BridgeError, Result};
use meetbridge_core::traits::TaskTracker;
use meetbridge_core::types::{ActionItem, CreatedTask, SourceRecord, TaskRequest};
use serde_json::Value;

pub struct TrelloTracker {
    base_url: String,
    api_key: String,
    api_token: String,
    list_id: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl TrelloTracker {
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_token: config.api_token.clone(),
            list_id: config.list_id.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TaskTracker for TrelloTracker {
    fn name(&self) -> &str {
        "trello"
    }

    async fn create_task(&self, request: &TaskRequest) -> Result<CreatedTask> {
        if self.api_key.is_empty() || self.api_token.is_empty() {
            return Err(BridgeError::Tracker("Trello API credentials not configured".into()));
        }
        if self.list_id.is_empty() {
            return Err(BridgeError::Tracker("No Trello list ID configured".into()));
        }

        let url = format!("{}/cards", self.base_url);
        let resp = self
            .client
            .post(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("token", self.api_token.as_str()),
                ("idList", self.list_id.as_str()),
                ("name", request.title.as_str()),
                ("desc", request.description.as_str()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BridgeError::Timeout(self.timeout.as_secs())
                } else {
                    BridgeError::Http(format!("Trello connection failed: {e}"))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BridgeError::Tracker(match status.as_u16() {
                401 => "Invalid Trello API credentials".to_string(),
                404 => format!("Trello list not found: {}", self.list_id),
                _ => format!("Trello API error {status}: {text}"),
            }));
        }

        let card: Value = resp
            .json()
            .await
            .map_err(|e| BridgeError::Tracker(format!("Trello response is not JSON: {e}")))?;
        let id = card["id"]
            .as_str()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BridgeError::Tracker("Trello response has no card id".into()))?;
        let url = card["shortUrl"]
            .as_str()
            .or_else(|| card["url"].as_str())
            .map(String::from);

        tracing::info!("📌 Created Trello card: {}", url.as_deref().unwrap_or(id));
        Ok(CreatedTask {
            id: id.to_string(),
            url,
        })
    }
}

/// Card body: context, description, assignee, then a footer pointing back
/// to the meeting.
pub fn format_card_description(item: &ActionItem, record: &SourceRecord, source_link: &str) -> String {
    let mut parts = Vec::new();
    if !item.context.is_empty() {
        parts.push(format!("**Context:** {}", item.context));
    }
    if !item.description.is_empty() {
        parts.push(format!("\n{}", item.description));
    }
    if let Some(assignee) = &item.assignee {
        parts.push(format!("\n**Assignee:** {assignee}"));
    }
    parts.push(format!("\n---\n*From meeting: {}*", record.title));
    if let Some(date) = record.meeting_date {
        parts.push(format!("\n*Date: {}*", date.format("%Y-%m-%d")));
    }
    if !source_link.is_empty() {
        parts.push(format!("\n[View meeting]({source_link})"));
    }
    parts.join("\n")
}
