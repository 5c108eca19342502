//! Notifications: what happened, kept in a short history and pushed to
//! whatever webhooks are configured. Sending never blocks the caller and a
//! failed send is only logged.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use meetbridge_core::clock::Clock;
use serde::{Deserialize, Serialize};

use crate::dispatch::{NotifyTarget, dispatch_all};

const HISTORY_LIMIT: usize = 100;

/// A notification to send to the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub priority: NotifyPriority,
    /// Which event produced this (e.g. "extraction", "delivery", "summary").
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// Notification priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotifyPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl NotifyPriority {
    /// High and urgent notifications are rendered as errors.
    pub fn is_alert(&self) -> bool {
        matches!(self, Self::High | Self::Urgent)
    }
}

/// Records notifications and fans them out to the configured targets.
pub struct Notifier {
    targets: Arc<Vec<(String, NotifyTarget)>>,
    history: Mutex<VecDeque<Notification>>,
    clock: Arc<dyn Clock>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(targets: Vec<(String, NotifyTarget)>, clock: Arc<dyn Clock>) -> Self {
        Self {
            targets: Arc::new(targets),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
            clock,
            client: reqwest::Client::new(),
        }
    }

    pub fn has_targets(&self) -> bool {
        !self.targets.is_empty()
    }

    /// Build a notification stamped with the injected clock.
    pub fn create(&self, title: &str, body: &str, source: &str, priority: NotifyPriority) -> Notification {
        Notification {
            title: title.to_string(),
            body: body.to_string(),
            priority,
            source: source.to_string(),
            timestamp: self.clock.now(),
        }
    }

    /// Record the notification and send it in the background.
    ///
    /// Returns immediately. Outside a tokio runtime the notification is
    /// only recorded.
    pub fn notify(&self, notification: Notification) {
        self.record(notification.clone());
        if self.targets.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime, notification '{}' recorded only", notification.title);
            return;
        };

        let targets = self.targets.clone();
        let client = self.client.clone();
        handle.spawn(async move {
            for (name, result) in dispatch_all(&client, &notification, &targets).await {
                if let Err(e) = result {
                    tracing::warn!("⚠️ Notification to {name} failed: {e}");
                }
            }
        });
    }

    fn record(&self, notification: Notification) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push_back(notification);
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
    }

    /// Recent notifications, oldest first.
    pub fn history(&self) -> Vec<Notification> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().cloned().collect()
    }

    // ─── Events ───────────────────────────────────────────────

    pub fn meeting_processed(&self, meeting_title: &str, items: usize) {
        let body = match items {
            0 => format!("'{meeting_title}' had no action items."),
            1 => format!("1 action item extracted from '{meeting_title}'."),
            n => format!("{n} action items extracted from '{meeting_title}'."),
        };
        self.notify(self.create("Meeting processed", &body, "extraction", NotifyPriority::Normal));
    }

    pub fn extraction_failed(&self, meeting_title: &str, attempts: u32, error: &str) {
        let body = format!(
            "Gave up extracting action items from '{meeting_title}' after {attempts} attempts.\nLast error: {error}"
        );
        self.notify(self.create("Extraction failed", &body, "extraction", NotifyPriority::High));
    }

    pub fn delivery_failed(&self, item_title: &str, attempts: u32, error: &str) {
        let body = format!(
            "Gave up creating a card for '{item_title}' after {attempts} attempts.\nLast error: {error}"
        );
        self.notify(self.create("Delivery failed", &body, "delivery", NotifyPriority::High));
    }
}
