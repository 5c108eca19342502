//! Delivery stage: one action item, one call to the task tracker.
//!
//! At-least-once: if the tracker created the task but the response was
//! lost, the retry creates a second one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use meetbridge_core::clock::Clock;
use meetbridge_core::config::GatewayConfig;
use meetbridge_core::error::{BridgeError, Result};
use meetbridge_core::policy::RetryPolicy;
use meetbridge_core::traits::TaskTracker;
use meetbridge_core::types::{ActionItem, RetryOutcome, TaskRequest};
use meetbridge_providers::format_card_description;
use meetbridge_scheduler::Notifier;
use meetbridge_store::RecordStore;

use crate::Trigger;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    /// Not claimed: already delivered, failed for good, in flight, or owned by a retry.
    Skipped,
    Delivered { remote_id: String, url: Option<String> },
    RetryScheduled {
        attempt: u32,
        next_eligible_at: DateTime<Utc>,
    },
    /// Budget spent; the item is `delivery_failed`.
    Failed { attempts: u32 },
}

pub struct DeliveryStage {
    store: Arc<RecordStore>,
    tracker: Arc<dyn TaskTracker>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    timeout: Duration,
    links: GatewayConfig,
}

impl DeliveryStage {
    pub fn new(
        store: Arc<RecordStore>,
        tracker: Arc<dyn TaskTracker>,
        notifier: Arc<Notifier>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        timeout: Duration,
        links: GatewayConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            notifier,
            clock,
            policy,
            timeout,
            links,
        }
    }

    fn request_for(&self, item: &ActionItem) -> Result<TaskRequest> {
        let source_link = self.links.meeting_link(&item.record_id);
        let description = match self.store.get_record(&item.record_id)? {
            Some(record) => format_card_description(item, &record, &source_link),
            None => item.description.clone(),
        };
        Ok(TaskRequest {
            title: item.title.clone(),
            description,
            assignee: item.assignee.clone(),
            source_link,
        })
    }

    /// Run one attempt. Only store errors are returned as `Err`.
    pub async fn run(&self, item_id: &str, trigger: Trigger) -> Result<DeliveryResult> {
        let Some(item) = self
            .store
            .start_delivery(item_id, trigger.is_retry(), self.clock.now())?
        else {
            tracing::debug!("Delivery of {item_id} not started ({trigger:?})");
            return Ok(DeliveryResult::Skipped);
        };

        let request = self.request_for(&item)?;
        let called = tokio::time::timeout(self.timeout, self.tracker.create_task(&request)).await;

        let failure = match called {
            Ok(Ok(task)) => {
                let now = self.clock.now();
                if !self.store.mark_delivered(item_id, Some(&task), now)? {
                    tracing::debug!("Item {item_id} was already delivered");
                }
                return Ok(DeliveryResult::Delivered {
                    remote_id: task.id,
                    url: task.url,
                });
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => BridgeError::Timeout(self.timeout.as_secs()).to_string(),
        };

        tracing::warn!("⚠️ Delivery failed for '{}' via {}: {failure}", item.title, self.tracker.name());
        match self
            .store
            .fail_delivery(item_id, &failure, &self.policy, self.clock.now())?
        {
            RetryOutcome::Scheduled {
                attempt,
                next_eligible_at,
            } => Ok(DeliveryResult::RetryScheduled {
                attempt,
                next_eligible_at,
            }),
            RetryOutcome::Exhausted { attempts } => {
                self.notifier.delivery_failed(&item.title, attempts, &failure);
                Ok(DeliveryResult::Failed { attempts })
            }
        }
    }
}
