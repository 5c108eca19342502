//! The pipeline ties both stages together for live work (the worker) and
//! for scheduled re-attempts (as the scheduler's [`RetryHandler`]).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meetbridge_core::clock::Clock;
use meetbridge_core::config::{BridgeConfig, GatewayConfig};
use meetbridge_core::error::Result;
use meetbridge_core::policy::RetryPolicy;
use meetbridge_core::traits::{Extractor, TaskTracker};
use meetbridge_core::types::{DeliveryStatus, RecordStatus, RetryEntry, RetryKind, WorkItem};
use meetbridge_scheduler::{Notifier, RetryHandler};
use meetbridge_store::RecordStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Trigger;
use crate::delivery::{DeliveryResult, DeliveryStage};
use crate::extraction::{ExtractionResult, ExtractionStage};

/// Knobs the stages need, resolved from the config file.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub policy: RetryPolicy,
    pub extraction_timeout: Duration,
    pub delivery_timeout: Duration,
    pub notify_on_success: bool,
    pub gateway: GatewayConfig,
}

impl PipelineSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            policy: RetryPolicy::from_config(&config.retry),
            extraction_timeout: Duration::from_secs(config.llm.timeout_secs.max(1)),
            delivery_timeout: Duration::from_secs(config.tracker.timeout_secs.max(1)),
            notify_on_success: config.notifications.notify_on_success,
            gateway: config.gateway.clone(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

pub struct Pipeline {
    store: Arc<RecordStore>,
    notifier: Arc<Notifier>,
    extraction: ExtractionStage,
    delivery: DeliveryStage,
    notify_on_success: bool,
}

impl Pipeline {
    pub fn new(
        store: Arc<RecordStore>,
        extractor: Arc<dyn Extractor>,
        tracker: Arc<dyn TaskTracker>,
        notifier: Arc<Notifier>,
        clock: Arc<dyn Clock>,
        settings: PipelineSettings,
    ) -> Self {
        let extraction = ExtractionStage::new(
            store.clone(),
            extractor,
            notifier.clone(),
            clock.clone(),
            settings.policy,
            settings.extraction_timeout,
        );
        let delivery = DeliveryStage::new(
            store.clone(),
            tracker,
            notifier.clone(),
            clock,
            settings.policy,
            settings.delivery_timeout,
            settings.gateway,
        );
        Self {
            store,
            notifier,
            extraction,
            delivery,
            notify_on_success: settings.notify_on_success,
        }
    }

    pub fn extraction(&self) -> &ExtractionStage {
        &self.extraction
    }

    pub fn delivery(&self) -> &DeliveryStage {
        &self.delivery
    }

    /// Handle one queued work item on the live path.
    pub async fn process(&self, work: WorkItem) -> Result<()> {
        match work {
            WorkItem::Extract { record_id } => {
                self.extract_and_deliver(&record_id, Trigger::Live).await?;
            }
            WorkItem::Deliver { item_id } => {
                self.delivery.run(&item_id, Trigger::Live).await?;
            }
        }
        Ok(())
    }

    /// Extract a record, then immediately try to deliver every new item.
    pub async fn extract_and_deliver(&self, record_id: &str, trigger: Trigger) -> Result<ExtractionResult> {
        let result = self.extraction.run(record_id, trigger).await?;
        if let ExtractionResult::Extracted { title, items } = &result {
            let mut delivered = 0;
            for item in items {
                if let DeliveryResult::Delivered { .. } = self.delivery.run(&item.id, Trigger::Live).await? {
                    delivered += 1;
                }
            }
            tracing::info!("📬 '{title}': {delivered}/{} item(s) delivered", items.len());
            if self.notify_on_success {
                self.notifier.meeting_processed(title, items.len());
            }
        }
        Ok(result)
    }

    /// Settle an entry whose target refused the retry claim.
    ///
    /// A target that no longer needs the entry (gone, or already in a final
    /// state) loses it. Anything else gets it back for a later tick.
    fn settle_refused(&self, entry: &RetryEntry) -> Result<()> {
        let obsolete = match entry.kind {
            RetryKind::Extraction => !matches!(
                self.store.get_record(&entry.target_id)?.map(|r| r.status),
                Some(RecordStatus::Captured | RecordStatus::Extracting)
            ),
            RetryKind::Delivery => !matches!(
                self.store.get_item(&entry.target_id)?.map(|i| i.status),
                Some(DeliveryStatus::Pending)
            ),
        };
        if obsolete {
            tracing::info!(
                "🧹 Dropping retry for {} {}: target no longer needs it",
                entry.kind.as_str(),
                entry.target_id
            );
            self.store.delete_retry(&entry.id)?;
        } else {
            self.store.release_retry(&entry.id)?;
        }
        Ok(())
    }
}

#[async_trait]
impl RetryHandler for Pipeline {
    async fn handle_retry(&self, entry: &RetryEntry) -> Result<()> {
        tracing::info!(
            "🔁 Retrying {} for {} (attempt {})",
            entry.kind.as_str(),
            entry.target_id,
            entry.attempt_count + 1
        );
        let skipped = match entry.kind {
            RetryKind::Extraction => matches!(
                self.extract_and_deliver(&entry.target_id, Trigger::Retry).await?,
                ExtractionResult::Skipped
            ),
            RetryKind::Delivery => matches!(
                self.delivery.run(&entry.target_id, Trigger::Retry).await?,
                DeliveryResult::Skipped
            ),
        };
        if skipped {
            self.settle_refused(entry)?;
        }
        Ok(())
    }
}

/// Drain the work queue until cancelled or the senders are gone.
///
/// Items are processed one at a time. A store error stops the worker.
pub async fn run_worker(
    pipeline: Arc<Pipeline>,
    mut queue: mpsc::Receiver<WorkItem>,
    cancel: CancellationToken,
) -> Result<()> {
    tracing::info!("⚙️ Pipeline worker started");
    loop {
        let work = tokio::select! {
            _ = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(work) => work,
                None => break,
            },
        };

        if let Err(e) = pipeline.process(work.clone()).await {
            if e.is_fatal() {
                tracing::error!("❌ Pipeline worker stopping: {e}");
                return Err(e);
            }
            tracing::warn!("⚠️ Work item {work:?} failed: {e}");
        }
    }
    tracing::info!("⚙️ Pipeline worker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::PipelineHandle;
    use crate::testing::{Harness, Script, TrackerScript};
    use chrono::Duration as ChronoDuration;
    use meetbridge_core::error::BridgeError;
    use meetbridge_core::types::{ExtractedItem, ExtractionOutcome};
    use meetbridge_scheduler::RetryScheduler;

    fn scheduler(h: &Harness, pipeline: Arc<Pipeline>) -> RetryScheduler {
        RetryScheduler::new(h.store.clone(), pipeline, h.clock.clone(), 50)
    }

    #[tokio::test]
    async fn test_new_meeting_flows_to_delivered() {
        let h = Harness::new(
            vec![Script::Outcome(ExtractionOutcome::Valid(vec![ExtractedItem::titled(
                "Send the revised contract to legal",
            )]))],
            vec![TrackerScript::Created],
        );
        let record = h.capture("m1");
        let pipeline = h.pipeline();

        pipeline
            .process(WorkItem::Extract {
                record_id: record.id.clone(),
            })
            .await
            .unwrap();

        assert_eq!(h.status(&record.id), RecordStatus::Extracted);
        let items = h.store.items_for_record(&record.id).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, DeliveryStatus::Delivered);
        assert!(h.store.list_retries().unwrap().is_empty());
        assert_eq!(h.notifier.history()[0].title, "Meeting processed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_timeouts_end_in_extraction_failed() {
        let h = Harness::new((0..5).map(|_| Script::Hang).collect(), vec![]);
        let record = h.capture("m1");
        let pipeline = h.pipeline();
        let scheduler = scheduler(&h, pipeline.clone());

        let first = pipeline.extract_and_deliver(&record.id, Trigger::Live).await.unwrap();
        assert!(matches!(first, ExtractionResult::RetryScheduled { attempt: 1, .. }));

        let mut schedule = vec![h.store.retry_for(RetryKind::Extraction, &record.id).unwrap().unwrap()];
        for _ in 0..4 {
            h.clock.advance(ChronoDuration::hours(2));
            let report = scheduler.tick().await.unwrap();
            assert_eq!(report.handled, 1);
            if let Some(entry) = h.store.retry_for(RetryKind::Extraction, &record.id).unwrap() {
                schedule.push(entry);
            }
        }

        // Attempts 1..4 were scheduled with growing delays; the fifth failure is terminal
        assert_eq!(schedule.len(), 4);
        for pair in schedule.windows(2) {
            assert_eq!(pair[1].attempt_count, pair[0].attempt_count + 1);
            let gap = |e: &RetryEntry| e.next_eligible_at - e.updated_at;
            assert!(gap(&pair[1]) > gap(&pair[0]));
        }
        assert_eq!(h.extractor.calls(), 5);
        assert_eq!(h.status(&record.id), RecordStatus::ExtractionFailed);
        assert!(h.store.list_retries().unwrap().is_empty());
        assert!(h.notifier.history().iter().any(|n| n.title == "Extraction failed"));

        // Eligible for a manual re-drive
        let unprocessed = h.store.unprocessed_records().unwrap();
        assert_eq!(unprocessed.len(), 1);
        assert_eq!(unprocessed[0].id, record.id);
    }

    #[tokio::test]
    async fn test_delivery_retry_succeeds_later() {
        let h = Harness::new(
            vec![Script::Outcome(ExtractionOutcome::Valid(vec![ExtractedItem::titled("Book venue")]))],
            vec![TrackerScript::Fail("HTTP 503".into()), TrackerScript::Created],
        );
        let record = h.capture("m1");
        let pipeline = h.pipeline();
        pipeline.extract_and_deliver(&record.id, Trigger::Live).await.unwrap();

        let item = h.store.items_for_record(&record.id).unwrap().remove(0);
        assert_eq!(item.status, DeliveryStatus::Pending);
        assert_eq!(h.store.retry_count().unwrap(), 1);

        // Not yet due
        let scheduler = scheduler(&h, pipeline);
        assert_eq!(scheduler.tick().await.unwrap().due, 0);

        h.clock.advance(ChronoDuration::seconds(31));
        scheduler.tick().await.unwrap();
        let item = h.store.get_item(&item.id).unwrap().unwrap();
        assert_eq!(item.status, DeliveryStatus::Delivered);
        assert_eq!(h.store.retry_count().unwrap(), 0);
        assert_eq!(h.tracker.calls(), 2);
    }

    #[tokio::test]
    async fn test_delivery_exhaustion_is_terminal() {
        let h = Harness::new(
            vec![Script::Outcome(ExtractionOutcome::Valid(vec![ExtractedItem::titled("Doomed")]))],
            vec![TrackerScript::Fail("HTTP 500".into()); 5],
        );
        let record = h.capture("m1");
        let pipeline = h.pipeline();
        pipeline.extract_and_deliver(&record.id, Trigger::Live).await.unwrap();

        let scheduler = scheduler(&h, pipeline);
        for _ in 0..4 {
            h.clock.advance(ChronoDuration::hours(2));
            scheduler.tick().await.unwrap();
        }

        let item = h.store.items_for_record(&record.id).unwrap().remove(0);
        assert_eq!(item.status, DeliveryStatus::DeliveryFailed);
        assert_eq!(h.store.retry_count().unwrap(), 0);
        assert!(h.notifier.history().iter().any(|n| n.title == "Delivery failed"));

        // Terminal: another tick does nothing
        h.clock.advance(ChronoDuration::hours(2));
        assert_eq!(scheduler.tick().await.unwrap().due, 0);
        assert_eq!(h.tracker.calls(), 5);
    }

    #[tokio::test]
    async fn test_obsolete_entry_is_dropped() {
        let h = Harness::new(vec![Script::Fail(BridgeError::Http("down".into()))], vec![]);
        let record = h.capture("m1");
        let pipeline = h.pipeline();
        pipeline.extract_and_deliver(&record.id, Trigger::Live).await.unwrap();

        // Someone forced the record to its terminal state while the entry waited
        h.store
            .update_status(&record.id, RecordStatus::ExtractionFailed, h.clock.now())
            .unwrap();
        h.clock.advance(ChronoDuration::minutes(5));
        scheduler(&h, pipeline).tick().await.unwrap();

        assert_eq!(h.store.retry_count().unwrap(), 0);
        assert_eq!(h.extractor.calls(), 1);
    }

    #[tokio::test]
    async fn test_worker_drains_queue() {
        let h = Harness::new(
            vec![Script::Outcome(ExtractionOutcome::Valid(vec![ExtractedItem::titled("Ship")]))],
            vec![],
        );
        let (tx, rx) = mpsc::channel(8);
        let handle = PipelineHandle::new(h.store.clone(), h.clock.clone(), tx);
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(h.pipeline(), rx, cancel.clone()));

        let record = handle.upload("Retro", "We agreed Sam will ship the build.").await.unwrap();
        for _ in 0..100 {
            if h.status(&record.id) == RecordStatus::Extracted {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        worker.await.unwrap().unwrap();

        assert_eq!(h.status(&record.id), RecordStatus::Extracted);
        assert_eq!(h.tracker.calls(), 1);
    }
}
