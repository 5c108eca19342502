//! Entry points that put work on the queue: dashboard actions and startup.

use std::sync::Arc;

use meetbridge_core::clock::Clock;
use meetbridge_core::error::{BridgeError, Result};
use meetbridge_core::policy::RetryPolicy;
use meetbridge_core::types::{SourceRecord, WorkItem};
use meetbridge_store::{RecordStore, RecoveryReport};
use tokio::sync::mpsc;

/// Cheap, cloneable sender side of the pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    store: Arc<RecordStore>,
    clock: Arc<dyn Clock>,
    queue: mpsc::Sender<WorkItem>,
}

/// What happened at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeReport {
    pub recovery: RecoveryReport,
    /// Records accepted earlier but never attempted.
    pub records_enqueued: usize,
    /// Items extracted earlier but never sent.
    pub items_enqueued: usize,
}

impl PipelineHandle {
    pub fn new(store: Arc<RecordStore>, clock: Arc<dyn Clock>, queue: mpsc::Sender<WorkItem>) -> Self {
        Self { store, clock, queue }
    }

    pub async fn enqueue(&self, work: WorkItem) -> Result<()> {
        self.queue
            .send(work)
            .await
            .map_err(|_| BridgeError::Other("pipeline queue closed".into()))
    }

    /// Store a hand-uploaded transcript and queue it for extraction.
    pub async fn upload(&self, title: &str, transcript: &str) -> Result<SourceRecord> {
        if transcript.trim().is_empty() {
            return Err(BridgeError::Parse("transcript is empty".into()));
        }
        let title = match title.trim() {
            "" => "Uploaded Meeting",
            t => t,
        };
        let record = self.store.insert_upload(title, transcript, self.clock.now())?;
        tracing::info!("📤 Uploaded transcript '{}' ({})", record.title, record.id);
        self.enqueue(WorkItem::Extract {
            record_id: record.id.clone(),
        })
        .await?;
        Ok(record)
    }

    /// Queue every record that is neither done nor waiting on a retry.
    /// Terminally failed records start over with a fresh attempt count.
    pub async fn process_unprocessed(&self) -> Result<usize> {
        let records = self.store.unprocessed_records()?;
        for record in &records {
            self.enqueue(WorkItem::Extract {
                record_id: record.id.clone(),
            })
            .await?;
        }
        if !records.is_empty() {
            tracing::info!("▶️ Queued {} unprocessed meeting(s)", records.len());
        }
        Ok(records.len())
    }

    /// Send a `delivery_failed` item again, starting a fresh attempt count.
    /// Returns `false` when the item is not in that state.
    pub async fn redrive_item(&self, item_id: &str) -> Result<bool> {
        if !self.store.redrive_delivery(item_id, self.clock.now())? {
            return Ok(false);
        }
        tracing::info!("▶️ Re-driving failed delivery {item_id}");
        self.enqueue(WorkItem::Deliver {
            item_id: item_id.to_string(),
        })
        .await?;
        Ok(true)
    }

    /// Make a waiting retry due now; the scheduler runs it on its next tick.
    pub fn retry_now(&self, entry_id: &str) -> Result<bool> {
        let moved = self.store.retry_now(entry_id, self.clock.now())?;
        if moved {
            tracing::info!("⏩ Retry {entry_id} moved up to now");
        }
        Ok(moved)
    }

    /// Drop a waiting retry. Its target stays where it is and can be
    /// re-driven later.
    pub fn discard_retry(&self, entry_id: &str) -> Result<bool> {
        let dropped = self.store.discard_retry(entry_id)?;
        if dropped {
            tracing::info!("🗑️ Retry {entry_id} discarded");
        }
        Ok(dropped)
    }

    /// Repair interrupted work, then queue whatever was accepted but never
    /// attempted. Run once before the detector and scheduler start.
    pub async fn resume(&self, policy: &RetryPolicy) -> Result<ResumeReport> {
        let recovery = self.store.recover_interrupted(policy, self.clock.now())?;

        let records = self.store.pending_captured()?;
        for record in &records {
            self.enqueue(WorkItem::Extract {
                record_id: record.id.clone(),
            })
            .await?;
        }
        let items = self.store.undelivered_items()?;
        for item in &items {
            self.enqueue(WorkItem::Deliver {
                item_id: item.id.clone(),
            })
            .await?;
        }

        if !records.is_empty() || !items.is_empty() {
            tracing::info!(
                "▶️ Resuming {} meeting(s) and {} undelivered item(s)",
                records.len(),
                items.len()
            );
        }
        Ok(ResumeReport {
            recovery,
            records_enqueued: records.len(),
            items_enqueued: items.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Trigger;
    use crate::DeliveryResult;
    use crate::testing::{Harness, Script, TrackerScript};
    use meetbridge_core::error::BridgeError;
    use meetbridge_core::types::{
        DeliveryStatus, ExtractedItem, ExtractionOutcome, RecordSource, RecordStatus, RetryKind,
    };

    fn handle(h: &Harness, capacity: usize) -> (PipelineHandle, mpsc::Receiver<WorkItem>) {
        let (tx, rx) = mpsc::channel(capacity);
        (PipelineHandle::new(h.store.clone(), h.clock.clone(), tx), rx)
    }

    #[tokio::test]
    async fn test_upload_enqueues_extraction() {
        let h = Harness::new(vec![], vec![]);
        let (handle, mut rx) = handle(&h, 4);

        let record = handle.upload("  ", "Dana will book the venue.").await.unwrap();
        assert_eq!(record.title, "Uploaded Meeting");
        assert_eq!(record.source, RecordSource::Upload);
        assert_eq!(
            rx.try_recv().unwrap(),
            WorkItem::Extract {
                record_id: record.id.clone()
            }
        );

        assert!(matches!(handle.upload("x", "   ").await, Err(BridgeError::Parse(_))));
        assert_eq!(h.store.record_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_process_unprocessed_skips_done_and_waiting() {
        let h = Harness::new(
            vec![
                Script::Outcome(ExtractionOutcome::Valid(vec![])),
                Script::Fail(BridgeError::Http("down".into())),
            ],
            vec![],
        );
        let done = h.capture("done");
        let waiting = h.capture("waiting");
        let fresh = h.capture("fresh");
        h.extraction().run(&done.id, Trigger::Live).await.unwrap();
        h.extraction().run(&waiting.id, Trigger::Live).await.unwrap();

        let (handle, mut rx) = handle(&h, 8);
        assert_eq!(handle.process_unprocessed().await.unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), WorkItem::Extract { record_id: fresh.id });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_redrive_failed_item_enqueues_delivery() {
        let h = Harness::new(vec![], vec![]);
        let record = h.capture("m1");
        let items = h.extracted(&record.id, vec![ExtractedItem::titled("Book the venue")]);
        let item_id = items[0].id.clone();
        let (handle, mut rx) = handle(&h, 8);

        // Still pending: nothing to re-drive
        assert!(!handle.redrive_item(&item_id).await.unwrap());

        for _ in 0..h.policy.max_attempts {
            h.store
                .fail_delivery(&item_id, "401 unauthorized", &h.policy, h.clock.now())
                .unwrap();
        }
        assert_eq!(
            h.store.get_item(&item_id).unwrap().unwrap().status,
            DeliveryStatus::DeliveryFailed
        );

        assert!(handle.redrive_item(&item_id).await.unwrap());
        assert_eq!(rx.try_recv().unwrap(), WorkItem::Deliver { item_id: item_id.clone() });

        // The queued work goes through the live path and lands
        let delivered = h.delivery().run(&item_id, Trigger::Live).await.unwrap();
        assert!(matches!(delivered, DeliveryResult::Delivered { .. }), "got {delivered:?}");
        assert_eq!(h.tracker.calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_now_and_discard() {
        let h = Harness::new(vec![Script::Fail(BridgeError::Http("down".into()))], vec![]);
        let record = h.capture("m1");
        h.extraction().run(&record.id, Trigger::Live).await.unwrap();
        let entry = h.store.retry_for(RetryKind::Extraction, &record.id).unwrap().unwrap();
        let (handle, _rx) = handle(&h, 8);

        assert!(h.store.due_retries(h.clock.now(), 10).unwrap().is_empty());
        assert!(handle.retry_now(&entry.id).unwrap());
        assert_eq!(h.store.due_retries(h.clock.now(), 10).unwrap().len(), 1);

        assert!(handle.discard_retry(&entry.id).unwrap());
        assert!(!handle.discard_retry(&entry.id).unwrap());
        // Nothing scheduled any more, so a manual run can pick it up
        assert_eq!(h.store.unprocessed_records().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restart_mid_extraction_gets_fresh_entry() {
        let h = Harness::new(vec![], vec![]);
        let record = h.capture("m1");
        let now = h.clock.now();
        // Crash: claimed for extraction, call never returned, no retry entry
        h.store.start_extraction(&record.id, false, now).unwrap().unwrap();
        assert_eq!(h.status(&record.id), RecordStatus::Extracting);

        let (handle, mut rx) = handle(&h, 8);
        let report = handle.resume(&h.policy).await.unwrap();

        assert_eq!(report.recovery.requeued_records, vec![record.id.clone()]);
        assert_eq!(h.status(&record.id), RecordStatus::Captured);
        let entry = h.store.retry_for(RetryKind::Extraction, &record.id).unwrap().unwrap();
        assert_eq!(entry.attempt_count, 1);
        assert_eq!(entry.next_eligible_at, now + h.policy.delay_for(1));
        // The entry owns it now; nothing goes on the live queue
        assert_eq!(report.records_enqueued, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resume_enqueues_never_attempted_work() {
        let h = Harness::new(vec![], vec![TrackerScript::Created]);
        let untouched = h.capture("untouched");
        let other = h.capture("other");
        let items = h.extracted(&other.id, vec![ExtractedItem::titled("Unsent")]);

        let (handle, mut rx) = handle(&h, 8);
        let report = handle.resume(&h.policy).await.unwrap();
        assert!(report.recovery.is_clean());
        assert_eq!(report.records_enqueued, 1);
        assert_eq!(report.items_enqueued, 1);
        assert_eq!(rx.try_recv().unwrap(), WorkItem::Extract { record_id: untouched.id });
        assert_eq!(rx.try_recv().unwrap(), WorkItem::Deliver { item_id: items[0].id.clone() });
    }
}
