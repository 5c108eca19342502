//! Retry scheduler engine: wakes on an interval, finds due retry entries,
//! and hands each one to a [`RetryHandler`].
//!
//! The scheduler only claims and releases entries. Whatever the handler
//! decides (success, next attempt, terminal failure) is written by the
//! handler through the store, so the scheduler never needs to know what an
//! extraction or a delivery is.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use meetbridge_core::clock::Clock;
use meetbridge_core::error::Result;
use meetbridge_core::types::RetryEntry;
use meetbridge_store::RecordStore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Runs one re-attempt for a claimed entry.
///
/// Implemented by the pipeline. Keeps this crate free of a dependency on
/// the stages.
#[async_trait]
pub trait RetryHandler: Send + Sync {
    /// The entry is claimed (in flight) when this is called.
    async fn handle_retry(&self, entry: &RetryEntry) -> Result<()>;
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub claimed: usize,
    pub handled: usize,
    pub errors: usize,
}

pub struct RetryScheduler {
    store: Arc<RecordStore>,
    handler: Arc<dyn RetryHandler>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl RetryScheduler {
    pub fn new(
        store: Arc<RecordStore>,
        handler: Arc<dyn RetryHandler>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            handler,
            clock,
            batch_size: batch_size.max(1),
        }
    }

    /// Process every entry due now, oldest-due first, one at a time.
    ///
    /// An entry another worker already holds is skipped. A handler error
    /// releases the entry so the next tick picks it up again; a fatal
    /// (store) error stops the batch.
    pub async fn tick(&self) -> Result<TickReport> {
        let due = self.store.due_retries(self.clock.now(), self.batch_size)?;
        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };
        if due.is_empty() {
            return Ok(report);
        }
        tracing::info!("🔄 {} retry entr{} due", due.len(), if due.len() == 1 { "y" } else { "ies" });

        for entry in &due {
            if !self.store.claim_retry(&entry.id)? {
                tracing::debug!("Retry {} already in flight, skipping", entry.id);
                continue;
            }
            report.claimed += 1;

            match self.handler.handle_retry(entry).await {
                Ok(()) => report.handled += 1,
                Err(e) if e.is_fatal() => {
                    self.store.release_retry(&entry.id).ok();
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Retry of {} {} errored, releasing: {e}",
                        entry.kind.as_str(),
                        entry.target_id
                    );
                    self.store.release_retry(&entry.id)?;
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Spawn the retry loop as a background tokio task.
///
/// A failed tick is logged and the loop carries on at the next interval.
/// A fatal (store) error ends the loop and is returned through the handle.
pub fn spawn_retry_scheduler(
    scheduler: Arc<RetryScheduler>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(async move {
        tracing::info!("⏰ Retry scheduler started (check every {}s)", interval.as_secs());
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => match scheduler.tick().await {
                    Ok(_) => {}
                    Err(e) if e.is_fatal() => {
                        tracing::error!("❌ Retry scheduler stopping on store error: {e}");
                        return Err(e);
                    }
                    Err(e) => tracing::error!("❌ Retry scheduler tick failed: {e}"),
                },
            }
        }
        tracing::info!("⏰ Retry scheduler stopped");
        Ok(())
    })
}
