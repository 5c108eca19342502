//! `meetbridge run`: wire every component together and run until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use meetbridge_core::clock::{Clock, SystemClock};
use meetbridge_core::config::BridgeConfig;
use meetbridge_gateway::AppState;
use meetbridge_pipeline::{Pipeline, PipelineHandle, PipelineSettings, run_worker};
use meetbridge_providers::{create_extractor, create_tracker};
use meetbridge_scheduler::{Notifier, RetryScheduler, spawn_daily_summary, spawn_retry_scheduler, targets_from_config};
use meetbridge_store::RecordStore;
use meetbridge_watcher::ChangeDetector;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const QUEUE_CAPACITY: usize = 256;

pub async fn run(config: BridgeConfig) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let db_path = config.database.resolved_path();
    let store = Arc::new(RecordStore::open(&db_path)?);
    tracing::info!("💾 Record store: {}", db_path.display());

    let targets = targets_from_config(&config.notifications);
    if targets.is_empty() {
        tracing::info!("🔕 No notification targets configured");
    } else {
        let names: Vec<_> = targets.iter().map(|(name, _)| name.as_str()).collect();
        tracing::info!("🔔 Notifying via {}", names.join(", "));
    }
    let notifier = Arc::new(Notifier::new(targets, clock.clone()));

    let settings = PipelineSettings::from_config(&config);
    let policy = settings.policy;
    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        Arc::new(create_extractor(&config)),
        Arc::new(create_tracker(&config)),
        notifier.clone(),
        clock.clone(),
        settings,
    ));

    let cancel = CancellationToken::new();
    let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
    let handle = PipelineHandle::new(store.clone(), clock.clone(), queue_tx.clone());

    // The worker drains the queue before recovery fills it.
    let mut worker = tokio::spawn(run_worker(pipeline.clone(), queue_rx, cancel.clone()));

    let resumed = handle.resume(&policy).await?;
    if resumed.recovery.is_clean() {
        tracing::info!("✅ Clean start");
    } else {
        tracing::info!(
            "🩹 Recovered {} interrupted meeting(s), {} interrupted deliver{}",
            resumed.recovery.requeued_records.len() + resumed.recovery.released_records,
            resumed.recovery.requeued_items.len(),
            if resumed.recovery.requeued_items.len() == 1 { "y" } else { "ies" }
        );
    }

    let (_trigger_tx, trigger_rx) = mpsc::channel(1);
    let detector = ChangeDetector::new(&config.cache, store.clone(), clock.clone(), queue_tx);
    let mut detector = tokio::spawn(detector.run(trigger_rx, cancel.clone()));

    let scheduler = Arc::new(RetryScheduler::new(
        store.clone(),
        pipeline,
        clock.clone(),
        config.retry.batch_size,
    ));
    let mut retries = spawn_retry_scheduler(
        scheduler,
        Duration::from_secs(config.retry.poll_interval_secs.max(1)),
        cancel.clone(),
    );

    let summary = if config.notifications.daily_summary_enabled {
        Some(spawn_daily_summary(
            store.clone(),
            notifier.clone(),
            clock.clone(),
            config.notifications.summary_time()?,
            cancel.clone(),
        ))
    } else {
        None
    };

    let gateway = if config.gateway.enabled {
        let state = Arc::new(AppState {
            gateway_config: config.gateway.clone(),
            start_time: std::time::Instant::now(),
            store: store.clone(),
            notifier: notifier.clone(),
            pipeline: handle,
            clock: clock.clone(),
        });
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = meetbridge_gateway::start(state, cancel).await {
                tracing::error!("❌ Dashboard failed: {e}");
            }
        }))
    } else {
        None
    };

    tracing::info!("📝 MeetBridge v{} running. Ctrl-C to stop.", env!("CARGO_PKG_VERSION"));

    let mut failure: Option<anyhow::Error> = None;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("🛑 Shutting down"),
        done = &mut worker => {
            failure = Some(match done {
                Ok(Ok(())) => anyhow::anyhow!("pipeline worker exited"),
                Ok(Err(e)) => e.into(),
                Err(e) => e.into(),
            });
        }
        done = &mut detector => {
            failure = Some(match done {
                Ok(Ok(_)) => anyhow::anyhow!("change detector exited"),
                Ok(Err(e)) => e.into(),
                Err(e) => e.into(),
            });
        }
        done = &mut retries => {
            failure = Some(match done {
                Ok(Ok(())) => anyhow::anyhow!("retry scheduler exited"),
                Ok(Err(e)) => e.into(),
                Err(e) => e.into(),
            });
        }
    }
    cancel.cancel();

    // Whatever already finished was consumed by the select above.
    if !worker.is_finished() {
        let _ = worker.await;
    }
    if !detector.is_finished() {
        let _ = detector.await;
    }
    if !retries.is_finished() {
        let _ = retries.await;
    }
    if let Some(summary) = summary {
        let _ = summary.await;
    }
    if let Some(gateway) = gateway {
        let _ = gateway.await;
    }

    match failure {
        Some(e) => {
            tracing::error!("❌ MeetBridge stopped: {e}");
            Err(e)
        }
        None => {
            tracing::info!("👋 Stopped");
            Ok(())
        }
    }
}
