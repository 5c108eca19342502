//! Daily summary: once a day at a fixed local time, report what the last
//! 24 hours looked like.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone, Utc};
use meetbridge_core::clock::Clock;
use meetbridge_store::{ActivitySummary, RecordStore};
use tokio_util::sync::CancellationToken;

use crate::notify::{Notification, NotifyPriority, Notifier};

/// The first occurrence of `at` strictly after `now`, in `now`'s time zone.
///
/// A time that falls in a DST gap runs an hour later that day.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut day = now.date_naive();
    for _ in 0..3 {
        let naive = day.and_time(at);
        let candidate = tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(naive + chrono::Duration::hours(1))).earliest());
        if let Some(candidate) = candidate
            && candidate > *now
        {
            return candidate;
        }
        match day.checked_add_days(Days::new(1)) {
            Some(next) => day = next,
            None => break,
        }
    }
    now.clone() + chrono::Duration::days(1)
}

pub fn summary_notification(summary: &ActivitySummary, at: DateTime<Utc>) -> Notification {
    let failures = summary.extraction_failures + summary.delivery_failures;
    let mut body = format!(
        "*Daily Summary - {}*\n• Meetings captured: {}\n• Action items extracted: {}\n• Cards created: {}\n",
        at.with_timezone(&Local).format("%Y-%m-%d"),
        summary.records_captured,
        summary.items_extracted,
        summary.items_delivered,
    );
    if failures > 0 {
        body.push_str(&format!(
            "• Failures: {failures} ({} extraction, {} delivery) ⚠️",
            summary.extraction_failures, summary.delivery_failures
        ));
    }

    Notification {
        title: "MeetBridge Daily Summary".into(),
        body,
        priority: if failures > 0 { NotifyPriority::High } else { NotifyPriority::Normal },
        source: "summary".into(),
        timestamp: at,
    }
}

/// Query the last 24 hours and notify. Store errors are logged only.
pub(crate) fn send_summary(store: &RecordStore, notifier: &Notifier, clock: &dyn Clock) {
    let now = clock.now();
    match store.summary_since(now - chrono::Duration::hours(24)) {
        Ok(summary) => {
            tracing::info!(
                "📊 Daily summary: {} meetings, {} items, {} cards",
                summary.records_captured,
                summary.items_extracted,
                summary.items_delivered
            );
            notifier.notify(summary_notification(&summary, now));
        }
        Err(e) => tracing::warn!("⚠️ Failed to build daily summary: {e}"),
    }
}

/// Spawn the daily summary loop.
pub fn spawn_daily_summary(
    store: Arc<RecordStore>,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
    at: NaiveTime,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("📅 Daily summary scheduled at {} local", at.format("%H:%M"));
        loop {
            let now = clock.now();
            let next = next_run_after(&now.with_timezone(&Local), at);
            let wait = (next.with_timezone(&Utc) - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            tracing::debug!("Next daily summary in {}s", wait.as_secs());

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => send_summary(&store, &notifier, clock.as_ref()),
            }
        }
    })
}
