//! Debounced change detector over the cache file.
//!
//! Polls file metadata instead of relying on OS notifications: the cache
//! lives in another application's support directory and is rewritten
//! wholesale, so an mtime/length check per tick is cheap and portable.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use meetbridge_core::clock::Clock;
use meetbridge_core::config::CacheConfig;
use meetbridge_core::error::{BridgeError, Result};
use meetbridge_core::types::WorkItem;
use meetbridge_store::RecordStore;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::parser::CacheParser;

/// Where the detector is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    ChangeDetected,
    Diffing,
}

/// Result of one diff pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The file does not exist right now.
    Missing,
    /// The file exists but could not be read.
    Unreadable(String),
    /// Same bytes as the last successful pass. The store was not touched.
    Unchanged,
    /// The bytes do not parse. Retried on the next tick.
    Malformed(String),
    Scanned { candidates: usize, new_records: usize },
}

/// Counters returned when the detector loop stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectorReport {
    pub passes: u64,
    pub new_records: u64,
    pub last_outcome: Option<PassOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

/// Watches one cache file and forwards new records to the pipeline.
pub struct ChangeDetector {
    path: PathBuf,
    parser: CacheParser,
    store: Arc<RecordStore>,
    clock: Arc<dyn Clock>,
    forward: mpsc::Sender<WorkItem>,
    debounce: Duration,
    poll_interval: Duration,
    state: DetectorState,
    last_fingerprint: Option<Fingerprint>,
    last_hash: Option<[u8; 32]>,
    /// The previous pass failed on input; try again on the next tick.
    needs_retry: bool,
    report: DetectorReport,
}

impl ChangeDetector {
    pub fn new(
        config: &CacheConfig,
        store: Arc<RecordStore>,
        clock: Arc<dyn Clock>,
        forward: mpsc::Sender<WorkItem>,
    ) -> Self {
        Self {
            path: config.resolved_path(),
            parser: CacheParser::new(config.min_transcript_chars),
            store,
            clock,
            forward,
            debounce: Duration::from_millis(config.debounce_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            state: DetectorState::Idle,
            last_fingerprint: None,
            last_hash: None,
            needs_retry: false,
            report: DetectorReport::default(),
        }
    }

    /// Watch a different file than the configured one.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Run until cancelled.
    ///
    /// Every poll tick that sees new metadata, and every message on
    /// `trigger`, (re)starts the debounce window. A burst is capped at ten
    /// debounce windows so a file rewritten continuously still gets diffed.
    /// Store failures end the loop with an error.
    pub async fn run(
        mut self,
        mut trigger: mpsc::Receiver<()>,
        cancel: CancellationToken,
    ) -> Result<DetectorReport> {
        tracing::info!(
            "👀 Watching {} (debounce {}ms, poll {}ms)",
            self.path.display(),
            self.debounce.as_millis(),
            self.poll_interval.as_millis()
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let max_wait = self.debounce * 10;
        let mut burst_started: Option<Instant> = None;
        let mut deadline: Option<Instant> = None;

        loop {
            let wake_at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("👀 Change detector stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if self.file_changed() || self.needs_retry {
                        self.note_change(&mut burst_started, &mut deadline, max_wait);
                    }
                }
                Some(()) = trigger.recv() => {
                    self.note_change(&mut burst_started, &mut deadline, max_wait);
                }
                _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                    deadline = None;
                    burst_started = None;
                    self.diff_pass().await?;
                }
            }
        }

        Ok(self.report)
    }

    fn note_change(
        &mut self,
        burst_started: &mut Option<Instant>,
        deadline: &mut Option<Instant>,
        max_wait: Duration,
    ) {
        let now = Instant::now();
        let started = *burst_started.get_or_insert(now);
        let quiet_at = now + self.debounce;
        *deadline = Some(quiet_at.min(started + max_wait));
        self.state = DetectorState::ChangeDetected;
    }

    /// Compare metadata with the last tick.
    fn file_changed(&mut self) -> bool {
        let current = std::fs::metadata(&self.path).ok().map(|m| Fingerprint {
            modified: m.modified().ok(),
            len: m.len(),
        });
        let changed = match (current, self.last_fingerprint) {
            (Some(now), Some(before)) => now != before,
            (Some(_), None) => true,
            (None, _) => false,
        };
        self.last_fingerprint = current;
        changed
    }

    /// Read, fingerprint, parse, and upsert. Public so one-shot runs can
    /// drive a single pass without the loop.
    pub async fn diff_pass(&mut self) -> Result<PassOutcome> {
        self.state = DetectorState::Diffing;
        self.report.passes += 1;
        let result = self.scan().await;
        self.state = DetectorState::Idle;

        let outcome = result?;
        match &outcome {
            PassOutcome::Missing => {
                tracing::warn!("⚠️ Cache file not found: {}", self.path.display());
                self.needs_retry = true;
            }
            PassOutcome::Unreadable(e) => {
                tracing::warn!("⚠️ Cache file unreadable ({}): {e}", self.path.display());
                self.needs_retry = true;
            }
            PassOutcome::Malformed(e) => {
                tracing::warn!("⚠️ Cache file malformed, will retry: {e}");
                self.needs_retry = true;
            }
            PassOutcome::Unchanged => {
                tracing::debug!("Cache content unchanged");
                self.needs_retry = false;
            }
            PassOutcome::Scanned { candidates, new_records } => {
                tracing::debug!("🔍 Diff pass: {candidates} meeting(s), {new_records} new");
                self.report.new_records += *new_records as u64;
                self.needs_retry = false;
            }
        }
        self.report.last_outcome = Some(outcome.clone());
        Ok(outcome)
    }

    async fn scan(&mut self) -> Result<PassOutcome> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PassOutcome::Missing),
            Err(e) => return Ok(PassOutcome::Unreadable(e.to_string())),
        };

        let hash: [u8; 32] = Sha256::digest(&bytes).into();
        if self.last_hash == Some(hash) {
            return Ok(PassOutcome::Unchanged);
        }

        let candidates = match self.parser.parse(&bytes) {
            Ok(c) => c,
            Err(e) => return Ok(PassOutcome::Malformed(e.to_string())),
        };

        let mut new_records = 0;
        for candidate in &candidates {
            let (record, is_new) = self.store.upsert_if_new(candidate, self.clock.now())?;
            if is_new {
                new_records += 1;
                tracing::info!("📝 New meeting captured: '{}' ({})", record.title, record.external_id);
                self.forward
                    .send(WorkItem::Extract {
                        record_id: record.id.clone(),
                    })
                    .await
                    .map_err(|_| BridgeError::Other("pipeline queue closed".into()))?;
            } else if record.content != candidate.content {
                tracing::debug!(
                    "Content changed for known meeting {}; keeping the first version",
                    record.external_id
                );
            }
        }

        self.last_hash = Some(hash);
        Ok(PassOutcome::Scanned {
            candidates: candidates.len(),
            new_records,
        })
    }
}
