//! Scripted collaborators and a store-backed harness for stage tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use meetbridge_core::clock::{Clock, ManualClock};
use meetbridge_core::error::{BridgeError, Result};
use meetbridge_core::policy::RetryPolicy;
use meetbridge_core::traits::{Extractor, TaskTracker};
use meetbridge_core::types::{
    ActionItem, CandidateRecord, CreatedTask, ExtractedItem, ExtractionOutcome, RecordStatus, SourceRecord,
    TaskRequest,
};
use meetbridge_scheduler::Notifier;
use meetbridge_store::RecordStore;

use crate::delivery::DeliveryStage;
use crate::extraction::ExtractionStage;
use crate::pipeline::{Pipeline, PipelineSettings};

pub enum Script {
    Outcome(ExtractionOutcome),
    Fail(BridgeError),
    /// Never answers within any sane timeout.
    Hang,
}

/// Plays back one script step per call; an exhausted script returns no items.
#[derive(Default)]
pub struct FakeExtractor {
    script: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(&self, _title: &str, _transcript: &str) -> Result<ExtractionOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        match step {
            None => Ok(ExtractionOutcome::Valid(vec![])),
            Some(Script::Outcome(outcome)) => Ok(outcome),
            Some(Script::Fail(e)) => Err(e),
            Some(Script::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ExtractionOutcome::Empty)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum TrackerScript {
    Created,
    Fail(String),
    Hang,
}

/// Records every request; an exhausted script creates the task.
#[derive(Default)]
pub struct FakeTracker {
    script: Mutex<VecDeque<TrackerScript>>,
    requests: Mutex<Vec<TaskRequest>>,
    created: AtomicUsize,
}

impl FakeTracker {
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<TaskRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskTracker for FakeTracker {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create_task(&self, request: &TaskRequest) -> Result<CreatedTask> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self.script.lock().unwrap().pop_front();
        match step.unwrap_or(TrackerScript::Created) {
            TrackerScript::Created => {
                let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(CreatedTask {
                    id: format!("card-{n}"),
                    url: Some(format!("https://trello.test/c/card-{n}")),
                })
            }
            TrackerScript::Fail(message) => Err(BridgeError::Tracker(message)),
            TrackerScript::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(BridgeError::Tracker("hung".into()))
            }
        }
    }
}

pub struct Harness {
    pub store: Arc<RecordStore>,
    pub clock: Arc<ManualClock>,
    pub extractor: Arc<FakeExtractor>,
    pub tracker: Arc<FakeTracker>,
    pub notifier: Arc<Notifier>,
    pub policy: RetryPolicy,
    pub settings: PipelineSettings,
}

impl Harness {
    pub fn new(extractions: Vec<Script>, deliveries: Vec<TrackerScript>) -> Self {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()));
        let extractor = FakeExtractor::default();
        extractor.script.lock().unwrap().extend(extractions);
        let tracker = FakeTracker::default();
        tracker.script.lock().unwrap().extend(deliveries);
        let settings = PipelineSettings::default();

        Self {
            store: Arc::new(RecordStore::open_in_memory().unwrap()),
            notifier: Arc::new(Notifier::new(vec![], clock.clone())),
            clock,
            extractor: Arc::new(extractor),
            tracker: Arc::new(tracker),
            policy: settings.policy,
            settings,
        }
    }

    pub fn capture(&self, external_id: &str) -> SourceRecord {
        let candidate = CandidateRecord::new(external_id, "Alex: let's ship on Friday. Sam: I'll write the notes.")
            .with_title(format!("Meeting {external_id}"));
        self.store.upsert_if_new(&candidate, self.clock.now()).unwrap().0
    }

    pub fn status(&self, record_id: &str) -> RecordStatus {
        self.store.get_record(record_id).unwrap().unwrap().status
    }

    /// Drive a record straight to `extracted` with the given items.
    pub fn extracted(&self, record_id: &str, items: Vec<ExtractedItem>) -> Vec<ActionItem> {
        let now = self.clock.now();
        self.store.start_extraction(record_id, false, now).unwrap().unwrap();
        self.store.complete_extraction(record_id, &items, now).unwrap()
    }

    pub fn extraction(&self) -> ExtractionStage {
        ExtractionStage::new(
            self.store.clone(),
            self.extractor.clone(),
            self.notifier.clone(),
            self.clock.clone(),
            self.policy,
            self.settings.extraction_timeout,
        )
    }

    pub fn delivery(&self) -> DeliveryStage {
        DeliveryStage::new(
            self.store.clone(),
            self.tracker.clone(),
            self.notifier.clone(),
            self.clock.clone(),
            self.policy,
            self.settings.delivery_timeout,
            self.settings.gateway.clone(),
        )
    }

    pub fn pipeline(&self) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            self.store.clone(),
            self.extractor.clone(),
            self.tracker.clone(),
            self.notifier.clone(),
            self.clock.clone(),
            self.settings.clone(),
        ))
    }
}
