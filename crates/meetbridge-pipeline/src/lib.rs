//! # MeetBridge Pipeline
//!
//! ```text
//! WorkItem::Extract ─► ExtractionStage ─► complete_extraction ─► DeliveryStage (per item)
//!                            │                                        │
//!                            └─ failure ─► retry entry / terminal     └─ failure ─► retry entry / terminal
//! RetryScheduler ─► Pipeline (RetryHandler) ─► same stages, retry path
//! ```
//!
//! Both stages claim their target through the store before calling out,
//! so a live attempt and a scheduled retry never run for the same target
//! at once. Collaborator failures never escape a stage; only store errors do.

pub mod delivery;
pub mod extraction;
pub mod handle;
pub mod pipeline;

#[cfg(test)]
mod testing;

pub use delivery::{DeliveryResult, DeliveryStage};
pub use extraction::{ExtractionResult, ExtractionStage};
pub use handle::{PipelineHandle, ResumeReport};
pub use pipeline::{Pipeline, PipelineSettings, run_worker};

/// Which path started an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// First attempt, from the detector, an upload, or a manual re-drive.
    Live,
    /// Scheduled re-attempt; the retry entry is already claimed.
    Retry,
}

impl Trigger {
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry)
    }
}
