//! Text-generation seams.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ExtractionOutcome;

/// A chat-completion style text generator.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generator name for logs.
    fn name(&self) -> &str;

    /// Run one completion. Transport failures are `Err`; a blank answer is `Ok("")`.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Turns a transcript into action items.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Text-generator calls one `extract` of this transcript makes.
    /// Callers bound each call, not the whole extraction.
    fn planned_calls(&self, _transcript: &str) -> usize {
        1
    }

    async fn extract(&self, title: &str, transcript: &str) -> Result<ExtractionOutcome>;
}
