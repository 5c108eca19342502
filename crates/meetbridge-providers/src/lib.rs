//! # MeetBridge Providers
//!
//! Clients for the two external collaborators:
//! - an OpenAI-compatible chat endpoint that turns transcripts into action items
//! - Trello, where each action item becomes a card

pub mod extractor;
pub mod openai_compatible;
pub mod trello;

use std::sync::Arc;

use meetbridge_core::config::BridgeConfig;

pub use extractor::ActionExtractor;
pub use openai_compatible::OpenAiCompatibleGenerator;
pub use trello::{TrelloTracker, format_card_description};

/// Build the extractor from configuration.
pub fn create_extractor(config: &BridgeConfig) -> ActionExtractor {
    let generator = OpenAiCompatibleGenerator::from_config(&config.llm);
    ActionExtractor::new(Arc::new(generator), &config.llm)
}

/// Build the task tracker from configuration.
pub fn create_tracker(config: &BridgeConfig) -> TrelloTracker {
    if !config.tracker.is_configured() {
        tracing::warn!("⚠️ Trello credentials not configured; deliveries will fail and retry");
    }
    TrelloTracker::from_config(&config.tracker)
}
