//! Action-item extraction on top of a [`TextGenerator`].
//!
//! The generator is asked for a JSON array. What comes back is classified
//! into [`ExtractionOutcome`] without trusting any field to be present:
//!
//! - a JSON array (bare, fenced, or embedded in prose) → `Valid`
//! - nothing at all → `Empty`
//! - anything else → `Malformed`
//!
//! Long transcripts are split on sentence boundaries into overlapping
//! chunks; items from every chunk are merged and near-duplicates dropped.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use meetbridge_core::config::LlmConfig;
use meetbridge_core::error::Result;
use meetbridge_core::traits::{Extractor, TextGenerator};
use meetbridge_core::types::{ExtractedItem, ExtractionOutcome};
use serde_json::Value;

const MAX_TITLE_CHARS: usize = 500;
/// How far back from a chunk's end to look for a sentence boundary.
const BOUNDARY_WINDOW: usize = 200;
const DUPLICATE_OVERLAP: f64 = 0.7;
const STOP_WORDS: &[&str] = &["the", "a", "an", "to", "for", "with", "and", "or"];

/// Extracts action items by prompting a text generator.
pub struct ActionExtractor {
    generator: Arc<dyn TextGenerator>,
    chunk_chars: usize,
    chunk_overlap: usize,
}

impl ActionExtractor {
    pub fn new(generator: Arc<dyn TextGenerator>, config: &LlmConfig) -> Self {
        Self {
            generator,
            chunk_chars: config.chunk_chars.max(1),
            chunk_overlap: config.chunk_overlap,
        }
    }

    /// Override chunking (mostly for tests).
    pub fn with_chunking(mut self, chunk_chars: usize, chunk_overlap: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self.chunk_overlap = chunk_overlap;
        self
    }

    async fn extract_chunk(&self, title: &str, chunk: &str, part: Option<(usize, usize)>) -> Result<ExtractionOutcome> {
        let prompt = build_prompt(title, chunk, part);
        // Instructions go in the user turn; several local models ignore system prompts.
        let response = self.generator.complete("", &prompt).await?;
        Ok(parse_response(&response))
    }
}

#[async_trait]
impl Extractor for ActionExtractor {
    fn planned_calls(&self, transcript: &str) -> usize {
        if transcript.chars().count() <= self.chunk_chars {
            1
        } else {
            split_into_chunks(transcript, self.chunk_chars, self.chunk_overlap).len()
        }
    }

    async fn extract(&self, title: &str, transcript: &str) -> Result<ExtractionOutcome> {
        if transcript.chars().count() <= self.chunk_chars {
            return self.extract_chunk(title, transcript, None).await;
        }

        let chunks = split_into_chunks(transcript, self.chunk_chars, self.chunk_overlap);
        tracing::info!(
            "✂️ Long transcript for '{title}' ({} chars), extracting from {} chunks",
            transcript.chars().count(),
            chunks.len()
        );

        let total = chunks.len();
        let mut merged = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            match self.extract_chunk(title, chunk, Some((i + 1, total))).await? {
                ExtractionOutcome::Valid(items) => merged.extend(items),
                other => {
                    tracing::warn!("⚠️ Chunk {}/{total} of '{title}' gave no usable answer", i + 1);
                    return Ok(other);
                }
            }
        }

        let unique = dedupe_items(merged);
        tracing::info!("📋 {} unique action items from {total} chunks", unique.len());
        Ok(ExtractionOutcome::Valid(unique))
    }
}

fn build_prompt(title: &str, transcript: &str, part: Option<(usize, usize)>) -> String {
    let part_note = part
        .map(|(n, total)| format!(" (Part {n} of {total})"))
        .unwrap_or_default();
    format!(
        r#"You are a helpful assistant. Analyze this meeting transcript and extract action items.

Meeting: {title}{part_note}

TRANSCRIPT:
{transcript}

Return ONLY a JSON array of action items. Each item should have these fields:
- title: brief task description (required)
- description: details about what needs to be done
- assignee: person responsible (or null if unknown)
- context: relevant quote from the transcript

Only include clear actionable tasks and commitments. Return [] if no action items.

Example format: [{{"title": "Send report", "assignee": "John", "description": "Send weekly report", "context": "John said he would send the report"}}]

JSON array of action items:"#
    )
}

/// Classify a raw generator answer.
pub fn parse_response(response: &str) -> ExtractionOutcome {
    let text = response.trim();
    if text.is_empty() {
        return ExtractionOutcome::Empty;
    }

    let Some(json_str) = find_json_array(text) else {
        return ExtractionOutcome::Malformed(format!("no JSON array in response: {}", preview(text)));
    };

    let entries = match serde_json::from_str::<Value>(json_str) {
        Ok(Value::Array(entries)) => entries,
        Ok(_) => return ExtractionOutcome::Malformed("response is not a JSON array".into()),
        Err(e) => return ExtractionOutcome::Malformed(format!("invalid JSON: {e}")),
    };

    let items: Vec<ExtractedItem> = entries.iter().filter_map(item_from_value).collect();
    if items.is_empty() && !entries.is_empty() {
        return ExtractionOutcome::Malformed(format!(
            "none of the {} entries had a title",
            entries.len()
        ));
    }
    ExtractionOutcome::Valid(items)
}

fn item_from_value(value: &Value) -> Option<ExtractedItem> {
    let obj = value.as_object()?;
    let title = obj.get("title")?.as_str()?.trim();
    if title.is_empty() {
        return None;
    }
    let text = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    };
    let assignee = obj
        .get("assignee")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|a| !a.is_empty() && !a.eq_ignore_ascii_case("null"))
        .map(str::to_string);

    Some(ExtractedItem {
        title: title.chars().take(MAX_TITLE_CHARS).collect(),
        description: text("description"),
        context: text("context"),
        assignee,
    })
}

/// Bare array, then a fenced block, then the outermost `[...]` span.
fn find_json_array(text: &str) -> Option<&str> {
    if text.starts_with('[') && text.ends_with(']') {
        return Some(text);
    }

    if let Some(open) = text.find("```") {
        let after = &text[open + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(close) = after.find("```") {
            let fenced = after[..close].trim();
            if fenced.starts_with('[') && fenced.ends_with(']') {
                return Some(fenced);
            }
        }
    }

    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (start < end).then(|| &text[start..=end])
}

fn preview(text: &str) -> String {
    let short: String = text.chars().take(80).collect();
    if short.len() < text.len() { format!("{short}...") } else { short }
}

/// Split into overlapping chunks of at most `size` chars, preferring to end
/// a chunk right after ". " or a newline.
pub fn split_into_chunks(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = start + size;
        if end >= chars.len() {
            chunks.push(chars[start..].iter().collect());
            break;
        }

        let search_start = end.saturating_sub(BOUNDARY_WINDOW).max(start);
        let boundary = (search_start..end).rev().find(|&i| {
            chars[i] == '\n' || (chars[i] == '.' && i + 1 < end && chars[i + 1] == ' ')
        });
        if let Some(b) = boundary
            && b > search_start
        {
            end = b + 1;
        }

        chunks.push(chars[start..end].iter().collect());
        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }

    chunks
}

fn title_key(title: &str) -> HashSet<String> {
    title
        .to_lowercase()
        .split_whitespace()
        .filter(|w| !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Drop items whose title shares at least 70% of its key words with an
/// earlier item's title.
pub fn dedupe_items(items: Vec<ExtractedItem>) -> Vec<ExtractedItem> {
    let mut seen: Vec<(HashSet<String>, String)> = Vec::new();
    let mut unique = Vec::new();

    for item in items {
        let key = title_key(&item.title);
        let normalized = item.title.trim().to_lowercase();
        let duplicate = seen.iter().any(|(other, other_title)| {
            if key.is_empty() || other.is_empty() {
                return normalized == *other_title;
            }
            let shared = key.intersection(other).count() as f64;
            shared >= key.len().min(other.len()) as f64 * DUPLICATE_OVERLAP
        });
        if !duplicate {
            seen.push((key, normalized));
            unique.push(item);
        }
    }

    unique
}
