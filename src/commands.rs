//! One-shot subcommands: `process`, `init`, `status`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use meetbridge_core::clock::{Clock, SystemClock};
use meetbridge_core::config::BridgeConfig;
use meetbridge_core::types::{CandidateRecord, SourceRecord};
use meetbridge_pipeline::{ExtractionResult, Pipeline, PipelineSettings, Trigger};
use meetbridge_providers::{create_extractor, create_tracker};
use meetbridge_scheduler::Notifier;
use meetbridge_store::RecordStore;
use meetbridge_watcher::CacheParser;

const CONFIG_HEADER: &str = "\
# MeetBridge configuration.
#
# Secrets can stay out of this file: TRELLO_API_KEY, TRELLO_API_TOKEN,
# TRELLO_LIST_ID, LLM_API_KEY, SLACK_WEBHOOK_URL and DISCORD_WEBHOOK_URL
# override the values below when set.

";

/// Store every candidate not seen before. Returns only the new records.
fn ingest(store: &RecordStore, candidates: &[CandidateRecord], clock: &dyn Clock) -> Result<Vec<SourceRecord>> {
    let mut created = Vec::new();
    for candidate in candidates {
        let (record, is_new) = store.upsert_if_new(candidate, clock.now())?;
        if is_new {
            tracing::info!("📝 New meeting captured: '{}'", record.title);
            created.push(record);
        }
    }
    Ok(created)
}

/// Parse `file`, store new meetings, then extract and deliver each one.
/// Failures leave retry entries behind for the daemon to pick up.
pub async fn process(config: &BridgeConfig, file: &Path, dry_run: bool) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let candidates = CacheParser::new(config.cache.min_transcript_chars).parse(&bytes)?;
    println!("📂 {}: {} meeting(s) with transcripts", file.display(), candidates.len());

    let store = Arc::new(RecordStore::open(&config.database.resolved_path())?);

    if dry_run {
        for c in &candidates {
            let known = store.get_record_by_external_id(&c.external_id)?.is_some();
            println!(
                "   {} {} ({} chars){}",
                if known { "·" } else { "+" },
                c.title,
                c.content.chars().count(),
                if known { " already known" } else { "" }
            );
        }
        return Ok(());
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let created = ingest(&store, &candidates, clock.as_ref())?;
    if created.is_empty() {
        println!("✅ Nothing new");
        return Ok(());
    }

    let pipeline = Pipeline::new(
        store.clone(),
        Arc::new(create_extractor(config)),
        Arc::new(create_tracker(config)),
        Arc::new(Notifier::new(vec![], clock.clone())),
        clock,
        PipelineSettings::from_config(config),
    );

    for record in &created {
        let outcome = pipeline.extract_and_deliver(&record.id, Trigger::Live).await?;
        let line = match outcome {
            ExtractionResult::Extracted { items, .. } => format!("{} action item(s)", items.len()),
            ExtractionResult::RetryScheduled { attempt, next_eligible_at } => {
                format!("failed (attempt {attempt}), retry after {}", next_eligible_at.to_rfc3339())
            }
            ExtractionResult::Failed { attempts } => format!("gave up after {attempts} attempt(s)"),
            ExtractionResult::Skipped => "skipped".into(),
        };
        println!("   {}: {line}", record.title);
    }

    let undelivered = store.undelivered_items()?.len() + store.retry_count()?;
    if undelivered > 0 {
        println!("⏳ {undelivered} item(s) or meeting(s) left for the daemon to retry");
    }
    Ok(())
}

/// Write the default config to `path`.
pub fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        println!("⚠️  {} already exists (use --force to overwrite)", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(&BridgeConfig::default()).context("serializing default config")?;
    std::fs::write(path, format!("{CONFIG_HEADER}{body}"))?;
    println!("✅ Wrote {}", path.display());
    println!("   Set tracker.api_key, tracker.api_token and tracker.list_id, then run `meetbridge run`.");
    Ok(())
}

/// Print store counters.
pub fn status(config: &BridgeConfig, json: bool) -> Result<()> {
    let path = config.database.resolved_path();
    if !path.exists() {
        println!("No database yet at {} (nothing processed)", path.display());
        return Ok(());
    }
    let store = RecordStore::open(&path)?;
    let stats = store.stats(SystemClock.now())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("📝 MeetBridge v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Database:          {}", path.display());
    println!(
        "   📅 Meetings:          {} total, {} today, {} this week",
        stats.total_records, stats.records_today, stats.records_this_week
    );
    println!(
        "   🧠 Extraction:        {} captured, {} extracting, {} extracted, {} failed",
        stats.captured, stats.extracting, stats.extracted, stats.extraction_failed
    );
    println!(
        "   📬 Action items:      {} total, {} pending, {} delivered, {} failed",
        stats.items_total, stats.items_pending, stats.items_delivered, stats.items_failed
    );
    println!("   🔄 Retries pending:   {}", stats.retries_pending);
    println!("   ▶️  Unprocessed:       {}", stats.unprocessed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        init(&path, false).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("# MeetBridge configuration."));

        let loaded = BridgeConfig::load_from(&path).unwrap();
        loaded.validate().unwrap();
        assert_eq!(loaded.retry.max_attempts, 5);
        assert_eq!(loaded.gateway.port, 8080);
    }

    #[test]
    fn test_init_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[retry]\nmax_attempts = 2\n").unwrap();

        init(&path, false).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[retry]\nmax_attempts = 2\n");

        init(&path, true).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("max_attempts = 5"));
    }

    #[test]
    fn test_ingest_returns_only_new_records() {
        let store = RecordStore::open_in_memory().unwrap();
        let clock = SystemClock;
        let first = vec![
            CandidateRecord::new("a", "first transcript text"),
            CandidateRecord::new("b", "second transcript text"),
        ];
        assert_eq!(ingest(&store, &first, &clock).unwrap().len(), 2);

        let second = vec![
            CandidateRecord::new("b", "second transcript text"),
            CandidateRecord::new("c", "third transcript text"),
        ];
        let created = ingest(&store, &second, &clock).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].external_id, "c");
        assert_eq!(store.record_count().unwrap(), 3);
    }
}
