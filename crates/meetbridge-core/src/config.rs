//! MeetBridge configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl BridgeConfig {
    /// Load config from the default path (~/.meetbridge/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Load config from a specific path, then apply environment secrets.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("Failed to read config: {e}")))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {e}")))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Write config to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| BridgeError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the MeetBridge home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".meetbridge")
    }

    /// Secrets from the environment win over the file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("TRELLO_API_KEY") {
            self.tracker.api_key = v;
        }
        if let Some(v) = get("TRELLO_API_TOKEN") {
            self.tracker.api_token = v;
        }
        if let Some(v) = get("TRELLO_LIST_ID") {
            self.tracker.list_id = v;
        }
        if let Some(v) = get("LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = get("SLACK_WEBHOOK_URL") {
            self.notifications.slack_webhook_url = Some(v);
        }
        if let Some(v) = get("DISCORD_WEBHOOK_URL") {
            self.notifications.discord_webhook_url = Some(v);
        }
    }

    /// Reject settings the retry machinery cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(BridgeError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.base_delay_secs == 0 {
            return Err(BridgeError::Config("retry.base_delay_secs must be at least 1".into()));
        }
        if self.retry.max_delay_secs < self.retry.base_delay_secs {
            return Err(BridgeError::Config(
                "retry.max_delay_secs must not be below retry.base_delay_secs".into(),
            ));
        }
        if self.llm.chunk_overlap >= self.llm.chunk_chars {
            return Err(BridgeError::Config("llm.chunk_overlap must be below llm.chunk_chars".into()));
        }
        self.notifications.summary_time()?;
        Ok(())
    }
}

/// Expand a leading `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// Watched cache file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_path")]
    pub path: String,
    /// Quiet period after the last change before a diff pass runs.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Shorter transcripts are skipped.
    #[serde(default = "default_min_transcript_chars")]
    pub min_transcript_chars: usize,
}

fn default_cache_path() -> String { "~/Library/Application Support/Granola/cache-v3.json".into() }
fn default_debounce_ms() -> u64 { 500 }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_min_transcript_chars() -> usize { 20 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            min_transcript_chars: default_min_transcript_chars(),
        }
    }
}

impl CacheConfig {
    pub fn resolved_path(&self) -> PathBuf {
        expand_path(&self.path)
    }
}

/// Text-generation endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_llm_base_url() -> String { "http://localhost:1234/v1".into() }
fn default_llm_model() -> String { "local-model".into() }
fn default_llm_timeout() -> u64 { 120 }
fn default_llm_temperature() -> f32 { 0.1 }
fn default_llm_max_tokens() -> u32 { 2000 }
fn default_chunk_chars() -> usize { 5000 }
fn default_chunk_overlap() -> usize { 500 }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: String::new(),
            timeout_secs: default_llm_timeout(),
            temperature: default_llm_temperature(),
            max_tokens: default_llm_max_tokens(),
            chunk_chars: default_chunk_chars(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

/// Task tracker (Trello) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_tracker_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub list_id: String,
    #[serde(default = "default_tracker_timeout")]
    pub timeout_secs: u64,
}

fn default_tracker_base_url() -> String { "https://api.trello.com/1".into() }
fn default_tracker_timeout() -> u64 { 30 }

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_tracker_base_url(),
            api_key: String::new(),
            api_token: String::new(),
            list_id: String::new(),
            timeout_secs: default_tracker_timeout(),
        }
    }
}

impl TrackerConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.api_token.is_empty() && !self.list_id.is_empty()
    }
}

/// Retry scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    #[serde(default = "default_retry_poll")]
    pub poll_interval_secs: u64,
    /// Due entries handled per scheduler tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_max_attempts() -> u32 { 5 }
fn default_base_delay() -> u64 { 30 }
fn default_max_delay() -> u64 { 3600 }
fn default_retry_poll() -> u64 { 5 }
fn default_batch_size() -> usize { 50 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
            poll_interval_secs: default_retry_poll(),
            batch_size: default_batch_size(),
        }
    }
}

/// Dashboard server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL used in links back to a meeting.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

fn bool_true() -> bool { true }
fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 8080 }
fn default_public_url() -> String { "http://127.0.0.1:8080".into() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

impl GatewayConfig {
    /// Dashboard link for one meeting.
    pub fn meeting_link(&self, record_id: &str) -> String {
        format!("{}/meetings/{}", self.public_url.trim_end_matches('/'), record_id)
    }
}

/// Outbound notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    #[serde(default)]
    pub discord_webhook_url: Option<String>,
    /// Generic JSON webhook.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "bool_true")]
    pub daily_summary_enabled: bool,
    /// Local time of day, "HH:MM".
    #[serde(default = "default_summary_time")]
    pub daily_summary_time: String,
    #[serde(default = "bool_true")]
    pub notify_on_success: bool,
}

fn default_summary_time() -> String { "09:00".into() }

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            slack_webhook_url: None,
            discord_webhook_url: None,
            webhook_url: None,
            daily_summary_enabled: true,
            daily_summary_time: default_summary_time(),
            notify_on_success: true,
        }
    }
}

impl NotificationsConfig {
    /// Parsed `daily_summary_time`.
    pub fn summary_time(&self) -> Result<chrono::NaiveTime> {
        chrono::NaiveTime::parse_from_str(self.daily_summary_time.trim(), "%H:%M").map_err(|e| {
            BridgeError::Config(format!(
                "Invalid daily_summary_time '{}': {e}",
                self.daily_summary_time
            ))
        })
    }
}

/// Record store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.meetbridge/bridge.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        expand_path(&self.path)
    }
}
