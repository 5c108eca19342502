//! # MeetBridge
//!
//! Watches the meeting app's transcript cache, pulls action items out of
//! new meetings with a local LLM, and files each one as a Trello card.
//!
//! Usage:
//!   meetbridge run                        # Daemon: watcher, pipeline, retries, dashboard
//!   meetbridge process --file cache.json  # One-shot over a cache file
//!   meetbridge init                       # Write ~/.meetbridge/config.toml
//!   meetbridge status                     # Store statistics

mod commands;
mod daemon;

use anyhow::Result;
use clap::{Parser, Subcommand};
use meetbridge_core::config::{BridgeConfig, expand_path};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "meetbridge",
    version,
    about = "📝 MeetBridge: meeting transcripts to Trello cards"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.meetbridge/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon until Ctrl-C
    Run,
    /// Process one cache file and exit
    Process {
        /// Cache file to read
        #[arg(short, long)]
        file: String,
        /// Only list what would be captured
        #[arg(long)]
        dry_run: bool,
    },
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print store statistics
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: bool, json: bool) {
    // Target prefixes: "meetbridge" also covers every meetbridge_* crate
    let filter = if verbose {
        "meetbridge=debug,tower_http=debug"
    } else {
        "meetbridge=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

fn config_path(cli_path: Option<&str>) -> std::path::PathBuf {
    cli_path.map(expand_path).unwrap_or_else(BridgeConfig::default_path)
}

fn load_config(cli_path: Option<&str>) -> Result<BridgeConfig> {
    let path = config_path(cli_path);
    let config = if path.exists() {
        BridgeConfig::load_from(&path)?
    } else {
        if cli_path.is_some() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        tracing::warn!("⚠️ No config at {}, using defaults (run `meetbridge init`)", path.display());
        let mut config = BridgeConfig::default();
        config.apply_env_overrides();
        config
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Run => {
            let config = load_config(cli.config.as_deref())?;
            daemon::run(config).await
        }
        Commands::Process { file, dry_run } => {
            let config = load_config(cli.config.as_deref())?;
            commands::process(&config, &expand_path(&file), dry_run).await
        }
        Commands::Init { force } => commands::init(&config_path(cli.config.as_deref()), force),
        Commands::Status { json } => {
            let config = load_config(cli.config.as_deref())?;
            commands::status(&config, json)
        }
    }
}
