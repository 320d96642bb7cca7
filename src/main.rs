//! # BadgeFlow
//!
//! Runs scheduled community automations against a SQLite database.
//!
//! Usage:
//!   badgeflow run                       # Tick loop (every scheduler.tick_interval_secs)
//!   badgeflow once                      # Execute everything due now, print a JSON report
//!   badgeflow once --automation 12      # Execute one automation regardless of schedule
//!   badgeflow list                      # Print stored automations
//!   badgeflow next-run '{"frequency":"daily","hour":9}'

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use badgeflow_core::BadgeFlowConfig;
use badgeflow_core::traits::BaseUrlBuilder;
use badgeflow_core::types::{Cadence, RunStatus};
use badgeflow_providers::{LlmQualificationOracle, PromptGenerationAdapter, RuleSpamClassifier};
use badgeflow_scheduler::cadence::next_run_after;
use badgeflow_scheduler::{AdapterRegistry, AutomationRunner, Services, SqliteStore, spawn_runner};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "badgeflow",
    version,
    about = "🏅 BadgeFlow: scheduled badge awarders and generative posts"
)]
struct Cli {
    /// Config file (default: ~/.badgeflow/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Override the database path from the config
    #[arg(long, global = true)]
    database: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler loop until Ctrl-C
    Run,
    /// Execute due automations once and print the reports
    Once {
        /// Execute only this automation, ignoring its schedule
        #[arg(long)]
        automation: Option<i64>,
    },
    /// Print every stored automation as JSON
    List,
    /// Print the next fire time for a cadence given as JSON
    NextRun {
        cadence: String,
        /// Reference time (RFC 3339), default now
        #[arg(long)]
        after: Option<String>,
    },
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn init_logging(cli: &Cli) {
    let default = if cli.verbose {
        "badgeflow=debug,badgeflow_scheduler=debug,badgeflow_providers=debug"
    } else {
        "badgeflow=info,badgeflow_scheduler=info,badgeflow_providers=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn load_config(cli: &Cli) -> Result<BadgeFlowConfig> {
    let mut config = match &cli.config {
        Some(path) => BadgeFlowConfig::load_from(&expand_path(path))
            .with_context(|| format!("loading config from {path}"))?,
        None => BadgeFlowConfig::load()?,
    };
    if let Some(db) = &cli.database {
        config.database_path = db.clone();
    }
    Ok(config)
}

fn open_store(config: &BadgeFlowConfig) -> Result<Arc<SqliteStore>> {
    let path = expand_path(&config.database_path);
    let store = SqliteStore::open(Path::new(&path))
        .with_context(|| format!("opening database {}", path.display()))?;
    Ok(Arc::new(store))
}

fn build_runner(config: &BadgeFlowConfig, store: Arc<SqliteStore>) -> Result<AutomationRunner> {
    let chat = badgeflow_providers::create_chat_client(config)?;
    let adapters = AdapterRegistry::new().with(Arc::new(PromptGenerationAdapter::new(chat.clone())));
    let services = Services::with_store(
        store,
        Arc::new(LlmQualificationOracle::new(chat)),
        Arc::new(RuleSpamClassifier::new(&config.spam)),
        Arc::new(BaseUrlBuilder::new(&config.base_url)),
    )
    .with_adapters(adapters)
    .with_config(config);
    Ok(AutomationRunner::new(services, config.scheduler.clone()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match &cli.command {
        Command::NextRun { cadence, after } => {
            let cadence: Cadence = serde_json::from_str(cadence).context("parsing cadence JSON")?;
            let after = match after {
                Some(s) => DateTime::parse_from_rfc3339(s)
                    .context("parsing --after")?
                    .with_timezone(&Utc),
                None => Utc::now(),
            };
            println!("{}", next_run_after(&cadence, after)?.to_rfc3339());
        }
        Command::List => {
            let config = load_config(&cli)?;
            let store = open_store(&config)?;
            let records = store.list_automations()?;
            for record in records.iter().filter(|r| r.status == RunStatus::Running) {
                if let Some(since) = record.started_at {
                    tracing::warn!("⏳ Automation {} running since {}", record.id, since.to_rfc3339());
                }
            }
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Command::Once { automation } => {
            let config = load_config(&cli)?;
            let runner = build_runner(&config, open_store(&config)?)?;
            let now = Utc::now();
            let reports = match automation {
                Some(id) => vec![runner.run_automation(*id, now).await?],
                None => runner.run_due(now).await?,
            };
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        Command::Run => {
            let config = load_config(&cli)?;
            let runner = Arc::new(build_runner(&config, open_store(&config)?)?);
            tracing::info!(
                "🏅 BadgeFlow started (db: {}, max {} concurrent runs)",
                config.database_path,
                config.scheduler.max_concurrent_runs
            );
            tokio::select! {
                _ = spawn_runner(runner) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("👋 Shutting down");
                }
            }
        }
    }
    Ok(())
}
