//! BadgeFlow configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AutomationError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeFlowConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Public site root used when linking content in achievement messages.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub awards: AwardConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub spam: SpamConfig,
}

fn default_database_path() -> String { "~/.badgeflow/automations.db".into() }
fn default_base_url() -> String { "http://localhost:3000".into() }

impl Default for BadgeFlowConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            base_url: default_base_url(),
            scheduler: SchedulerConfig::default(),
            timeouts: TimeoutConfig::default(),
            awards: AwardConfig::default(),
            llm: LlmConfig::default(),
            spam: SpamConfig::default(),
        }
    }
}

impl BadgeFlowConfig {
    /// Load config from the default path (~/.badgeflow/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AutomationError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the engine spin or never finish a call.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent_runs == 0 {
            return Err(AutomationError::Config(
                "scheduler.max_concurrent_runs must be at least 1".into(),
            ));
        }
        if self.scheduler.tick_interval_secs == 0 {
            return Err(AutomationError::Config(
                "scheduler.tick_interval_secs must be at least 1".into(),
            ));
        }
        let t = &self.timeouts;
        if t.search_secs == 0 || t.oracle_secs == 0 || t.generation_secs == 0 {
            return Err(AutomationError::Config("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the BadgeFlow home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".badgeflow")
    }
}

/// Tick loop settings for the bundled runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Distinct automations executed in parallel per tick.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_runs: usize,
    /// Due automations fetched per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// A run lock older than this is treated as left behind by a crashed
    /// worker and may be taken over. 0 disables takeover.
    #[serde(default = "default_stale_run_secs")]
    pub stale_run_secs: u64,
}

fn default_tick_interval() -> u64 { 60 }
fn default_max_concurrent() -> usize { 4 }
fn default_batch_size() -> usize { 50 }
fn default_stale_run_secs() -> u64 { 2 * 60 * 60 }

impl SchedulerConfig {
    pub fn stale_run_after(&self) -> Option<Duration> {
        (self.stale_run_secs > 0).then(|| Duration::from_secs(self.stale_run_secs))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            max_concurrent_runs: default_max_concurrent(),
            batch_size: default_batch_size(),
            stale_run_secs: default_stale_run_secs(),
        }
    }
}

/// Upper bounds for every external call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_search_secs")]
    pub search_secs: u64,
    #[serde(default = "default_oracle_secs")]
    pub oracle_secs: u64,
    #[serde(default = "default_generation_secs")]
    pub generation_secs: u64,
}

fn default_search_secs() -> u64 { 10 }
fn default_oracle_secs() -> u64 { 30 }
fn default_generation_secs() -> u64 { 120 }

impl TimeoutConfig {
    pub fn search(&self) -> Duration { Duration::from_secs(self.search_secs) }
    pub fn oracle(&self) -> Duration { Duration::from_secs(self.oracle_secs) }
    pub fn generation(&self) -> Duration { Duration::from_secs(self.generation_secs) }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            search_secs: default_search_secs(),
            oracle_secs: default_oracle_secs(),
            generation_secs: default_generation_secs(),
        }
    }
}

/// What an awarder does when the qualification oracle errors or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OracleFailurePolicy {
    /// Treat the item as not qualified and keep scanning.
    #[default]
    Skip,
    /// Abort the run; the automation is marked failed.
    Fail,
}

/// Badge awarding knobs shared by all awarders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwardConfig {
    #[serde(default)]
    pub oracle_failure: OracleFailurePolicy,
    /// Comments scoring below this are never considered.
    #[serde(default = "default_low_quality_score")]
    pub low_quality_comment_score: i32,
}

fn default_low_quality_score() -> i32 { -75 }

impl Default for AwardConfig {
    fn default() -> Self {
        Self {
            oracle_failure: OracleFailurePolicy::default(),
            low_quality_comment_score: default_low_quality_score(),
        }
    }
}

/// OpenAI-compatible endpoint used by the oracle and the prompt adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    /// Env var consulted when `api_key` is empty.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_endpoint() -> String { "https://api.openai.com/v1".into() }
fn default_api_key_env() -> String { "OPENAI_API_KEY".into() }
fn default_model() -> String { "gpt-4o-mini".into() }
fn default_temperature() -> f32 { 0.2 }
fn default_max_tokens() -> u32 { 1024 }

impl LlmConfig {
    /// `api_key` > env var > empty.
    pub fn resolve_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }
        std::env::var(&self.api_key_env).unwrap_or_default()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: String::new(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Rule-based spam classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamConfig {
    #[serde(default = "default_blocked_patterns")]
    pub blocked_patterns: Vec<String>,
    #[serde(default = "default_max_links")]
    pub max_links: usize,
}

fn default_blocked_patterns() -> Vec<String> {
    vec!["buy followers", "casino bonus", "crypto giveaway", "whatsapp me"]
        .into_iter().map(String::from).collect()
}
fn default_max_links() -> usize { 5 }

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            blocked_patterns: default_blocked_patterns(),
            max_links: default_max_links(),
        }
    }
}
