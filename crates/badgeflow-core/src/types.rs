//! Domain records: the data model for scheduled automations.

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AutomationError, Result};

/// What an automation does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationKind {
    ContentBadge,
    FirstPostBadge,
    ThreadBadge,
    GenerativeDraft,
    GenerativePublish,
}

impl AutomationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentBadge => "content_badge",
            Self::FirstPostBadge => "first_post_badge",
            Self::ThreadBadge => "thread_badge",
            Self::GenerativeDraft => "generative_draft",
            Self::GenerativePublish => "generative_publish",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "content_badge" => Some(Self::ContentBadge),
            "first_post_badge" => Some(Self::FirstPostBadge),
            "thread_badge" => Some(Self::ThreadBadge),
            "generative_draft" => Some(Self::GenerativeDraft),
            "generative_publish" => Some(Self::GenerativePublish),
            _ => None,
        }
    }

    pub fn is_generative(&self) -> bool {
        matches!(self, Self::GenerativeDraft | Self::GenerativePublish)
    }
}

impl std::fmt::Display for AutomationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run status of an automation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Idle,
        }
    }
}

/// How often an automation fires. All times are UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frequency", rename_all = "snake_case")]
pub enum Cadence {
    Hourly {
        #[serde(default)]
        minute: u32,
    },
    Daily {
        #[serde(default)]
        hour: u32,
        #[serde(default)]
        minute: u32,
    },
    Weekly {
        weekday: Weekday,
        #[serde(default)]
        hour: u32,
        #[serde(default)]
        minute: u32,
    },
    Interval { every_secs: u64 },
    /// "MIN HOUR DOM MON DOW"
    Cron { expression: String },
}

/// A configured automation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRecord {
    pub id: i64,
    pub name: String,
    /// Bot account that authors generated posts and rewards badges.
    pub owner_user_id: i64,
    pub subforem_id: Option<i64>,
    pub kind: AutomationKind,
    /// Kind-specific settings (badge_slug, keywords, service_name, ...).
    pub action_config: Map<String, Value>,
    pub additional_instructions: Option<String>,
    pub cadence: Cadence,
    pub enabled: bool,
    pub status: RunStatus,
    /// When the current holder took the run lock. Cleared when the run ends.
    pub started_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl AutomationRecord {
    /// Whether the scheduler should pick this record up at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.status != RunStatus::Running && self.next_run_at <= now
    }

    /// Non-blank string value from `action_config`.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.action_config
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn require_str(&self, key: &'static str) -> Result<&str> {
        self.config_str(key)
            .ok_or(AutomationError::MissingConfig(key))
    }

    /// Integer value; numeric strings are accepted since admin forms post strings.
    pub fn config_i64(&self, key: &str) -> Result<Option<i64>> {
        match self.action_config.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| AutomationError::InvalidConfig(format!("{key} must be an integer"))),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| AutomationError::InvalidConfig(format!("{key} must be an integer"))),
            Some(_) => Err(AutomationError::InvalidConfig(format!(
                "{key} must be an integer"
            ))),
        }
    }

    pub fn config_f64(&self, key: &str) -> Result<Option<f64>> {
        match self.action_config.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| AutomationError::InvalidConfig(format!("{key} must be a number"))),
            Some(_) => Err(AutomationError::InvalidConfig(format!("{key} must be a number"))),
        }
    }

    /// List of strings; also accepts a comma-separated string.
    pub fn config_strings(&self, key: &str) -> Vec<String> {
        match self.action_config.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Article,
    Comment,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::Comment => "comment",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "comment" { Self::Comment } else { Self::Article }
    }
}

/// A published article or comment, read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub kind: ContentKind,
    pub author_user_id: i64,
    /// Empty for comments.
    pub title: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
    pub score: i32,
    pub featured: bool,
    pub organization_id: Option<i64>,
    pub subforem_id: Option<i64>,
    pub tags: Vec<String>,
    /// Site-relative URL path.
    pub path: String,
    /// For comments: the article they were posted on.
    pub thread_id: Option<i64>,
    pub deleted: bool,
    pub hidden_by_owner: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub banned: bool,
}

impl UserSummary {
    /// Banned users and removed accounts (renamed with a `spam_` prefix).
    pub fn is_banished(&self) -> bool {
        self.banned || self.username.starts_with("spam_")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Badge {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub allow_multiple_awards: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadgeAchievement {
    pub id: i64,
    pub user_id: i64,
    pub badge_id: i64,
    pub rewarder_id: Option<i64>,
    /// Markdown explaining the award.
    pub context_message: String,
    pub created_at: DateTime<Utc>,
}

/// Uniqueness rule the store enforces when inserting an achievement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardGuard {
    /// No achievement for (user, badge) may exist at all.
    Once,
    /// No achievement for (user, badge) may exist at or after this instant.
    Since(DateTime<Utc>),
}

#[derive(Debug, Clone)]
pub struct NewAchievement {
    pub user_id: i64,
    pub badge_id: i64,
    pub rewarder_id: Option<i64>,
    pub context_message: String,
    pub created_at: DateTime<Utc>,
    pub guard: AwardGuard,
}

/// Output of a generation adapter, consumed once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationResult {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A post to be created by the publisher.
#[derive(Debug, Clone)]
pub struct NewContent {
    pub author_user_id: i64,
    pub title: String,
    pub body: String,
    pub published: bool,
    pub tags: Vec<String>,
    pub organization_id: Option<i64>,
    pub subforem_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Conditions under which a worker may take an automation's run lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunClaim {
    pub now: DateTime<Utc>,
    /// Only claim while `next_run_at <= now`, so one due slot runs once.
    pub require_due: bool,
    /// A lock taken before this instant belongs to a dead worker and may be taken over.
    pub stale_before: Option<DateTime<Utc>>,
}

impl RunClaim {
    /// Claim made by the tick loop for a due slot.
    pub fn scheduled(now: DateTime<Utc>) -> Self {
        Self {
            now,
            require_due: true,
            stale_before: None,
        }
    }

    /// Explicit operator request; ignores `next_run_at`.
    pub fn manual(now: DateTime<Utc>) -> Self {
        Self {
            require_due: false,
            ..Self::scheduled(now)
        }
    }

    /// Take over locks older than `stale_after`. Out-of-range values disable takeover.
    pub fn reclaiming_after(mut self, stale_after: chrono::Duration) -> Self {
        self.stale_before = self.now.checked_sub_signed(stale_after);
        self
    }
}

/// Completion written together with the post a generative run produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunCompletion {
    pub automation_id: i64,
    pub ran_at: DateTime<Utc>,
    pub next_run_at: DateTime<Utc>,
}

/// How keywords are matched by the content store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeywordMode {
    /// Full-text index query.
    #[default]
    Index,
    /// Case-insensitive substring scan over title and body, or an exact tag.
    Literal,
}

/// Filters for `ContentStore::find_published`. Results are ordered by
/// `(published_at, id)` ascending.
#[derive(Debug, Clone)]
pub struct ContentQuery {
    pub kind: ContentKind,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub organization_id: Option<i64>,
    pub thread_id: Option<i64>,
    pub keywords: Vec<String>,
    pub keyword_mode: KeywordMode,
}

impl ContentQuery {
    pub fn articles(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            kind: ContentKind::Article,
            since,
            until,
            organization_id: None,
            thread_id: None,
            keywords: Vec::new(),
            keyword_mode: KeywordMode::Index,
        }
    }

    pub fn comments_on(thread_id: i64, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            kind: ContentKind::Comment,
            thread_id: Some(thread_id),
            ..Self::articles(since, until)
        }
    }
}
