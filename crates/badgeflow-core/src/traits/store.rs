//! Persistence seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    AutomationRecord, Badge, BadgeAchievement, ContentItem, ContentQuery, NewAchievement, RunClaim,
    UserSummary,
};

/// Automation records and their run-state transitions.
#[async_trait]
pub trait AutomationStore: Send + Sync {
    async fn get_automation(&self, id: i64) -> Result<Option<AutomationRecord>>;

    /// Enabled, `next_run_at <= now`, and not running (or holding a lock taken
    /// before `stale_before`); oldest first.
    async fn due_automations(
        &self,
        now: DateTime<Utc>,
        stale_before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<AutomationRecord>>;

    /// Atomically flip `status` to running and stamp `started_at`, provided the
    /// record is not locked by a live run and, when `claim.require_due`, is
    /// still due at `claim.now`. Returns false otherwise.
    async fn try_begin_run(&self, id: i64, claim: &RunClaim) -> Result<bool>;

    async fn complete_run(
        &self,
        id: i64,
        ran_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Leaves `last_run_at` untouched so the next window still covers this run.
    async fn fail_run(&self, id: i64, next_run_at: DateTime<Utc>, error: &str) -> Result<()>;
}

/// Read access to published community content.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn find_published(&self, query: &ContentQuery) -> Result<Vec<ContentItem>>;

    /// Whether the author published any article under `organization_id`
    /// strictly before `before`, across full history.
    async fn has_published_before(
        &self,
        author_user_id: i64,
        organization_id: i64,
        before: DateTime<Utc>,
    ) -> Result<bool>;

    /// Latest published article tagged `tag`. `subforem_id = None` searches globally.
    async fn find_thread(&self, tag: &str, subforem_id: Option<i64>)
    -> Result<Option<ContentItem>>;

    async fn organization_exists(&self, organization_id: i64) -> Result<bool>;
}

/// Append-only badge achievements.
#[async_trait]
pub trait AchievementStore: Send + Sync {
    async fn exists(&self, user_id: i64, badge_id: i64) -> Result<bool>;

    async fn exists_since(&self, user_id: i64, badge_id: i64, since: DateTime<Utc>)
    -> Result<bool>;

    /// Insert honoring `achievement.guard` atomically.
    /// Fails with `AutomationError::DuplicateAward` when the guard rejects it.
    async fn create(&self, achievement: NewAchievement) -> Result<BadgeAchievement>;
}

#[async_trait]
pub trait BadgeLookup: Send + Sync {
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Badge>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: i64) -> Result<Option<UserSummary>>;
}
