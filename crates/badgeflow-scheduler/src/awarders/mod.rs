//! Badge awarders.
//!
//! Each awarder scans a window of recent content, runs the eligibility chain
//! and records achievements. Errors never escape `run_awarder`; they come back
//! as `AwardOutcome::Failure` with the count of badges already granted.

pub mod content;
pub mod first_post;
pub mod thread;

use std::collections::HashSet;

use async_trait::async_trait;
use badgeflow_core::error::{AutomationError, Result};
use badgeflow_core::types::{
    AutomationKind, AutomationRecord, AwardGuard, Badge, ContentItem, ContentQuery, KeywordMode,
    NewAchievement,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::calls::with_timeout;
use crate::context::{RunContext, Services};

pub use content::ContentBadgeAwarder;
pub use first_post::FirstPostBadgeAwarder;
pub use thread::ThreadBadgeAwarder;

/// Result of one awarder invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AwardOutcome {
    Success { users_awarded: usize },
    Failure { users_awarded: usize, error_message: String },
}

impl AwardOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn users_awarded(&self) -> usize {
        match self {
            Self::Success { users_awarded } | Self::Failure { users_awarded, .. } => *users_awarded,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error_message, .. } => Some(error_message),
        }
    }
}

/// Per-run bookkeeping: users already handled and badges granted so far.
#[derive(Debug, Default)]
pub struct AwardTally {
    processed: HashSet<i64>,
    awarded: usize,
}

impl AwardTally {
    /// True the first time a user is seen; marks them processed.
    pub fn first_visit(&mut self, user_id: i64) -> bool {
        self.processed.insert(user_id)
    }

    pub fn is_processed(&self, user_id: i64) -> bool {
        self.processed.contains(&user_id)
    }

    pub fn mark_processed(&mut self, user_id: i64) {
        self.processed.insert(user_id);
    }

    pub fn awarded(&self) -> usize {
        self.awarded
    }
}

#[async_trait]
pub trait BadgeAwarder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Scan and award. Badges granted are recorded in `tally` as they happen
    /// so a later error still reports them.
    async fn award(
        &self,
        services: &Services,
        record: &AutomationRecord,
        ctx: &RunContext,
        tally: &mut AwardTally,
    ) -> Result<()>;
}

static CONTENT: ContentBadgeAwarder = ContentBadgeAwarder;
static FIRST_POST: FirstPostBadgeAwarder = FirstPostBadgeAwarder;
static THREAD: ThreadBadgeAwarder = ThreadBadgeAwarder;

/// Awarder for a badge automation kind; `None` for generative kinds.
pub fn awarder_for(kind: AutomationKind) -> Option<&'static dyn BadgeAwarder> {
    match kind {
        AutomationKind::ContentBadge => Some(&CONTENT),
        AutomationKind::FirstPostBadge => Some(&FIRST_POST),
        AutomationKind::ThreadBadge => Some(&THREAD),
        AutomationKind::GenerativeDraft | AutomationKind::GenerativePublish => None,
    }
}

/// Run an awarder, folding any error into a failure outcome.
pub async fn run_awarder(
    awarder: &dyn BadgeAwarder,
    services: &Services,
    record: &AutomationRecord,
    ctx: &RunContext,
) -> AwardOutcome {
    let mut tally = AwardTally::default();
    match awarder.award(services, record, ctx, &mut tally).await {
        Ok(()) => {
            tracing::info!(
                "🏅 {} '{}' awarded {} badge(s)",
                awarder.name(),
                record.name,
                tally.awarded()
            );
            AwardOutcome::Success {
                users_awarded: tally.awarded(),
            }
        }
        Err(e) => {
            let error_message = match &e {
                AutomationError::NotFound(msg) => msg.clone(),
                other => other.describe(),
            };
            tracing::error!(
                automation_id = record.id,
                error_class = e.class_name(),
                "❌ {} '{}' failed after {} award(s): {}",
                awarder.name(),
                record.name,
                tally.awarded(),
                error_message
            );
            AwardOutcome::Failure {
                users_awarded: tally.awarded(),
                error_message,
            }
        }
    }
}

// ─── Shared steps ─────────────────────────────────────────

pub(crate) async fn require_badge(services: &Services, slug: &str) -> Result<Badge> {
    services
        .badges
        .find_by_slug(slug)
        .await?
        .ok_or_else(|| AutomationError::NotFound(format!("Badge with slug '{slug}' not found")))
}

/// Banned and removed accounts never receive badges. Unknown users count as removed.
pub(crate) async fn is_banished(services: &Services, user_id: i64) -> Result<bool> {
    Ok(services
        .users
        .find_user(user_id)
        .await?
        .is_none_or(|u| u.is_banished()))
}

/// Whether `user_id` already holds `badge` within its cooldown. Single-award
/// badges look at the whole history.
pub(crate) async fn recently_awarded(
    services: &Services,
    badge: &Badge,
    user_id: i64,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Result<bool> {
    if badge.allow_multiple_awards {
        services.achievements.exists_since(user_id, badge.id, now - cooldown).await
    } else {
        services.achievements.exists(user_id, badge.id).await
    }
}

pub(crate) fn guard_for(badge: &Badge, now: DateTime<Utc>, cooldown: Duration) -> AwardGuard {
    if badge.allow_multiple_awards {
        AwardGuard::Since(now - cooldown)
    } else {
        AwardGuard::Once
    }
}

/// Record an achievement. A concurrent award that won the race is a skip.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn grant(
    services: &Services,
    record: &AutomationRecord,
    ctx: &RunContext,
    badge: &Badge,
    user_id: i64,
    context_message: String,
    guard: AwardGuard,
    tally: &mut AwardTally,
) -> Result<bool> {
    let achievement = NewAchievement {
        user_id,
        badge_id: badge.id,
        rewarder_id: Some(record.owner_user_id),
        context_message,
        created_at: ctx.now,
        guard,
    };
    match services.achievements.create(achievement).await {
        Ok(_) => {
            tally.awarded += 1;
            tracing::info!("🏅 Awarded '{}' to user {}", badge.slug, user_id);
            Ok(true)
        }
        Err(AutomationError::DuplicateAward { .. }) => {
            tracing::debug!("User {} already holds '{}', skipping", user_id, badge.slug);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Published content for `query`, bounded by the search timeout.
pub(crate) async fn search(services: &Services, query: &ContentQuery) -> Result<Vec<ContentItem>> {
    with_timeout(
        "content search",
        services.timeouts.search(),
        services.content.find_published(query),
    )
    .await
}

/// Keyword search through the full-text index, falling back to a literal
/// scan when the index finds nothing or is unavailable.
pub(crate) async fn search_with_fallback(
    services: &Services,
    query: ContentQuery,
) -> Result<Vec<ContentItem>> {
    if query.keywords.is_empty() {
        return search(services, &query).await;
    }
    let indexed = ContentQuery {
        keyword_mode: KeywordMode::Index,
        ..query.clone()
    };
    match search(services, &indexed).await {
        Ok(found) if !found.is_empty() => return Ok(found),
        Ok(_) => tracing::debug!("Index found nothing for {:?}, trying literal match", query.keywords),
        Err(e @ (AutomationError::Search(_) | AutomationError::Timeout { .. })) => {
            tracing::warn!("⚠️ Search index unavailable ({}), trying literal match", e);
        }
        Err(e) => return Err(e),
    }
    let literal = ContentQuery {
        keyword_mode: KeywordMode::Literal,
        ..query
    };
    search(services, &literal).await
}
