//! Awards a badge to authors of recent articles that an oracle judges to meet
//! a free-text criterion.

use async_trait::async_trait;
use badgeflow_core::error::{AutomationError, Result};
use badgeflow_core::types::{AutomationRecord, Badge, ContentItem, ContentQuery};
use chrono::Duration;

use super::{
    AwardTally, BadgeAwarder, grant, guard_for, is_banished, recently_awarded, require_badge,
    search_with_fallback,
};
use crate::context::{RunContext, Services};
use crate::filters;
use crate::window::{Window, WindowRule, lookback_hours};

const DEFAULT_LOOKBACK_HOURS: i64 = 2;
const DEFAULT_MIN_SCORE: i64 = -1;

fn cooldown() -> Duration {
    Duration::days(7)
}

/// Parsed `action_config` for a content badge automation.
#[derive(Debug)]
struct ContentBadgeSettings<'a> {
    badge_slug: &'a str,
    criteria: &'a str,
    keywords: Vec<String>,
    lookback: Duration,
    min_score: i32,
}

impl<'a> ContentBadgeSettings<'a> {
    fn from_record(record: &'a AutomationRecord) -> Result<Self> {
        let badge_slug = record.require_str("badge_slug")?;
        let criteria = record.require_str("criteria")?;
        let lookback = lookback_hours(
            record
                .config_i64("lookback_hours")?
                .unwrap_or(DEFAULT_LOOKBACK_HOURS),
        )?;
        let min_score = record.config_i64("min_score")?.unwrap_or(DEFAULT_MIN_SCORE);
        Ok(Self {
            badge_slug,
            criteria,
            keywords: record.config_strings("keywords"),
            lookback,
            min_score: i32::try_from(min_score)
                .map_err(|_| AutomationError::InvalidConfig("min_score out of range".into()))?,
        })
    }
}

pub struct ContentBadgeAwarder;

impl ContentBadgeAwarder {
    async fn find_candidate_articles(
        &self,
        services: &Services,
        settings: &ContentBadgeSettings<'_>,
        window: &Window,
    ) -> Result<Vec<ContentItem>> {
        let mut query = ContentQuery::articles(window.since, window.until);
        query.keywords = settings.keywords.clone();
        let found = search_with_fallback(services, query).await?;
        // Index hits are token matches; re-check the literal keyword.
        Ok(found
            .into_iter()
            .filter(|a| {
                filters::in_window(a, window)
                    && filters::passes_score(a, settings.min_score)
                    && filters::matches_keywords(a, &settings.keywords)
            })
            .collect())
    }

    fn message(
        &self,
        services: &Services,
        article: &ContentItem,
        badge: &Badge,
        criteria: &str,
    ) -> String {
        format!(
            "Congrats! Your post [{}]({}) was recognized as a {} for {}.",
            article.title,
            services.urls.url_for(article),
            badge.title.to_lowercase(),
            criteria
        )
    }
}

#[async_trait]
impl BadgeAwarder for ContentBadgeAwarder {
    fn name(&self) -> &'static str {
        "content badge"
    }

    async fn award(
        &self,
        services: &Services,
        record: &AutomationRecord,
        ctx: &RunContext,
        tally: &mut AwardTally,
    ) -> Result<()> {
        let settings = ContentBadgeSettings::from_record(record)?;
        let badge = require_badge(services, settings.badge_slug).await?;
        let window = WindowRule::from_last_run(settings.lookback).window(record.last_run_at, ctx.now)?;
        let oracle = services.oracle_settings();

        let candidates = self.find_candidate_articles(services, &settings, &window).await?;
        tracing::debug!(
            "Content badge '{}': {} candidate article(s) since {}",
            badge.slug,
            candidates.len(),
            window.since.to_rfc3339()
        );

        for article in candidates {
            let author = article.author_user_id;
            // First candidate per author decides; later posts are not re-evaluated.
            if !tally.first_visit(author) {
                continue;
            }
            if is_banished(services, author).await? {
                continue;
            }
            if recently_awarded(services, &badge, author, ctx.now, cooldown()).await? {
                continue;
            }
            if !filters::qualifies(services.oracle.as_ref(), &article, settings.criteria, oracle).await? {
                continue;
            }
            let message = self.message(services, &article, &badge, settings.criteria);
            grant(
                services,
                record,
                ctx,
                &badge,
                author,
                message,
                guard_for(&badge, ctx.now, cooldown()),
                tally,
            )
            .await?;
        }
        Ok(())
    }
}
