//! Awards a badge for an author's first published article under an organization.

use async_trait::async_trait;
use badgeflow_core::error::{AutomationError, Result};
use badgeflow_core::types::{AutomationRecord, AwardGuard, ContentQuery};

use super::{AwardTally, BadgeAwarder, grant, require_badge, search};
use crate::context::{RunContext, Services};
use crate::window::{WindowRule, lookback_hours};

const DEFAULT_LOOKBACK_HOURS: i64 = 24;

pub struct FirstPostBadgeAwarder;

#[async_trait]
impl BadgeAwarder for FirstPostBadgeAwarder {
    fn name(&self) -> &'static str {
        "first post badge"
    }

    async fn award(
        &self,
        services: &Services,
        record: &AutomationRecord,
        ctx: &RunContext,
        tally: &mut AwardTally,
    ) -> Result<()> {
        let badge_slug = record.require_str("badge_slug")?;
        let organization_id = record
            .config_i64("organization_id")?
            .ok_or(AutomationError::MissingConfig("organization_id"))?;
        let lookback = lookback_hours(
            record
                .config_i64("lookback_hours")?
                .unwrap_or(DEFAULT_LOOKBACK_HOURS),
        )?;

        if !services.content.organization_exists(organization_id).await? {
            return Err(AutomationError::NotFound(format!(
                "Organization with id {organization_id} not found"
            )));
        }
        let badge = require_badge(services, badge_slug).await?;
        let window = WindowRule::from_last_run(lookback).window(record.last_run_at, ctx.now)?;

        let mut query = ContentQuery::articles(window.since, window.until);
        query.organization_id = Some(organization_id);
        let articles = search(services, &query).await?;

        // Ascending order: the first article seen per author is their earliest.
        for article in articles {
            let author = article.author_user_id;
            if !tally.first_visit(author) {
                continue;
            }
            if services
                .content
                .has_published_before(author, organization_id, article.published_at)
                .await?
            {
                tracing::debug!("User {} posted under org {} before, skipping", author, organization_id);
                continue;
            }
            if services.achievements.exists(author, badge.id).await? {
                continue;
            }
            let message = format!(
                "Congrats on publishing your first post under this organization: [{}]({})!",
                article.title,
                services.urls.url_for(&article)
            );
            grant(services, record, ctx, &badge, author, message, AwardGuard::Once, tally).await?;
        }
        Ok(())
    }
}
