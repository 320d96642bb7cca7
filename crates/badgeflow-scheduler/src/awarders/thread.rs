//! Awards a badge to users leaving helpful comments on the community's
//! recurring welcome thread.

use async_trait::async_trait;
use badgeflow_core::error::Result;
use badgeflow_core::types::{AutomationRecord, ContentItem, ContentQuery};
use chrono::Duration;

use super::{
    AwardTally, BadgeAwarder, grant, guard_for, is_banished, recently_awarded, require_badge,
    search,
};
use crate::context::{RunContext, Services};
use crate::filters;
use crate::window::WindowRule;

const DEFAULT_BADGE_SLUG: &str = "warm-welcome";
const DEFAULT_THREAD_TAG: &str = "welcome";

/// Six and a half days, so a weekly cadence can award the same user every week.
fn cooldown() -> Duration {
    Duration::days(6) + Duration::hours(12)
}

pub struct ThreadBadgeAwarder;

impl ThreadBadgeAwarder {
    /// Latest tagged thread in the run's sub-community, else anywhere.
    async fn find_thread(
        &self,
        services: &Services,
        tag: &str,
        ctx: &RunContext,
    ) -> Result<Option<ContentItem>> {
        if let Some(subforem_id) = ctx.subforem_id {
            if let Some(thread) = services.content.find_thread(tag, Some(subforem_id)).await? {
                return Ok(Some(thread));
            }
        }
        services.content.find_thread(tag, None).await
    }
}

#[async_trait]
impl BadgeAwarder for ThreadBadgeAwarder {
    fn name(&self) -> &'static str {
        "thread badge"
    }

    async fn award(
        &self,
        services: &Services,
        record: &AutomationRecord,
        ctx: &RunContext,
        tally: &mut AwardTally,
    ) -> Result<()> {
        let badge_slug = record.config_str("badge_slug").unwrap_or(DEFAULT_BADGE_SLUG);
        let thread_tag = record.config_str("thread_tag").unwrap_or(DEFAULT_THREAD_TAG);
        let badge = require_badge(services, badge_slug).await?;

        let Some(thread) = self.find_thread(services, thread_tag, ctx).await? else {
            tracing::info!("📭 No thread tagged '{}' found, nothing to award", thread_tag);
            return Ok(());
        };

        let window = WindowRule::weekly_thread().window(record.last_run_at, ctx.now)?;
        let comments = search(services, &ContentQuery::comments_on(thread.id, window.since, window.until)).await?;
        let threshold = services.awards.low_quality_comment_score;
        let oracle = services.oracle_settings();

        for comment in comments {
            let author = comment.author_user_id;
            if author == thread.author_user_id || tally.is_processed(author) {
                continue;
            }
            if !filters::passes_comment_quality(&comment, threshold) {
                continue;
            }
            if is_banished(services, author).await?
                || recently_awarded(services, &badge, author, ctx.now, cooldown()).await?
            {
                tally.mark_processed(author);
                continue;
            }
            if filters::is_spam(services.spam.as_ref(), &comment, oracle).await? {
                tracing::debug!("Comment {} flagged as spam, skipping", comment.id);
                continue;
            }
            if !filters::is_helpful(services.oracle.as_ref(), &comment, &thread, oracle).await? {
                continue;
            }

            let message = format!(
                "Thanks for making newcomers feel at home in [{}]({})! Your [welcoming comment]({}) earned you this badge.",
                thread.title,
                services.urls.url_for(&thread),
                services.urls.url_for(&comment)
            );
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
            tally.mark_processed(author);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::awarders::{AwardOutcome, run_awarder};
    use crate::generative::AdapterRegistry;
    use crate::testing::{ScriptedOracle, ScriptedSpam, TestEnv, article, at, automation, comment};
    use badgeflow_core::types::AutomationKind;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn welcome_thread(env: &TestEnv, subforem_id: Option<i64>, published_at: DateTime<Utc>) -> ContentItem {
        let mut t = article(0, 50, "Welcome Thread", published_at);
        t.tags = vec!["welcome".into()];
        t.subforem_id = subforem_id;
        env.publish(t)
    }

    fn reply(env: &TestEnv, thread: &ContentItem, author: i64, body: &str, h: u32) -> ContentItem {
        env.publish(comment(0, author, thread.id, body, at(h, 0)))
    }

    async fn run(env: &TestEnv, subforem_id: Option<i64>) -> AwardOutcome {
        let record = env.save(automation(AutomationKind::ThreadBadge, json!({})));
        let ctx = RunContext { now: at(10, 0), subforem_id };
        run_awarder(&ThreadBadgeAwarder, &env.services, &record, &ctx).await
    }

    #[tokio::test]
    async fn test_missing_default_badge() {
        let env = TestEnv::new(ScriptedOracle::always());
        let outcome = run(&env, None).await;
        assert_eq!(
            outcome,
            AwardOutcome::Failure {
                users_awarded: 0,
                error_message: "Badge with slug 'warm-welcome' not found".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_no_thread_is_success() {
        let env = TestEnv::new(ScriptedOracle::always());
        env.store.insert_badge("warm-welcome", "Warm Welcome", true).unwrap();
        assert_eq!(run(&env, None).await, AwardOutcome::Success { users_awarded: 0 });
    }

    #[tokio::test]
    async fn test_awards_helpful_commenters_once() {
        let env = TestEnv::new(ScriptedOracle::accepting(&["Welcome aboard!", "Glad you're here"]));
        let badge = env.store.insert_badge("warm-welcome", "Warm Welcome", true).unwrap();
        let thread = welcome_thread(&env, None, at(8, 0) - Duration::days(1));
        reply(&env, &thread, 50, "Welcome aboard!", 8);
        reply(&env, &thread, 1, "Welcome aboard!", 8);
        reply(&env, &thread, 1, "Glad you're here", 9);
        reply(&env, &thread, 2, "meh", 8);
        reply(&env, &thread, 2, "Glad you're here", 9);

        let outcome = run(&env, None).await;
        assert_eq!(outcome, AwardOutcome::Success { users_awarded: 2 });
        assert!(env.store.achievements_for(50, badge.id).unwrap().is_empty());
        assert_eq!(env.store.achievements_for(1, badge.id).unwrap().len(), 1);
        assert_eq!(env.store.achievements_for(2, badge.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_filters_low_quality_hidden_and_spam() {
        let env = TestEnv::with(
            ScriptedOracle::always(),
            ScriptedSpam::flagging(&["cheap followers"]),
            AdapterRegistry::new(),
        );
        env.store.insert_badge("warm-welcome", "Warm Welcome", true).unwrap();
        let thread = welcome_thread(&env, None, at(7, 0));

        let mut low = comment(0, 1, thread.id, "hi", at(8, 0));
        low.score = -100;
        env.publish(low);
        let mut hidden = comment(0, 2, thread.id, "hi", at(8, 0));
        hidden.hidden_by_owner = true;
        env.publish(hidden);
        reply(&env, &thread, 3, "cheap followers", 8);
        reply(&env, &thread, 4, "welcome", 8);
        env.store.insert_user(4, "spam_4", false).unwrap();

        assert_eq!(run(&env, None).await.users_awarded(), 0);
        assert_eq!(env.oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_cooldown_between_weekly_runs() {
        let env = TestEnv::new(ScriptedOracle::always());
        let badge = env.store.insert_badge("warm-welcome", "Warm Welcome", true).unwrap();
        let thread = welcome_thread(&env, None, at(7, 0) - Duration::days(7));
        env.publish(comment(0, 1, thread.id, "hello", at(8, 0) - Duration::days(6)));
        env.publish(comment(0, 1, thread.id, "hello again", at(8, 0)));

        let record = env.save(automation(AutomationKind::ThreadBadge, json!({})));
        let earlier = RunContext { now: at(10, 0) - Duration::days(3), subforem_id: None };
        assert_eq!(run_awarder(&ThreadBadgeAwarder, &env.services, &record, &earlier).await.users_awarded(), 1);
        let now = RunContext { now: at(10, 0), subforem_id: None };
        assert_eq!(run_awarder(&ThreadBadgeAwarder, &env.services, &record, &now).await.users_awarded(), 0);
        let later = RunContext { now: at(10, 0) + Duration::days(4), subforem_id: None };
        assert_eq!(run_awarder(&ThreadBadgeAwarder, &env.services, &record, &later).await.users_awarded(), 1);
        assert_eq!(env.store.achievements_for(1, badge.id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_prefers_subforem_thread_then_global() {
        let env = TestEnv::new(ScriptedOracle::always());
        env.store.insert_badge("warm-welcome", "Warm Welcome", true).unwrap();
        let global = welcome_thread(&env, None, at(7, 0));
        let local = welcome_thread(&env, Some(3), at(6, 0));
        reply(&env, &global, 1, "hello", 8);
        reply(&env, &local, 2, "hello", 8);

        let found = ThreadBadgeAwarder
            .find_thread(&env.services, "welcome", &RunContext { now: at(10, 0), subforem_id: Some(3) })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, local.id);

        let found = ThreadBadgeAwarder
            .find_thread(&env.services, "welcome", &RunContext { now: at(10, 0), subforem_id: Some(9) })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, global.id);
        assert_eq!(run(&env, Some(3)).await.users_awarded(), 1);
    }
}
