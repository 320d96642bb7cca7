//! Run-state transitions shared by every automation kind.
//!
//! `Idle → Running → Completed | Failed`; completed and failed records are
//! schedulable again once `next_run_at` passes. Exclusion between workers
//! relies only on the store's atomic `try_begin_run`, which also refuses a
//! slot that another worker already finished.

use badgeflow_core::error::Result;
use badgeflow_core::traits::{AutomationStore, ContentPublisher};
use badgeflow_core::types::{AutomationRecord, ContentItem, NewContent, RunClaim, RunCompletion};
use chrono::{DateTime, Duration, Utc};

use crate::cadence;

/// Retry delay when the cadence itself cannot produce a next run.
fn fallback_retry() -> Duration {
    Duration::hours(1)
}

/// Next time `record` should fire after `now`.
pub fn compute_next_run_time(record: &AutomationRecord, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    cadence::next_run_after(&record.cadence, now)
}

pub struct RunState<'a> {
    store: &'a dyn AutomationStore,
}

impl<'a> RunState<'a> {
    pub fn new(store: &'a dyn AutomationStore) -> Self {
        Self { store }
    }

    /// False means another worker owns the run or already ran this slot; not an error.
    pub async fn try_begin(&self, record: &AutomationRecord, claim: &RunClaim) -> Result<bool> {
        let acquired = self.store.try_begin_run(record.id, claim).await?;
        if acquired {
            tracing::info!("▶️ Automation '{}' ({}) started [{}]", record.name, record.id, record.kind);
        } else {
            tracing::info!(
                "⏭️ Automation '{}' ({}) running elsewhere or no longer due, skipping",
                record.name,
                record.id
            );
        }
        Ok(acquired)
    }

    /// Mark completed and schedule the next run. Returns the new `next_run_at`.
    pub async fn complete(&self, record: &AutomationRecord, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let next = compute_next_run_time(record, now)?;
        self.store.complete_run(record.id, now, next).await?;
        tracing::info!(
            "✅ Automation '{}' ({}) completed, next run {}",
            record.name,
            record.id,
            next.to_rfc3339()
        );
        Ok(next)
    }

    /// Publish the run's post and mark the run completed in one store write.
    /// On error nothing was published, so a retry cannot duplicate the post.
    pub async fn complete_with_post(
        &self,
        publisher: &dyn ContentPublisher,
        record: &AutomationRecord,
        now: DateTime<Utc>,
        content: NewContent,
    ) -> Result<ContentItem> {
        let next_run_at = compute_next_run_time(record, now)?;
        let run = RunCompletion {
            automation_id: record.id,
            ran_at: now,
            next_run_at,
        };
        let article = publisher.create_content(content, run).await?;
        tracing::info!(
            "✅ Automation '{}' ({}) completed, next run {}",
            record.name,
            record.id,
            next_run_at.to_rfc3339()
        );
        Ok(article)
    }

    /// Mark failed; the automation stays schedulable. Never errors: a store
    /// failure here is logged since there is nobody left to report it to.
    pub async fn fail(&self, record: &AutomationRecord, now: DateTime<Utc>, error_message: &str) {
        let next = compute_next_run_time(record, now).unwrap_or_else(|_| now + fallback_retry());
        tracing::error!(
            automation_id = record.id,
            kind = %record.kind,
            "❌ Automation '{}' failed: {}",
            record.name,
            error_message
        );
        if let Err(e) = self.store.fail_run(record.id, next, error_message).await {
            tracing::error!(
                automation_id = record.id,
                "❌ Could not record failure for automation {}: {}",
                record.id,
                e
            );
        }
    }
}
