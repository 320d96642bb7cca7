//! Runner: picks due automations and executes them.
//! One tick fetches up to `batch_size` due records and drives them with at most
//! `max_concurrent_runs` in flight. Exclusion per record comes from the store:
//! a scheduled claim only succeeds while the record is still due, so a stale
//! snapshot never repeats a slot.

use std::sync::Arc;
use std::time::Duration;

use badgeflow_core::config::SchedulerConfig;
use badgeflow_core::error::{AutomationError, Result};
use badgeflow_core::types::{AutomationRecord, RunClaim};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;

use crate::awarders::{self, AwardOutcome};
use crate::context::{RunContext, Services};
use crate::generative::{GenerativeExecutor, GenerativeOutcome};
use crate::state::RunState;

/// What happened to one automation on one tick.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunReport {
    Award {
        automation_id: i64,
        name: String,
        outcome: AwardOutcome,
    },
    Generative {
        automation_id: i64,
        name: String,
        outcome: GenerativeOutcome,
    },
    /// Another worker holds the run or already finished this slot.
    AlreadyRunning { automation_id: i64 },
}

impl RunReport {
    pub fn automation_id(&self) -> i64 {
        match self {
            Self::Award { automation_id, .. }
            | Self::Generative { automation_id, .. }
            | Self::AlreadyRunning { automation_id } => *automation_id,
        }
    }

    pub fn success(&self) -> bool {
        match self {
            Self::Award { outcome, .. } => outcome.success(),
            Self::Generative { outcome, .. } => outcome.success(),
            Self::AlreadyRunning { .. } => false,
        }
    }
}

pub struct AutomationRunner {
    services: Services,
    config: SchedulerConfig,
}

impl AutomationRunner {
    pub fn new(services: Services, config: SchedulerConfig) -> Self {
        Self { services, config }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    fn claim(&self, claim: RunClaim) -> RunClaim {
        match self.config.stale_run_after().and_then(|d| chrono::Duration::from_std(d).ok()) {
            Some(stale_after) => claim.reclaiming_after(stale_after),
            None => claim,
        }
    }

    /// Execute the due slot `record` was loaded for. Skipped when another
    /// worker holds the run or the slot has already been run.
    pub async fn execute(&self, record: &AutomationRecord, now: DateTime<Utc>) -> RunReport {
        self.execute_claimed(record, now, self.claim(RunClaim::scheduled(now))).await
    }

    async fn execute_claimed(
        &self,
        record: &AutomationRecord,
        now: DateTime<Utc>,
        claim: RunClaim,
    ) -> RunReport {
        let ctx = RunContext::for_record(record, now);
        if record.kind.is_generative() {
            let outcome = GenerativeExecutor::new(&self.services).execute(record, &ctx, &claim).await;
            if matches!(outcome, GenerativeOutcome::AlreadyRunning) {
                return RunReport::AlreadyRunning { automation_id: record.id };
            }
            return RunReport::Generative {
                automation_id: record.id,
                name: record.name.clone(),
                outcome,
            };
        }
        self.execute_award(record, &ctx, &claim).await
    }

    async fn execute_award(
        &self,
        record: &AutomationRecord,
        ctx: &RunContext,
        claim: &RunClaim,
    ) -> RunReport {
        let state = RunState::new(self.services.automations.as_ref());
        let report = |outcome| RunReport::Award {
            automation_id: record.id,
            name: record.name.clone(),
            outcome,
        };

        match state.try_begin(record, claim).await {
            Ok(true) => {}
            Ok(false) => return RunReport::AlreadyRunning { automation_id: record.id },
            Err(e) => {
                tracing::error!("❌ Could not start automation {}: {}", record.id, e);
                return report(AwardOutcome::Failure {
                    users_awarded: 0,
                    error_message: e.describe(),
                });
            }
        }

        let outcome = match awarders::awarder_for(record.kind) {
            Some(awarder) => awarders::run_awarder(awarder, &self.services, record, ctx).await,
            None => AwardOutcome::Failure {
                users_awarded: 0,
                error_message: AutomationError::InvalidConfig(format!(
                    "{} is not a badge automation",
                    record.kind
                ))
                .describe(),
            },
        };

        let outcome = match outcome {
            AwardOutcome::Success { users_awarded } => match state.complete(record, ctx.now).await {
                Ok(_) => AwardOutcome::Success { users_awarded },
                Err(e) => {
                    let error_message = e.describe();
                    state.fail(record, ctx.now, &error_message).await;
                    AwardOutcome::Failure { users_awarded, error_message }
                }
            },
            AwardOutcome::Failure { users_awarded, error_message } => {
                state.fail(record, ctx.now, &error_message).await;
                AwardOutcome::Failure { users_awarded, error_message }
            }
        };
        report(outcome)
    }

    /// Load and execute one automation by id, whether or not it is due.
    pub async fn run_automation(&self, id: i64, now: DateTime<Utc>) -> Result<RunReport> {
        let record = self
            .services
            .automations
            .get_automation(id)
            .await?
            .ok_or_else(|| AutomationError::NotFound(format!("Automation with id {id} not found")))?;
        Ok(self.execute_claimed(&record, now, self.claim(RunClaim::manual(now))).await)
    }

    /// One tick: execute every due automation.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<Vec<RunReport>> {
        let stale_before = self.claim(RunClaim::scheduled(now)).stale_before;
        let due = self
            .services
            .automations
            .due_automations(now, stale_before, self.config.batch_size)
            .await?;
        if due.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!("🔔 {} automation(s) due", due.len());

        let reports = futures::stream::iter(due.iter())
            .map(|record| self.execute(record, now))
            .buffer_unordered(self.config.max_concurrent_runs.max(1))
            .collect::<Vec<_>>()
            .await;
        Ok(reports)
    }
}

/// Tick forever, as a background task.
pub async fn spawn_runner(runner: Arc<AutomationRunner>) {
    let secs = runner.config.tick_interval_secs.max(1);
    tracing::info!("⏰ Runner started (check every {}s)", secs);
    let mut interval = tokio::time::interval(Duration::from_secs(secs));

    loop {
        interval.tick().await;
        match runner.run_due(Utc::now()).await {
            Ok(reports) => {
                let failed = reports.iter().filter(|r| !r.success()).count();
                if !reports.is_empty() {
                    tracing::info!("📅 Tick finished: {} run(s), {} unsuccessful", reports.len(), failed);
                }
            }
            Err(e) => tracing::warn!("⚠️ Failed to load due automations: {e}"),
        }
    }
}
