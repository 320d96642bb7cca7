//! Generative automations: ask a registered adapter for a post and publish it
//! as the automation's bot account.

use std::collections::HashMap;
use std::sync::Arc;

use badgeflow_core::error::{AutomationError, Result};
use badgeflow_core::traits::GenerationAdapter;
use badgeflow_core::types::{AutomationKind, AutomationRecord, ContentItem, NewContent, RunClaim};
use serde::Serialize;

use crate::calls::{error_chain, with_timeout};
use crate::context::{RunContext, Services};
use crate::state::RunState;

/// Generation adapters keyed by `action_config.service_name`.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn GenerationAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn GenerationAdapter>) {
        let name = adapter.service_name().to_string();
        tracing::debug!("Registered generation adapter '{}'", name);
        self.adapters.insert(name, adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn GenerationAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, service_name: &str) -> Result<Arc<dyn GenerationAdapter>> {
        self.adapters
            .get(service_name)
            .cloned()
            .ok_or_else(|| AutomationError::UnknownService(service_name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Check a generative record's configuration without running it.
    pub fn validate(&self, record: &AutomationRecord) -> Result<Arc<dyn GenerationAdapter>> {
        if !record.kind.is_generative() {
            return Err(AutomationError::InvalidConfig(format!(
                "{} is not a generative automation",
                record.kind
            )));
        }
        let adapter = self.get(record.require_str("service_name")?)?;
        adapter.validate(record)?;
        Ok(adapter)
    }
}

/// Result of one generative execution.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GenerativeOutcome {
    Published { article: ContentItem },
    NoContent,
    AlreadyRunning,
    Failed { error_message: String },
}

impl GenerativeOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Published { .. } | Self::NoContent)
    }

    pub fn article(&self) -> Option<&ContentItem> {
        match self {
            Self::Published { article } => Some(article),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Published { .. } => None,
            Self::NoContent => Some("No content generated (service returned nil)"),
            Self::AlreadyRunning => Some("already running"),
            Self::Failed { error_message } => Some(error_message),
        }
    }
}

/// Append the automation's extra instructions under their own heading.
pub fn append_additional_context(body: &str, instructions: Option<&str>) -> String {
    match instructions.map(str::trim).filter(|s| !s.is_empty()) {
        Some(extra) => format!("{}\n\n---\n\n## Additional Context\n\n{}\n", body.trim_end(), extra),
        None => body.to_string(),
    }
}

pub struct GenerativeExecutor<'a> {
    services: &'a Services,
}

impl<'a> GenerativeExecutor<'a> {
    pub fn new(services: &'a Services) -> Self {
        Self { services }
    }

    pub async fn execute(
        &self,
        record: &AutomationRecord,
        ctx: &RunContext,
        claim: &RunClaim,
    ) -> GenerativeOutcome {
        let state = RunState::new(self.services.automations.as_ref());
        match state.try_begin(record, claim).await {
            Ok(true) => {}
            Ok(false) => return GenerativeOutcome::AlreadyRunning,
            Err(e) => {
                tracing::error!("❌ Could not start automation {}: {}", record.id, e);
                return GenerativeOutcome::Failed { error_message: e.describe() };
            }
        }

        let post = match self.prepare_post(record, ctx).await {
            Ok(post) => post,
            Err(e) => return self.fail(&state, record, ctx, e).await,
        };

        let Some(content) = post else {
            if let Err(e) = state.complete(record, ctx.now).await {
                return self.fail(&state, record, ctx, e).await;
            }
            tracing::info!("📭 Automation '{}': no content generated", record.name);
            return GenerativeOutcome::NoContent;
        };

        match state
            .complete_with_post(self.services.publisher.as_ref(), record, ctx.now, content)
            .await
        {
            Ok(article) => {
                tracing::info!("📝 Automation '{}' created post {} ({})", record.name, article.id, article.path);
                GenerativeOutcome::Published { article }
            }
            Err(e) => self.fail(&state, record, ctx, e).await,
        }
    }

    async fn fail(
        &self,
        state: &RunState<'_>,
        record: &AutomationRecord,
        ctx: &RunContext,
        e: AutomationError,
    ) -> GenerativeOutcome {
        let error_message = e.describe();
        tracing::error!(
            automation_id = record.id,
            error_class = e.class_name(),
            chain = %error_chain(&e),
            "❌ Generation for '{}' failed",
            record.name
        );
        state.fail(record, ctx.now, &error_message).await;
        GenerativeOutcome::Failed { error_message }
    }

    /// Ask the adapter for a post. `None` when it had nothing to say.
    async fn prepare_post(&self, record: &AutomationRecord, ctx: &RunContext) -> Result<Option<NewContent>> {
        let adapter = self.services.adapters.validate(record)?;
        let organization_id = record.config_i64("organization_id")?;
        let subforem_id = record.config_i64("subforem_id")?.or(ctx.subforem_id);

        let generated = with_timeout(
            "generation service",
            self.services.timeouts.generation(),
            adapter.generate(record),
        )
        .await?;
        let Some(result) = generated else {
            return Ok(None);
        };
        if let Some(reported) = result.error {
            return Err(AutomationError::Generation(reported));
        }
        if result.title.trim().is_empty() || result.body.trim().is_empty() {
            return Err(AutomationError::Generation(format!(
                "'{}' returned an empty title or body",
                adapter.service_name()
            )));
        }

        let configured_tags = record.config_strings("tags");
        Ok(Some(NewContent {
            author_user_id: record.owner_user_id,
            title: result.title.trim().to_string(),
            body: append_additional_context(&result.body, record.additional_instructions.as_deref()),
            published: record.kind == AutomationKind::GenerativePublish,
            tags: if configured_tags.is_empty() { result.tags } else { configured_tags },
            organization_id,
            subforem_id,
            created_at: ctx.now,
        }))
    }
}
