//! Fixtures and scripted collaborators for unit tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use badgeflow_core::error::{AutomationError, Result};
use badgeflow_core::traits::{BaseUrlBuilder, GenerationAdapter, QualificationOracle, SpamClassifier};
use badgeflow_core::types::{
    AutomationKind, AutomationRecord, Cadence, ContentItem, ContentKind, GenerationResult,
    RunStatus,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::context::Services;
use crate::generative::AdapterRegistry;
use crate::persistence::SqliteStore;

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
}

pub fn article(id: i64, author_user_id: i64, title: &str, published_at: DateTime<Utc>) -> ContentItem {
    ContentItem {
        id,
        kind: ContentKind::Article,
        author_user_id,
        title: title.to_string(),
        body: format!("{title} body text"),
        published_at,
        score: 10,
        featured: false,
        organization_id: None,
        subforem_id: None,
        tags: Vec::new(),
        path: format!("/u{author_user_id}/slug"),
        thread_id: None,
        deleted: false,
        hidden_by_owner: false,
    }
}

pub fn comment(
    id: i64,
    author_user_id: i64,
    thread_id: i64,
    body: &str,
    published_at: DateTime<Utc>,
) -> ContentItem {
    ContentItem {
        kind: ContentKind::Comment,
        title: String::new(),
        body: body.to_string(),
        thread_id: Some(thread_id),
        path: format!("/u{author_user_id}/comment/{id}"),
        ..article(id, author_user_id, "", published_at)
    }
}

/// Hourly, idle and due at 10:00 on 2024-01-01.
pub fn automation(kind: AutomationKind, config: Value) -> AutomationRecord {
    AutomationRecord {
        id: 0,
        name: format!("{kind} automation"),
        owner_user_id: 100,
        subforem_id: None,
        kind,
        action_config: config.as_object().cloned().unwrap_or_default(),
        additional_instructions: None,
        cadence: Cadence::Hourly { minute: 0 },
        enabled: true,
        status: RunStatus::Idle,
        started_at: None,
        last_run_at: None,
        next_run_at: at(10, 0),
        last_error: None,
    }
}

enum Verdict {
    Always(bool),
    Titles(HashSet<String>),
    FailingOn(HashSet<String>),
    Failing,
    Hanging,
}

/// Qualification oracle with a fixed script. Counts every call.
pub struct ScriptedOracle {
    verdict: Verdict,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always() -> Self {
        Self::new(Verdict::Always(true))
    }

    pub fn never() -> Self {
        Self::new(Verdict::Always(false))
    }

    pub fn failing() -> Self {
        Self::new(Verdict::Failing)
    }

    pub fn hanging() -> Self {
        Self::new(Verdict::Hanging)
    }

    /// Qualifies everything except the listed texts, which error.
    pub fn failing_on(texts: &[&str]) -> Self {
        Self::new(Verdict::FailingOn(texts.iter().map(|t| t.to_string()).collect()))
    }

    /// Qualifies articles whose title is listed; comments whose body is listed.
    pub fn accepting(texts: &[&str]) -> Self {
        Self::new(Verdict::Titles(texts.iter().map(|t| t.to_string()).collect()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn judge(&self, text: &str) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.verdict {
            Verdict::Always(v) => Ok(*v),
            Verdict::Titles(accepted) => Ok(accepted.contains(text)),
            Verdict::FailingOn(broken) if broken.contains(text) => {
                Err(AutomationError::Oracle("model unavailable".into()))
            }
            Verdict::FailingOn(_) => Ok(true),
            Verdict::Failing => Err(AutomationError::Oracle("model unavailable".into())),
            Verdict::Hanging => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl QualificationOracle for ScriptedOracle {
    async fn qualifies(&self, item: &ContentItem, _criteria: &str) -> Result<bool> {
        self.judge(&item.title).await
    }

    async fn is_helpful(&self, comment: &ContentItem, _thread: &ContentItem) -> Result<bool> {
        self.judge(&comment.body).await
    }
}

pub struct ScriptedSpam {
    spam_bodies: HashSet<String>,
    failing: bool,
}

impl ScriptedSpam {
    pub fn clean() -> Self {
        Self {
            spam_bodies: HashSet::new(),
            failing: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::clean()
        }
    }

    pub fn flagging(bodies: &[&str]) -> Self {
        Self {
            spam_bodies: bodies.iter().map(|b| b.to_string()).collect(),
            failing: false,
        }
    }
}

#[async_trait]
impl SpamClassifier for ScriptedSpam {
    async fn is_spam(&self, item: &ContentItem) -> Result<bool> {
        if self.failing {
            return Err(AutomationError::Oracle("spam service down".into()));
        }
        Ok(self.spam_bodies.contains(&item.body))
    }
}

pub enum Script {
    Content(GenerationResult),
    Nothing,
    Error(String),
    ReportedError(String),
}

/// Generation adapter returning one scripted reply.
pub struct ScriptedAdapter {
    name: &'static str,
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(name: &'static str, script: Script) -> Self {
        Self {
            name,
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn returning(name: &'static str, title: &str, body: &str) -> Self {
        Self::new(
            name,
            Script::Content(GenerationResult {
                title: title.into(),
                body: body.into(),
                ..Default::default()
            }),
        )
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationAdapter for ScriptedAdapter {
    fn service_name(&self) -> &str {
        self.name
    }

    async fn generate(&self, _automation: &AutomationRecord) -> Result<Option<GenerationResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Content(result) => Ok(Some(result.clone())),
            Script::Nothing => Ok(None),
            Script::Error(msg) => Err(AutomationError::Generation(msg.clone())),
            Script::ReportedError(msg) => Ok(Some(GenerationResult {
                error: Some(msg.clone()),
                ..Default::default()
            })),
        }
    }
}

/// In-memory store plus scripted collaborators wired into `Services`.
pub struct TestEnv {
    pub store: Arc<SqliteStore>,
    pub oracle: Arc<ScriptedOracle>,
    pub services: Services,
}

impl TestEnv {
    pub fn new(oracle: ScriptedOracle) -> Self {
        Self::with(oracle, ScriptedSpam::clean(), AdapterRegistry::new())
    }

    pub fn with(oracle: ScriptedOracle, spam: ScriptedSpam, adapters: AdapterRegistry) -> Self {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let oracle = Arc::new(oracle);
        let services = Services::with_store(
            store.clone(),
            oracle.clone(),
            Arc::new(spam),
            Arc::new(BaseUrlBuilder::new("https://dev.example")),
        )
        .with_adapters(adapters);
        Self {
            store,
            oracle,
            services,
        }
    }

    /// Store the automation and return it with its assigned id.
    pub fn save(&self, mut record: AutomationRecord) -> AutomationRecord {
        record.id = self.store.insert_automation(&record).unwrap();
        record
    }

    /// Insert a user plus a published item they authored.
    pub fn publish(&self, item: ContentItem) -> ContentItem {
        self.store
            .insert_user(item.author_user_id, &format!("user{}", item.author_user_id), false)
            .unwrap();
        self.store.insert_content(&item, true).unwrap()
    }
}
