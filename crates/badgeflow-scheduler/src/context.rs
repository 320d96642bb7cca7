//! Collaborators and per-run parameters handed to awarders and executors.

use std::sync::Arc;

use badgeflow_core::config::{AwardConfig, BadgeFlowConfig, TimeoutConfig};
use badgeflow_core::traits::{
    AchievementStore, AutomationStore, BadgeLookup, ContentPublisher, ContentStore,
    QualificationOracle, SpamClassifier, UrlBuilder, UserDirectory,
};
use badgeflow_core::types::AutomationRecord;
use chrono::{DateTime, Utc};

use crate::filters::OracleSettings;
use crate::generative::AdapterRegistry;

/// Explicit inputs of one execution. Nothing is read from ambient state.
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    pub now: DateTime<Utc>,
    /// Sub-community the run is scoped to; thread lookups fall back to global.
    pub subforem_id: Option<i64>,
}

impl RunContext {
    pub fn for_record(record: &AutomationRecord, now: DateTime<Utc>) -> Self {
        Self {
            now,
            subforem_id: record.subforem_id,
        }
    }
}

/// Everything an automation may touch.
#[derive(Clone)]
pub struct Services {
    pub automations: Arc<dyn AutomationStore>,
    pub content: Arc<dyn ContentStore>,
    pub achievements: Arc<dyn AchievementStore>,
    pub badges: Arc<dyn BadgeLookup>,
    pub users: Arc<dyn UserDirectory>,
    pub publisher: Arc<dyn ContentPublisher>,
    pub spam: Arc<dyn SpamClassifier>,
    pub oracle: Arc<dyn QualificationOracle>,
    pub urls: Arc<dyn UrlBuilder>,
    pub adapters: AdapterRegistry,
    pub timeouts: TimeoutConfig,
    pub awards: AwardConfig,
}

impl Services {
    /// Wire every store seam to one backing store (e.g. `SqliteStore`).
    pub fn with_store<S>(
        store: Arc<S>,
        oracle: Arc<dyn QualificationOracle>,
        spam: Arc<dyn SpamClassifier>,
        urls: Arc<dyn UrlBuilder>,
    ) -> Self
    where
        S: AutomationStore
            + ContentStore
            + AchievementStore
            + BadgeLookup
            + UserDirectory
            + ContentPublisher
            + 'static,
    {
        Self {
            automations: store.clone(),
            content: store.clone(),
            achievements: store.clone(),
            badges: store.clone(),
            users: store.clone(),
            publisher: store,
            spam,
            oracle,
            urls,
            adapters: AdapterRegistry::new(),
            timeouts: TimeoutConfig::default(),
            awards: AwardConfig::default(),
        }
    }

    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_config(mut self, config: &BadgeFlowConfig) -> Self {
        self.timeouts = config.timeouts.clone();
        self.awards = config.awards.clone();
        self
    }

    pub fn oracle_settings(&self) -> OracleSettings {
        OracleSettings {
            timeout: self.timeouts.oracle(),
            on_failure: self.awards.oracle_failure,
        }
    }
}
