//! Content generation and publishing seams.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AutomationRecord, ContentItem, GenerationResult, NewContent, RunCompletion};

/// A generation service, registered under `service_name()`.
#[async_trait]
pub trait GenerationAdapter: Send + Sync {
    fn service_name(&self) -> &str;

    /// Checks the automation's `action_config` without calling the service.
    fn validate(&self, _automation: &AutomationRecord) -> Result<()> {
        Ok(())
    }

    /// `Ok(None)` means there was nothing to write about this time.
    async fn generate(&self, automation: &AutomationRecord) -> Result<Option<GenerationResult>>;
}

#[async_trait]
pub trait ContentPublisher: Send + Sync {
    /// Create the post and mark the producing run completed as one unit:
    /// either both are stored or neither is.
    async fn create_content(&self, content: NewContent, run: RunCompletion) -> Result<ContentItem>;
}

/// Absolute links for achievement messages.
pub trait UrlBuilder: Send + Sync {
    fn url_for(&self, item: &ContentItem) -> String;
}

/// Joins a site root with the item's relative path.
#[derive(Debug, Clone)]
pub struct BaseUrlBuilder {
    base_url: String,
}

impl BaseUrlBuilder {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl UrlBuilder for BaseUrlBuilder {
    fn url_for(&self, item: &ContentItem) -> String {
        if item.path.starts_with("http://") || item.path.starts_with("https://") {
            return item.path.clone();
        }
        format!("{}/{}", self.base_url, item.path.trim_start_matches('/'))
    }
}
