//! External assessors. Implementations are slow and may fail; callers bound
//! them with timeouts.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ContentItem;

/// Generative-model-backed judgement of soft criteria.
#[async_trait]
pub trait QualificationOracle: Send + Sync {
    /// Does `item` meet the natural-language `criteria`?
    async fn qualifies(&self, item: &ContentItem, criteria: &str) -> Result<bool>;

    /// Is `comment` a helpful, welcoming reply within `thread`?
    async fn is_helpful(&self, comment: &ContentItem, thread: &ContentItem) -> Result<bool>;
}

#[async_trait]
pub trait SpamClassifier: Send + Sync {
    async fn is_spam(&self, item: &ContentItem) -> Result<bool>;
}
