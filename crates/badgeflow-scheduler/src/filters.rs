//! Eligibility filters.
//!
//! The predicates here are pure. The async wrappers bound the spam classifier
//! and qualification oracle with timeouts and apply the configured failure
//! policy; none of them mutate anything.

use std::time::Duration;

use badgeflow_core::config::OracleFailurePolicy;
use badgeflow_core::error::Result;
use badgeflow_core::traits::{QualificationOracle, SpamClassifier};
use badgeflow_core::types::ContentItem;

use crate::calls::with_timeout;
use crate::window::Window;

/// Score at or above `min_score`, or featured by staff.
pub fn passes_score(item: &ContentItem, min_score: i32) -> bool {
    item.featured || item.score >= min_score
}

pub fn in_window(item: &ContentItem, window: &Window) -> bool {
    window.contains(item.published_at)
}

/// Case-insensitive substring match on title, body or tags.
/// No keywords means everything matches.
pub fn matches_keywords(item: &ContentItem, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let title = item.title.to_lowercase();
    let body = item.body.to_lowercase();
    keywords.iter().map(|k| k.to_lowercase()).any(|k| {
        title.contains(&k) || body.contains(&k) || item.tags.iter().any(|t| t.to_lowercase() == k)
    })
}

/// Comments only: not deleted, not hidden by the thread owner, not low quality.
pub fn passes_comment_quality(item: &ContentItem, low_quality_threshold: i32) -> bool {
    !item.deleted && !item.hidden_by_owner && item.score >= low_quality_threshold
}

/// Shared knobs for the oracle-backed filters.
#[derive(Debug, Clone, Copy)]
pub struct OracleSettings {
    pub timeout: Duration,
    pub on_failure: OracleFailurePolicy,
}

/// Spam verdict. Under the skip policy a failed classification counts as
/// spam so the item is excluded.
pub async fn is_spam(
    classifier: &dyn SpamClassifier,
    item: &ContentItem,
    settings: OracleSettings,
) -> Result<bool> {
    let verdict = with_timeout("spam classifier", settings.timeout, classifier.is_spam(item)).await;
    resolve(verdict, true, item, "spam classifier", settings.on_failure)
}

pub async fn qualifies(
    oracle: &dyn QualificationOracle,
    item: &ContentItem,
    criteria: &str,
    settings: OracleSettings,
) -> Result<bool> {
    let verdict = with_timeout(
        "qualification oracle",
        settings.timeout,
        oracle.qualifies(item, criteria),
    )
    .await;
    resolve(verdict, false, item, "qualification oracle", settings.on_failure)
}

pub async fn is_helpful(
    oracle: &dyn QualificationOracle,
    comment: &ContentItem,
    thread: &ContentItem,
    settings: OracleSettings,
) -> Result<bool> {
    let verdict = with_timeout(
        "helpfulness oracle",
        settings.timeout,
        oracle.is_helpful(comment, thread),
    )
    .await;
    resolve(verdict, false, comment, "helpfulness oracle", settings.on_failure)
}

fn resolve(
    verdict: Result<bool>,
    on_skip: bool,
    item: &ContentItem,
    what: &str,
    policy: OracleFailurePolicy,
) -> Result<bool> {
    match verdict {
        Ok(v) => Ok(v),
        Err(e) if policy == OracleFailurePolicy::Skip => {
            tracing::warn!("⚠️ {} failed for {} {}: {}", what, item.kind.as_str(), item.id, e);
            Ok(on_skip)
        }
        Err(e) => Err(e),
    }
}
