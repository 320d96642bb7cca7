//! Rule-based spam classifier.

use async_trait::async_trait;
use badgeflow_core::config::SpamConfig;
use badgeflow_core::error::Result;
use badgeflow_core::traits::SpamClassifier;
use badgeflow_core::types::ContentItem;

pub struct RuleSpamClassifier {
    /// Lowercased.
    blocked_patterns: Vec<String>,
    max_links: usize,
}

impl RuleSpamClassifier {
    pub fn new(config: &SpamConfig) -> Self {
        Self {
            blocked_patterns: config
                .blocked_patterns
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            max_links: config.max_links,
        }
    }

    pub fn classify(&self, item: &ContentItem) -> bool {
        let text = format!("{}\n{}", item.title, item.body).to_lowercase();
        if let Some(pattern) = self.blocked_patterns.iter().find(|p| text.contains(p.as_str())) {
            tracing::debug!("{} {} matched blocked pattern '{}'", item.kind.as_str(), item.id, pattern);
            return true;
        }
        let links = text.matches("http://").count() + text.matches("https://").count();
        links > self.max_links
    }
}

#[async_trait]
impl SpamClassifier for RuleSpamClassifier {
    async fn is_spam(&self, item: &ContentItem) -> Result<bool> {
        Ok(self.classify(item))
    }
}
