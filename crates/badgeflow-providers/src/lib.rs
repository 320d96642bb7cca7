//! # BadgeFlow Providers
//!
//! Concrete collaborators for the scheduler:
//! - `OpenAiCompatibleClient`: chat completions against any OpenAI-compatible API
//! - `LlmQualificationOracle`: YES/NO judgements for badge criteria
//! - `PromptGenerationAdapter`: the `llm_prompt` generation service
//! - `RuleSpamClassifier`: blocked phrases and link flooding

pub mod openai_compatible;
pub mod oracle;
pub mod prompt;
pub mod spam;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use badgeflow_core::config::BadgeFlowConfig;
use badgeflow_core::error::Result;
use serde::{Deserialize, Serialize};

pub use openai_compatible::OpenAiCompatibleClient;
pub use oracle::LlmQualificationOracle;
pub use prompt::PromptGenerationAdapter;
pub use spam::RuleSpamClassifier;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

/// Anything that turns a conversation into one assistant reply.
#[async_trait]
pub trait ChatClient: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Build the chat client described by `[llm]`. The request timeout is the
/// larger of the oracle and generation budgets; callers bound each use.
pub fn create_chat_client(config: &BadgeFlowConfig) -> Result<Arc<dyn ChatClient>> {
    let timeout = Duration::from_secs(config.timeouts.oracle_secs.max(config.timeouts.generation_secs));
    Ok(Arc::new(OpenAiCompatibleClient::from_config(&config.llm, timeout)?))
}

/// Cut `text` to at most `max_chars` characters.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
