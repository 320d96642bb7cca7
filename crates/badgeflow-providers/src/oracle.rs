//! Qualification oracle backed by a chat model.

use std::sync::Arc;

use async_trait::async_trait;
use badgeflow_core::error::{AutomationError, Result};
use badgeflow_core::traits::QualificationOracle;
use badgeflow_core::types::ContentItem;
use serde_json::Value;

use crate::{ChatClient, ChatMessage, truncate_chars};

/// Bodies are cut before prompting to keep requests small.
const MAX_BODY_CHARS: usize = 6000;

const QUALIFY_SYSTEM_PROMPT: &str = "You review posts on a developer community and decide whether \
they meet a badge's criteria. Be strict: reward genuinely useful, original work. \
Answer with exactly one word: YES or NO.";

const HELPFUL_SYSTEM_PROMPT: &str = "You review comments left on a community welcome thread. \
A comment qualifies when it is a genuine, friendly welcome or offers newcomers real help; \
one-word replies, self-promotion and off-topic remarks do not. \
Answer with exactly one word: YES or NO.";

pub struct LlmQualificationOracle {
    chat: Arc<dyn ChatClient>,
}

impl LlmQualificationOracle {
    pub fn new(chat: Arc<dyn ChatClient>) -> Self {
        Self { chat }
    }

    async fn ask(&self, system: &str, user: String) -> Result<bool> {
        let reply = self
            .chat
            .complete(&[ChatMessage::system(system), ChatMessage::user(user)])
            .await
            .map_err(|e| match e {
                AutomationError::Http(msg) => AutomationError::Oracle(msg),
                other => other,
            })?;
        parse_verdict(&reply)
    }
}

/// Accepts `YES`/`NO` (any case, trailing text or punctuation allowed) or a
/// JSON object with a boolean `qualifies`, `helpful` or `verdict` field.
pub fn parse_verdict(reply: &str) -> Result<bool> {
    let reply = reply.trim().trim_start_matches("```json").trim_matches('`').trim();
    if reply.starts_with('{') {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(reply) {
            for key in ["qualifies", "helpful", "verdict"] {
                match map.get(key) {
                    Some(Value::Bool(b)) => return Ok(*b),
                    Some(Value::String(s)) => return parse_verdict(s),
                    _ => {}
                }
            }
        }
    }
    let first_word: String = reply
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    match first_word.as_str() {
        "YES" | "TRUE" => Ok(true),
        "NO" | "FALSE" => Ok(false),
        _ => Err(AutomationError::Oracle(format!(
            "Unrecognized verdict: {}",
            truncate_chars(reply, 80)
        ))),
    }
}

#[async_trait]
impl QualificationOracle for LlmQualificationOracle {
    async fn qualifies(&self, item: &ContentItem, criteria: &str) -> Result<bool> {
        let prompt = format!(
            "Criteria: {}\n\nTitle: {}\nTags: {}\n\nBody:\n{}",
            criteria,
            item.title,
            item.tags.join(", "),
            truncate_chars(&item.body, MAX_BODY_CHARS)
        );
        let verdict = self.ask(QUALIFY_SYSTEM_PROMPT, prompt).await?;
        tracing::debug!("Oracle verdict for {} {}: {}", item.kind.as_str(), item.id, verdict);
        Ok(verdict)
    }

    async fn is_helpful(&self, comment: &ContentItem, thread: &ContentItem) -> Result<bool> {
        let prompt = format!(
            "Thread: {}\n\nComment:\n{}",
            thread.title,
            truncate_chars(&comment.body, MAX_BODY_CHARS)
        );
        self.ask(HELPFUL_SYSTEM_PROMPT, prompt).await
    }
}
