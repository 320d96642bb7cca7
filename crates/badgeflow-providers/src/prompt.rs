//! `llm_prompt` generation service: turns `action_config.prompt` into a post.

use std::sync::Arc;

use async_trait::async_trait;
use badgeflow_core::error::{AutomationError, Result};
use badgeflow_core::traits::GenerationAdapter;
use badgeflow_core::types::{AutomationRecord, GenerationResult};

use crate::{ChatClient, ChatMessage};

pub const SERVICE_NAME: &str = "llm_prompt";

/// Reply meaning "nothing worth posting this time".
const NO_CONTENT: &str = "NO_CONTENT";

const SYSTEM_PROMPT: &str = "You write posts for a developer community. \
Reply in this exact format:\n\
TITLE: <post title>\n\
TAGS: <up to four lowercase tags, comma separated>\n\
<blank line>\n\
<markdown body>\n\n\
If there is nothing worth posting, reply with NO_CONTENT and nothing else.";

pub struct PromptGenerationAdapter {
    chat: Arc<dyn ChatClient>,
}

impl PromptGenerationAdapter {
    pub fn new(chat: Arc<dyn ChatClient>) -> Self {
        Self { chat }
    }
}

/// Parse a `TITLE:` / optional `TAGS:` / body reply.
pub fn parse_reply(reply: &str) -> Result<Option<GenerationResult>> {
    let reply = reply.trim();
    if reply.is_empty() || reply == NO_CONTENT {
        return Ok(None);
    }

    let mut lines = reply.lines().skip_while(|l| l.trim().is_empty());
    let title = lines
        .next()
        .and_then(|l| l.trim().strip_prefix("TITLE:"))
        .map(|t| t.trim().trim_matches('"').to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AutomationError::Generation("Reply has no TITLE line".into()))?;

    let rest: Vec<&str> = lines.collect();
    let (tags, body_lines): (Vec<String>, &[&str]) = match rest.first().and_then(|l| l.trim().strip_prefix("TAGS:")) {
        Some(tags) => (
            tags.split(',')
                .map(|t| t.trim().trim_start_matches('#').to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            &rest[1..],
        ),
        None => (Vec::new(), &rest[..]),
    };

    let body = body_lines.join("\n").trim().to_string();
    if body.is_empty() {
        return Err(AutomationError::Generation("Reply has an empty body".into()));
    }
    Ok(Some(GenerationResult {
        title,
        body,
        tags,
        error: None,
    }))
}

#[async_trait]
impl GenerationAdapter for PromptGenerationAdapter {
    fn service_name(&self) -> &str {
        SERVICE_NAME
    }

    fn validate(&self, automation: &AutomationRecord) -> Result<()> {
        automation.require_str("prompt").map(|_| ())
    }

    async fn generate(&self, automation: &AutomationRecord) -> Result<Option<GenerationResult>> {
        let prompt = automation.require_str("prompt")?;
        let reply = self
            .chat
            .complete(&[ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)])
            .await
            .map_err(|e| match e {
                AutomationError::Http(msg) => AutomationError::Generation(msg),
                other => other,
            })?;
        tracing::debug!("{} reply for automation {}: {} chars", SERVICE_NAME, automation.id, reply.len());
        parse_reply(&reply)
    }
}
