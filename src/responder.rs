use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::personality::PersonalityMode;
use crate::rng::RandomSource;
use crate::types::{ChatMessage, Role};

/// History turns forwarded to the provider after the system prompt.
pub const PROVIDER_HISTORY_TURNS: usize = 6;

const CHAT_TEMPERATURE: f64 = 0.9;
const CHAT_MAX_TOKENS: u32 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider response unreadable: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait TextProvider: Send + Sync {
    async fn complete(&self, system_prompt: &str, turns: &[Turn]) -> Result<String, ProviderError>;
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiChatProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiChatProvider {
    pub fn new(
        client: reqwest::Client,
        api_base: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            api_base: api_base.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl TextProvider for OpenAiChatProvider {
    async fn complete(&self, system_prompt: &str, turns: &[Turn]) -> Result<String, ProviderError> {
        let mut messages = vec![json!({ "role": "system", "content": system_prompt })];
        messages.extend(turns.iter().map(|turn| json!(turn)));

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "temperature": CHAT_TEMPERATURE,
                "max_tokens": CHAT_MAX_TOKENS
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }
        let payload = response.json::<Value>().await?;
        payload
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|msg| msg.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Malformed("missing choices[0].message.content".into()))
    }
}

pub enum ResponseStrategy {
    ProviderBacked(Arc<dyn TextProvider>),
    CannedFallback,
}

impl ResponseStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ResponseStrategy::ProviderBacked(_) => "provider",
            ResponseStrategy::CannedFallback => "canned",
        }
    }
}

/// Turns sent after the system prompt: the tail of the history window, then the new message.
pub fn build_turns(user_message: &str, history: &[ChatMessage]) -> Vec<Turn> {
    let start = history.len().saturating_sub(PROVIDER_HISTORY_TURNS);
    history[start..]
        .iter()
        .map(|message| Turn {
            role: match message.role {
                Role::User => TurnRole::User,
                Role::Assistant => TurnRole::Assistant,
            },
            content: message.content.clone(),
        })
        .chain(std::iter::once(Turn {
            role: TurnRole::User,
            content: user_message.to_string(),
        }))
        .collect()
}

pub struct ResponseGenerator {
    strategy: ResponseStrategy,
    rng: Arc<dyn RandomSource>,
}

impl ResponseGenerator {
    pub fn new(strategy: ResponseStrategy, rng: Arc<dyn RandomSource>) -> Self {
        Self { strategy, rng }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Always produces a reply; provider failures degrade to the personality's apology.
    pub async fn reply(
        &self,
        user_message: &str,
        mode: PersonalityMode,
        history: &[ChatMessage],
    ) -> String {
        let personality = mode.definition();
        let provider = match &self.strategy {
            ResponseStrategy::CannedFallback => {
                let index = self.rng.pick(personality.fallback_replies.len());
                return personality.fallback_reply(index);
            }
            ResponseStrategy::ProviderBacked(provider) => provider,
        };

        let turns = build_turns(user_message, history);
        match provider.complete(personality.system_prompt, &turns).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::warn!(mode = %mode, "text provider returned empty content");
                personality.provider_error_reply()
            }
            Err(ProviderError::Status { status, body }) => {
                tracing::warn!(mode = %mode, status, body = %body, "text provider rejected request");
                personality.provider_error_reply()
            }
            Err(err) => {
                tracing::warn!(mode = %mode, error = %err, "text provider unavailable");
                personality.transport_error_reply()
            }
        }
    }
}
