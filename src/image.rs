use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

pub const PLACEHOLDER_NO_KEY: &str =
    "https://via.placeholder.com/1024x1024.png?text=AI+Photo+Generation";
pub const PLACEHOLDER_REJECTED: &str =
    "https://via.placeholder.com/1024x1024.png?text=Generation+Error";
pub const PLACEHOLDER_UNREACHABLE: &str = "https://via.placeholder.com/1024x1024.png?text=API+Error";

/// Image generation backend. Never fails: problems degrade to a placeholder URL.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> String;
}

/// Used when no image API key is configured.
pub struct PlaceholderImageProvider;

#[async_trait]
impl ImageProvider for PlaceholderImageProvider {
    async fn generate(&self, _prompt: &str) -> String {
        PLACEHOLDER_NO_KEY.to_string()
    }
}

pub struct OpenAiImageProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiImageProvider {
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
impl ImageProvider for OpenAiImageProvider {
    async fn generate(&self, prompt: &str) -> String {
        let response = match self
            .client
            .post(format!("{}/images/generations", self.api_base))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&json!({
                "model": self.model,
                "prompt": prompt,
                "n": 1,
                "size": "1024x1024",
                "quality": "hd"
            }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "image request failed");
                return PLACEHOLDER_UNREACHABLE.to_string();
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body, "image provider rejected request");
            return PLACEHOLDER_REJECTED.to_string();
        }

        let payload = match response.json::<Value>().await {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "image response unreadable");
                return PLACEHOLDER_UNREACHABLE.to_string();
            }
        };
        payload
            .get("data")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .and_then(|item| item.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                tracing::warn!("image response had no url");
                PLACEHOLDER_UNREACHABLE.to_string()
            })
    }
}
