use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

/// Outbound messages to the chat client. Best effort: `false` means the send did not land,
/// and callers log it rather than fail.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> bool;
    async fn send_photo(&self, chat_id: i64, photo_url: &str, caption: &str) -> bool;
}

/// Used when no bot token is configured; only logs.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_text(&self, chat_id: i64, text: &str) -> bool {
        tracing::info!(chat_id, chars = text.chars().count(), "bot token missing, text not sent");
        false
    }

    async fn send_photo(&self, chat_id: i64, photo_url: &str, _caption: &str) -> bool {
        tracing::info!(chat_id, photo_url, "bot token missing, photo not sent");
        false
    }
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    timeout: Duration,
}

impl TelegramNotifier {
    pub fn new(client: reqwest::Client, api_base: &str, bot_token: &str, timeout: Duration) -> Self {
        Self {
            client,
            api_base: api_base.to_string(),
            bot_token: bot_token.to_string(),
            timeout,
        }
    }

    async fn call(&self, method: &str, payload: serde_json::Value) -> bool {
        let url = format!("{}/bot{}/{method}", self.api_base, self.bot_token);
        match self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(method, %status, body = %body, "telegram rejected call");
                false
            }
            Err(err) => {
                tracing::warn!(method, error = %err, "telegram call failed");
                false
            }
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_text(&self, chat_id: i64, text: &str) -> bool {
        self.call(
            "sendMessage",
            json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML"
            }),
        )
        .await
    }

    async fn send_photo(&self, chat_id: i64, photo_url: &str, caption: &str) -> bool {
        self.call(
            "sendPhoto",
            json!({
                "chat_id": chat_id,
                "photo": photo_url,
                "caption": caption,
                "parse_mode": "HTML"
            }),
        )
        .await
    }
}
