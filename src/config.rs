use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::db::resolve_database_url;

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_OPENAI_IMAGE_MODEL: &str = "dall-e-3";
const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_CHAT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_IMAGE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PHOTO_PIPELINE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 15;

/// How replies to free text are produced. Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStrategyKind {
    /// Provider when an API key is configured, canned replies otherwise.
    Auto,
    Provider,
    Canned,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid PORT value '{value}': {source}")]
    InvalidPort {
        value: String,
        source: std::num::ParseIntError,
    },
    #[error("invalid RNG_SEED value '{value}': {source}")]
    InvalidSeed {
        value: String,
        source: std::num::ParseIntError,
    },
    #[error("invalid REPLY_STRATEGY value '{0}', expected auto, provider or canned")]
    InvalidReplyStrategy(String),
    #[error("REPLY_STRATEGY=provider requires OPENAI_API_KEY")]
    ProviderWithoutKey,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub log_filter: String,
    pub database_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    pub openai_chat_model: String,
    pub openai_image_model: String,
    pub telegram_bot_token: Option<String>,
    pub telegram_api_base: String,
    /// Remote photo service. `None` runs the photo pipeline in-process.
    pub photo_service_url: Option<String>,
    pub reply_strategy: ReplyStrategyKind,
    pub rng_seed: Option<u64>,
    pub chat_timeout: Duration,
    pub image_timeout: Duration,
    pub photo_pipeline_timeout: Duration,
    pub notify_timeout: Duration,
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn trimmed_url(value: String) -> String {
    value.trim_end_matches('/').to_string()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = match non_empty("PORT") {
            Some(value) => value
                .parse()
                .map_err(|source| ConfigError::InvalidPort { value, source })?,
            None => DEFAULT_PORT,
        };

        let rng_seed = match non_empty("RNG_SEED") {
            Some(value) => Some(
                value
                    .parse()
                    .map_err(|source| ConfigError::InvalidSeed { value, source })?,
            ),
            None => None,
        };

        let reply_strategy = match non_empty("REPLY_STRATEGY")
            .map(|value| value.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("auto") => ReplyStrategyKind::Auto,
            Some("provider") => ReplyStrategyKind::Provider,
            Some("canned") => ReplyStrategyKind::Canned,
            Some(other) => return Err(ConfigError::InvalidReplyStrategy(other.to_string())),
        };

        let openai_api_key = non_empty("OPENAI_API_KEY");
        if reply_strategy == ReplyStrategyKind::Provider && openai_api_key.is_none() {
            return Err(ConfigError::ProviderWithoutKey);
        }

        Ok(Self {
            port,
            log_filter: non_empty("LOG_FILTER").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            database_url: resolve_database_url(),
            openai_api_key,
            openai_api_base: trimmed_url(
                non_empty("OPENAI_API_BASE").unwrap_or_else(|| DEFAULT_OPENAI_API_BASE.to_string()),
            ),
            openai_chat_model: non_empty("OPENAI_CHAT_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENAI_CHAT_MODEL.to_string()),
            openai_image_model: non_empty("OPENAI_IMAGE_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENAI_IMAGE_MODEL.to_string()),
            telegram_bot_token: non_empty("TELEGRAM_BOT_TOKEN"),
            telegram_api_base: trimmed_url(
                non_empty("TELEGRAM_API_BASE")
                    .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string()),
            ),
            photo_service_url: non_empty("PHOTO_SERVICE_URL"),
            reply_strategy,
            rng_seed,
            chat_timeout: Duration::from_secs(DEFAULT_CHAT_TIMEOUT_SECS),
            image_timeout: Duration::from_secs(DEFAULT_IMAGE_TIMEOUT_SECS),
            photo_pipeline_timeout: Duration::from_secs(DEFAULT_PHOTO_PIPELINE_TIMEOUT_SECS),
            notify_timeout: Duration::from_secs(DEFAULT_NOTIFY_TIMEOUT_SECS),
        })
    }

    /// Whether free text goes to the text provider rather than the canned pools.
    pub fn uses_text_provider(&self) -> bool {
        match self.reply_strategy {
            ReplyStrategyKind::Canned => false,
            ReplyStrategyKind::Provider | ReplyStrategyKind::Auto => self.openai_api_key.is_some(),
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            database_url: None,
            openai_api_key: None,
            openai_api_base: DEFAULT_OPENAI_API_BASE.to_string(),
            openai_chat_model: DEFAULT_OPENAI_CHAT_MODEL.to_string(),
            openai_image_model: DEFAULT_OPENAI_IMAGE_MODEL.to_string(),
            telegram_bot_token: None,
            telegram_api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
            photo_service_url: None,
            reply_strategy: ReplyStrategyKind::Canned,
            rng_seed: Some(1),
            chat_timeout: Duration::from_secs(1),
            image_timeout: Duration::from_secs(1),
            photo_pipeline_timeout: Duration::from_secs(1),
            notify_timeout: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_selection_follows_key_presence() {
        let mut config = Config::for_tests();
        config.reply_strategy = ReplyStrategyKind::Auto;
        assert!(!config.uses_text_provider());
        config.openai_api_key = Some("sk-test".to_string());
        assert!(config.uses_text_provider());
        config.reply_strategy = ReplyStrategyKind::Canned;
        assert!(!config.uses_text_provider());
    }
}
