use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatcher::Dispatcher;
use crate::personality::PersonalityMode;
use crate::photo::PhotoService;

pub const DEFAULT_SPICY_LEVEL: i32 = 30;
pub const MAX_SPICY_LEVEL: i32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub personality_mode: PersonalityMode,
    pub nsfw_enabled: bool,
    pub spicy_level: i32,
    pub is_premium: bool,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl UserRecord {
    pub fn new(telegram_id: i64, first_name: &str, username: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            telegram_id,
            username: username.map(str::to_string),
            first_name: first_name.to_string(),
            personality_mode: PersonalityMode::default(),
            nsfw_enabled: false,
            spicy_level: DEFAULT_SPICY_LEVEL,
            is_premium: false,
            created_at: now,
            last_active: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Anything that is not literally `user` is treated as the bot's side.
    pub fn from_db(value: &str) -> Self {
        if value == "user" {
            Role::User
        } else {
            Role::Assistant
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub telegram_id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Typed partial update of the mutable user settings. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub personality_mode: Option<PersonalityMode>,
    pub nsfw_enabled: Option<bool>,
    pub spicy_level: Option<i32>,
}

impl SettingsPatch {
    pub fn mode(mode: PersonalityMode) -> Self {
        Self {
            personality_mode: Some(mode),
            ..Self::default()
        }
    }

    pub fn nsfw(enabled: bool) -> Self {
        Self {
            nsfw_enabled: Some(enabled),
            ..Self::default()
        }
    }

    pub fn spicy(level: i32) -> Self {
        Self {
            spicy_level: Some(level),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, user: &mut UserRecord) {
        if let Some(mode) = self.personality_mode {
            user.personality_mode = mode;
        }
        if let Some(enabled) = self.nsfw_enabled {
            user.nsfw_enabled = enabled;
        }
        if let Some(level) = self.spicy_level {
            user.spicy_level = level;
        }
    }
}

/// One chat message as the dispatcher sees it, already lifted out of the webhook envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub telegram_id: i64,
    pub chat_id: i64,
    pub first_name: String,
    pub username: Option<String>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    #[serde(default)]
    pub chat: Option<TelegramChat>,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhotoRequest {
    #[serde(default)]
    pub telegram_id: Option<i64>,
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub style_variation: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhotoResponse {
    pub success: bool,
    pub photo_url: String,
    pub prompt_used: String,
    pub nsfw_mode: bool,
    pub spicy_level: i32,
}

pub struct AppState {
    pub dispatcher: Dispatcher,
    pub photo: Arc<PhotoService>,
}
