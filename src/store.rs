use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::entitlement::{self, Denial};
use crate::types::{ChatMessage, Role, SettingsPatch, UserRecord, MAX_SPICY_LEVEL};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("user {0} not found")]
    NotFound(i64),
    #[error("settings change requires premium ({0:?})")]
    Entitlement(Denial),
    #[error("spicy_level must be between 0 and {MAX_SPICY_LEVEL}, got {0}")]
    InvalidSpicyLevel(i32),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Keyed persistence for user settings and per-user chat history.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, telegram_id: i64) -> Result<Option<UserRecord>, StoreError>;

    /// Inserts a default record, or returns the existing one untouched if the identity is known.
    async fn create_user(
        &self,
        telegram_id: i64,
        first_name: &str,
        username: Option<&str>,
    ) -> Result<UserRecord, StoreError>;

    async fn touch_user(&self, telegram_id: i64) -> Result<(), StoreError>;

    /// Applies the patch and returns the stored record. Refuses premium-only values for
    /// accounts whose persisted `is_premium` is false.
    async fn update_settings(
        &self,
        telegram_id: i64,
        patch: &SettingsPatch,
    ) -> Result<UserRecord, StoreError>;

    async fn append_message(
        &self,
        telegram_id: i64,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage, StoreError>;

    /// The `limit` most recent messages, oldest first.
    async fn recent_messages(
        &self,
        telegram_id: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError>;

    async fn get_or_create_user(
        &self,
        telegram_id: i64,
        first_name: &str,
        username: Option<&str>,
    ) -> Result<UserRecord, StoreError> {
        match self.get_user(telegram_id).await? {
            Some(mut user) => {
                self.touch_user(telegram_id).await?;
                user.last_active = Utc::now();
                Ok(user)
            }
            None => {
                let user = self.create_user(telegram_id, first_name, username).await?;
                tracing::info!(telegram_id, "registered new user");
                Ok(user)
            }
        }
    }
}

pub(crate) fn validate_patch(is_premium: bool, patch: &SettingsPatch) -> Result<(), StoreError> {
    if let Some(level) = patch.spicy_level {
        if !(0..=MAX_SPICY_LEVEL).contains(&level) {
            return Err(StoreError::InvalidSpicyLevel(level));
        }
    }
    entitlement::check_patch(is_premium, patch).map_err(StoreError::Entitlement)
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<i64, UserRecord>,
    messages: HashMap<i64, Vec<ChatMessage>>,
    next_message_id: i64,
}

/// Process-local store used when no database is configured.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn put_user(&self, user: UserRecord) {
        self.state.lock().await.users.insert(user.telegram_id, user);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, telegram_id: i64) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.state.lock().await.users.get(&telegram_id).cloned())
    }

    async fn create_user(
        &self,
        telegram_id: i64,
        first_name: &str,
        username: Option<&str>,
    ) -> Result<UserRecord, StoreError> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .entry(telegram_id)
            .or_insert_with(|| UserRecord::new(telegram_id, first_name, username));
        Ok(user.clone())
    }

    async fn touch_user(&self, telegram_id: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&telegram_id)
            .ok_or(StoreError::NotFound(telegram_id))?;
        user.last_active = Utc::now();
        Ok(())
    }

    async fn update_settings(
        &self,
        telegram_id: i64,
        patch: &SettingsPatch,
    ) -> Result<UserRecord, StoreError> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&telegram_id)
            .ok_or(StoreError::NotFound(telegram_id))?;
        validate_patch(user.is_premium, patch)?;
        patch.apply_to(user);
        Ok(user.clone())
    }

    async fn append_message(
        &self,
        telegram_id: i64,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage, StoreError> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&telegram_id) {
            return Err(StoreError::NotFound(telegram_id));
        }
        state.next_message_id += 1;
        let message = ChatMessage {
            id: state.next_message_id,
            telegram_id,
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        state
            .messages
            .entry(telegram_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn recent_messages(
        &self,
        telegram_id: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let state = self.state.lock().await;
        let Some(messages) = state.messages.get(&telegram_id) else {
            return Ok(Vec::new());
        };
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }
}
