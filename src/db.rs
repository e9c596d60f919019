use std::env;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::entitlement;
use crate::personality::PersonalityMode;
use crate::store::{validate_patch, Store, StoreError};
use crate::types::{ChatMessage, Role, SettingsPatch, UserRecord};

const USER_COLUMNS: &str = "telegram_id, username, first_name, personality_mode, nsfw_enabled, spicy_level, is_premium, created_at, last_active";

/// `DATABASE_URL` wins; otherwise a URL is assembled from `POSTGRES_*` / `PG*` variables when
/// at least a host is given. `None` means no database is configured.
pub fn resolve_database_url() -> Option<String> {
    if let Ok(url) = env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            return Some(url);
        }
    }
    let host = env::var("POSTGRES_HOST")
        .or_else(|_| env::var("PGHOST"))
        .ok()
        .filter(|value| !value.trim().is_empty())?;
    let port = env::var("POSTGRES_PORT")
        .or_else(|_| env::var("PGPORT"))
        .unwrap_or_else(|_| "5432".to_string());
    let user = env::var("POSTGRES_USER")
        .or_else(|_| env::var("PGUSER"))
        .unwrap_or_else(|_| "postgres".to_string());
    let password = env::var("POSTGRES_PASSWORD")
        .or_else(|_| env::var("PGPASSWORD"))
        .unwrap_or_default();
    let db = env::var("POSTGRES_DB")
        .or_else(|_| env::var("PGDATABASE"))
        .unwrap_or_else(|_| "companion_bot".to_string());
    Some(format!("postgres://{user}:{password}@{host}:{port}/{db}"))
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

/// Whether a patch may be written to an account without premium. Bound into the
/// settings UPDATE next to the row's own `is_premium`.
fn allowed_without_premium(patch: &SettingsPatch) -> bool {
    entitlement::check_patch(false, patch).is_ok()
}

/// Explains a settings UPDATE that matched no row.
fn refusal(telegram_id: i64, current: Option<&UserRecord>, patch: &SettingsPatch) -> StoreError {
    match current {
        None => StoreError::NotFound(telegram_id),
        Some(user) => validate_patch(user.is_premium, patch)
            .err()
            .unwrap_or(StoreError::NotFound(telegram_id)),
    }
}

fn parse_user_row(row: sqlx::postgres::PgRow) -> UserRecord {
    UserRecord {
        telegram_id: row.get("telegram_id"),
        username: row.get("username"),
        first_name: row.get("first_name"),
        personality_mode: PersonalityMode::from_stored(&row.get::<String, _>("personality_mode")),
        nsfw_enabled: row.get("nsfw_enabled"),
        spicy_level: row.get("spicy_level"),
        is_premium: row.get("is_premium"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        last_active: row.get::<DateTime<Utc>, _>("last_active"),
    }
}

fn parse_message_row(row: sqlx::postgres::PgRow) -> ChatMessage {
    ChatMessage {
        id: row.get("id"),
        telegram_id: row.get("telegram_id"),
        role: Role::from_db(&row.get::<String, _>("role")),
        content: row.get("content"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_user(&self, telegram_id: i64) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM telegram_users WHERE telegram_id = $1"
        ))
        .bind(telegram_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(parse_user_row))
    }

    async fn create_user(
        &self,
        telegram_id: i64,
        first_name: &str,
        username: Option<&str>,
    ) -> Result<UserRecord, StoreError> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO telegram_users (telegram_id, username, first_name) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (telegram_id) DO NOTHING \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(telegram_id)
        .bind(username)
        .bind(first_name)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = inserted {
            return Ok(parse_user_row(row));
        }
        // Lost a race with a concurrent first contact; the winner's row is authoritative.
        self.get_user(telegram_id)
            .await?
            .ok_or(StoreError::NotFound(telegram_id))
    }

    async fn touch_user(&self, telegram_id: i64) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE telegram_users SET last_active = now() WHERE telegram_id = $1")
                .bind(telegram_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(telegram_id));
        }
        Ok(())
    }

    async fn update_settings(
        &self,
        telegram_id: i64,
        patch: &SettingsPatch,
    ) -> Result<UserRecord, StoreError> {
        // Range checks only; the premium condition is evaluated by the UPDATE itself.
        validate_patch(true, patch)?;
        let updated = sqlx::query(&format!(
            "UPDATE telegram_users SET \
                personality_mode = COALESCE($2, personality_mode), \
                nsfw_enabled = COALESCE($3, nsfw_enabled), \
                spicy_level = COALESCE($4, spicy_level) \
             WHERE telegram_id = $1 AND (is_premium OR $5) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(telegram_id)
        .bind(patch.personality_mode.map(|mode| mode.as_str()))
        .bind(patch.nsfw_enabled)
        .bind(patch.spicy_level)
        .bind(allowed_without_premium(patch))
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = updated {
            return Ok(parse_user_row(row));
        }
        let current = self.get_user(telegram_id).await?;
        Err(refusal(telegram_id, current.as_ref(), patch))
    }

    async fn append_message(
        &self,
        telegram_id: i64,
        role: Role,
        content: &str,
    ) -> Result<ChatMessage, StoreError> {
        let row = sqlx::query(
            "INSERT INTO chat_history (telegram_id, role, content) VALUES ($1, $2, $3) \
             RETURNING id, telegram_id, role, content, created_at",
        )
        .bind(telegram_id)
        .bind(role.as_str())
        .bind(content)
        .fetch_one(&self.pool)
        .await?;
        Ok(parse_message_row(row))
    }

    async fn recent_messages(
        &self,
        telegram_id: i64,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, telegram_id, role, content, created_at FROM chat_history \
             WHERE telegram_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2",
        )
        .bind(telegram_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut messages = rows.into_iter().map(parse_message_row).collect::<Vec<_>>();
        messages.reverse();
        Ok(messages)
    }
}
