use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::{Config, ConfigError};
use crate::db::PgStore;
use crate::dispatcher::Dispatcher;
use crate::error::AppError;
use crate::image::{ImageProvider, OpenAiImageProvider, PlaceholderImageProvider};
use crate::notifier::{LogNotifier, Notifier, TelegramNotifier};
use crate::photo::{HttpPhotoPipeline, LocalPhotoPipeline, PhotoPipeline, PhotoService};
use crate::responder::{OpenAiChatProvider, ResponseGenerator, ResponseStrategy};
use crate::rng::{RandomSource, StdRandom};
use crate::store::{MemoryStore, Store, StoreError};
use crate::types::{AppState, InboundMessage, PhotoRequest, PhotoResponse, TelegramUpdate};

/// Display name used when the sender has none.
const DEFAULT_FIRST_NAME: &str = "User";

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wires the collaborators chosen by `config` around `store`.
pub fn build_state(config: &Config, store: Arc<dyn Store>) -> Arc<AppState> {
    let client = reqwest::Client::new();
    let rng: Arc<dyn RandomSource> = Arc::new(StdRandom::from_seed(config.rng_seed));

    let notifier: Arc<dyn Notifier> = match config.telegram_bot_token.as_deref() {
        Some(token) => Arc::new(TelegramNotifier::new(
            client.clone(),
            &config.telegram_api_base,
            token,
            config.notify_timeout,
        )),
        None => {
            tracing::warn!("TELEGRAM_BOT_TOKEN missing, outbound messages are only logged");
            Arc::new(LogNotifier)
        }
    };

    let images: Arc<dyn ImageProvider> = match config.openai_api_key.as_deref() {
        Some(key) => Arc::new(OpenAiImageProvider::new(
            client.clone(),
            &config.openai_api_base,
            key,
            &config.openai_image_model,
            config.image_timeout,
        )),
        None => Arc::new(PlaceholderImageProvider),
    };

    let photo = Arc::new(PhotoService::new(
        store.clone(),
        images,
        notifier.clone(),
        rng.clone(),
    ));
    let pipeline: Arc<dyn PhotoPipeline> = match config.photo_service_url.as_deref() {
        Some(url) => Arc::new(HttpPhotoPipeline::new(
            client.clone(),
            url,
            config.photo_pipeline_timeout,
        )),
        None => Arc::new(LocalPhotoPipeline::new(photo.clone())),
    };

    let strategy = match config.openai_api_key.as_deref() {
        Some(key) if config.uses_text_provider() => {
            ResponseStrategy::ProviderBacked(Arc::new(OpenAiChatProvider::new(
                client,
                &config.openai_api_base,
                key,
                &config.openai_chat_model,
                config.chat_timeout,
            )))
        }
        _ => ResponseStrategy::CannedFallback,
    };
    let responder = ResponseGenerator::new(strategy, rng);

    Arc::new(AppState {
        dispatcher: Dispatcher::new(store, responder, pipeline, notifier),
        photo,
    })
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/telegram-bot",
            get(bot_status).post(telegram_webhook).options(preflight),
        )
        .route(
            "/generate-photo",
            get(photo_status).post(generate_photo).options(preflight),
        )
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request| {
                tracing::info_span!(
                    "request",
                    request_id = %Uuid::new_v4(),
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": Utc::now().to_rfc3339() }))
}

async fn preflight() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, GET, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
        ],
    )
}

async fn bot_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "Bot is running",
        "bot": env!("CARGO_PKG_NAME"),
        "replies": state.dispatcher.reply_strategy(),
    }))
}

async fn photo_status() -> impl IntoResponse {
    Json(json!({
        "status": "Photo generation service",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn telegram_webhook(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let update: TelegramUpdate = serde_json::from_slice(&body)
        .map_err(|err| AppError::BadRequest(format!("invalid update: {err}")))?;
    let Some(message) = update.message else {
        return Ok(Json(json!({ "ok": true })));
    };
    let (Some(chat), Some(from)) = (message.chat, message.from) else {
        return Err(AppError::BadRequest(
            "message.chat and message.from are required".to_string(),
        ));
    };

    let inbound = InboundMessage {
        telegram_id: from.id,
        chat_id: chat.id,
        first_name: from
            .first_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FIRST_NAME.to_string()),
        username: from.username,
        text: message.text.unwrap_or_default(),
    };
    state.dispatcher.handle(&inbound).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn generate_photo(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<PhotoResponse>, AppError> {
    let request: PhotoRequest = serde_json::from_slice(&body)
        .map_err(|err| AppError::BadRequest(format!("invalid photo request: {err}")))?;
    let response = state.photo.generate(&request).await?;
    Ok(Json(response))
}

pub async fn run() -> Result<(), StartupError> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store: Arc<dyn Store> = match config.database_url.as_deref() {
        Some(url) => Arc::new(PgStore::connect(url).await?),
        None => {
            tracing::warn!("no database configured, user data lives in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let state = build_state(&config, store);
    let strategy = state.dispatcher.reply_strategy();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, replies = strategy, "companion bot listening");
    axum::serve(listener, app).await?;
    Ok(())
}
