//! Errors returned by the HTTP handlers. Every variant renders as `{"error": ...}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::dispatcher::DispatchError;
use crate::photo::PhotoError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Internal(message) => {
                tracing::error!(error = %message, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => AppError::NotFound(err.to_string()),
            StoreError::Entitlement(_) => AppError::Forbidden(err.to_string()),
            StoreError::InvalidSpicyLevel(_) => AppError::BadRequest(err.to_string()),
            StoreError::Database(_) | StoreError::Migrate(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Store(err) => err.into(),
        }
    }
}

impl From<PhotoError> for AppError {
    fn from(err: PhotoError) -> Self {
        match err {
            PhotoError::MissingFields => AppError::BadRequest(err.to_string()),
            PhotoError::UserNotFound => AppError::NotFound(err.to_string()),
            PhotoError::NsfwRequiresPremium => AppError::Forbidden(err.to_string()),
            PhotoError::Store(err) => err.into(),
        }
    }
}
