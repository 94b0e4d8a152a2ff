use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Gateway-facing error, one variant per §7 error kind.
///
/// Anything that doesn't fit a structured kind collapses to `Internal` at
/// the boundary, with one `tracing::error!` already logged by whoever
/// constructed it.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("missing API key")]
    MissingApiKey,

    #[error("invalid API key: {0}")]
    InvalidApiKey(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("rate limit exceeded")]
    RateLimited {
        retry_after_secs: u64,
        limit: u32,
        remaining: u32,
        reset_at: chrono::DateTime<chrono::Utc>,
        window: &'static str,
    },

    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("idempotency conflict")]
    IdempotencyConflict,

    #[error("not found")]
    NotFound,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
    #[serde(rename = "requestId")]
    request_id: String,
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::MissingApiKey => "MISSING_API_KEY",
            AppError::InvalidApiKey(_) | AppError::Forbidden(_) => "INVALID_API_KEY",
            AppError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            AppError::NotFound => "NOT_FOUND",
            AppError::PayloadTooLarge => "VALIDATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::MissingApiKey | AppError::InvalidApiKey(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::IdempotencyConflict => StatusCode::CONFLICT,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render the error-specific `details` payload, if any.
    fn details(&self) -> Option<Value> {
        match self {
            AppError::Validation(fields) => Some(serde_json::json!(fields)),
            _ => None,
        }
    }
}

/// A request's correlation id is attached by middleware before any handler
/// (or error) runs; callers without access to the request extension fall
/// back to a fresh id so the envelope is never missing one.
pub fn render(err: AppError, correlation_id: Option<String>) -> Response {
    let status = err.status();
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "internal error surfaced to client");
    }
    let request_id = correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut headers = axum::http::HeaderMap::new();
    if let Ok(value) = axum::http::HeaderValue::from_str(&request_id) {
        headers.insert("X-Correlation-ID", value);
    }
    if let AppError::RateLimited {
        retry_after_secs,
        limit,
        remaining,
        reset_at,
        window,
    } = &err
    {
        if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string()) {
            headers.insert("Retry-After", value);
        }
        if let Ok(value) = axum::http::HeaderValue::from_str(&limit.to_string()) {
            headers.insert("X-RateLimit-Limit", value);
        }
        if let Ok(value) = axum::http::HeaderValue::from_str(&remaining.to_string()) {
            headers.insert("X-RateLimit-Remaining", value);
        }
        if let Ok(value) = axum::http::HeaderValue::from_str(&reset_at.timestamp().to_string()) {
            headers.insert("X-RateLimit-Reset", value);
        }
        if let Ok(value) = axum::http::HeaderValue::from_str(window) {
            headers.insert("X-RateLimit-Window", value);
        }
    }

    let envelope = ErrorEnvelope {
        error: err.to_string(),
        code: err.code(),
        details: err.details(),
        request_id,
    };

    (status, headers, Json(envelope)).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        render(self, None)
    }
}
