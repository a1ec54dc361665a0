use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

use crate::cache::CacheError;
use crate::key::KeyError;

/// Idempotency layer error types.
///
/// The `Display` text of the client-facing variants is the exact message
/// returned in the response body.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("Idempotency-Key header is required.")]
    MissingKey,

    #[error("Idempotency-Key header is not a valid GUID.")]
    MalformedKey,

    #[error("This request has already been processed.")]
    DuplicateRequest,

    #[error("Idempotency-Key has already been used with a different request payload.")]
    KeyReuse,

    #[error("Request body exceeds {0} bytes.")]
    PayloadTooLarge(usize),

    #[error("Idempotency store is unavailable.")]
    StoreUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl IdempotencyError {
    /// Client-protocol errors are the caller's fault and never logged as failures.
    pub fn is_client_error(&self) -> bool {
        matches!(self, IdempotencyError::MissingKey | IdempotencyError::MalformedKey)
    }
}

impl From<KeyError> for IdempotencyError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Missing => IdempotencyError::MissingKey,
            KeyError::Malformed => IdempotencyError::MalformedKey,
        }
    }
}

impl From<IdempotencyError> for StatusCode {
    fn from(err: IdempotencyError) -> Self {
        From::from(&err)
    }
}

impl From<&IdempotencyError> for StatusCode {
    fn from(err: &IdempotencyError) -> Self {
        match err {
            IdempotencyError::MissingKey => StatusCode::BAD_REQUEST,
            IdempotencyError::MalformedKey => StatusCode::BAD_REQUEST,
            IdempotencyError::DuplicateRequest => StatusCode::CONFLICT,
            IdempotencyError::KeyReuse => StatusCode::UNPROCESSABLE_ENTITY,
            IdempotencyError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            IdempotencyError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            IdempotencyError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IdempotencyError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IdempotencyError {
    fn into_response(self) -> axum::response::Response {
        let status: StatusCode = From::from(&self);
        // Backend detail stays in the logs, not in the response
        (status, Json(self.to_string())).into_response()
    }
}

impl From<CacheError> for IdempotencyError {
    fn from(err: CacheError) -> Self {
        IdempotencyError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for IdempotencyError {
    fn from(err: serde_json::Error) -> Self {
        IdempotencyError::InternalError(format!("Attempt record serialization failed: {}", err))
    }
}
