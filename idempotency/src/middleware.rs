//! axum interception point.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/users", post(create_user))
//!     .route_layer(axum::middleware::from_fn_with_state(engine, idempotency_guard));
//! ```

use axum::{
    body::Body,
    extract::{OriginalUri, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::engine::{IdempotencyEngine, SharedEngine};
use crate::error::IdempotencyError;
use crate::key::key_from_headers;

/// Largest body buffered for fingerprinting (1 MiB)
pub const MAX_FINGERPRINT_BODY_SIZE: usize = 1024 * 1024;

/// Reject duplicate POST/PATCH submissions before they reach the handler.
///
/// The key header is checked first. Only then is the body buffered to
/// fingerprint it; it is handed on unchanged.
pub async fn idempotency_guard(
    State(engine): State<SharedEngine>,
    req: Request,
    next: Next,
) -> Result<Response, IdempotencyError> {
    if !IdempotencyEngine::is_guarded(req.method()) {
        return Ok(next.run(req).await);
    }

    // Key problems are answered before the body is read, whatever its size.
    if let Err(reason) = key_from_headers(req.headers()) {
        debug!(
            method = %req.method(),
            path = req.uri().path(),
            ?reason,
            "Rejected request with invalid Idempotency-Key"
        );
        return Err(reason.into());
    }

    let (parts, body) = req.into_parts();
    let path = parts
        .extensions
        .get::<OriginalUri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let body_bytes = axum::body::to_bytes(body, MAX_FINGERPRINT_BODY_SIZE)
        .await
        .map_err(|e| {
            let error_msg = e.to_string();
            if error_msg.contains("length limit") || error_msg.contains("too large") {
                warn!(
                    endpoint = %path,
                    body_size_limit = MAX_FINGERPRINT_BODY_SIZE,
                    "Request body exceeds fingerprint size limit"
                );
                IdempotencyError::PayloadTooLarge(MAX_FINGERPRINT_BODY_SIZE)
            } else {
                IdempotencyError::InternalError(format!("Failed to read request body: {}", e))
            }
        })?;

    let decision = engine.evaluate(&parts.method, &path, &parts.headers, &body_bytes).await?;
    if let Some(rejection) = decision.rejection() {
        return Err(rejection);
    }

    let req = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(req).await)
}
