//! Idempotency-Key header parsing.

use axum::http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Header carrying the caller's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// A validated, caller-supplied idempotency key (a UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(Uuid);

impl IdempotencyKey {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for IdempotencyKey {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a key was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    Missing,
    Malformed,
}

/// Validate the raw header value.
///
/// Absent or whitespace-only values are `Missing`; anything that is not a
/// UUID (including non-UTF-8 bytes) is `Malformed`.
pub fn parse_key(raw: Option<&HeaderValue>) -> Result<IdempotencyKey, KeyError> {
    let raw = match raw {
        Some(value) => value,
        None => return Err(KeyError::Missing),
    };

    if raw.as_bytes().iter().all(u8::is_ascii_whitespace) {
        return Err(KeyError::Missing);
    }

    let text = raw.to_str().map_err(|_| KeyError::Malformed)?;
    Uuid::parse_str(text.trim())
        .map(IdempotencyKey)
        .map_err(|_| KeyError::Malformed)
}

/// Extract and validate the key from request headers.
pub fn key_from_headers(headers: &HeaderMap) -> Result<IdempotencyKey, KeyError> {
    parse_key(headers.get(IDEMPOTENCY_KEY_HEADER))
}
