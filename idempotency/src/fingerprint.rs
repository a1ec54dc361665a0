//! Request body fingerprinting.
//!
//! Bodies are normalised to canonical JSON (object keys sorted) before
//! hashing, so `{"a":1,"b":2}` and `{ "b": 2, "a": 1 }` share a fingerprint.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Base64-encoded SHA-256 digest of a request payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint an already deserialized payload; `None` hashes as empty text.
pub fn fingerprint_value(payload: Option<&serde_json::Value>) -> Fingerprint {
    let canonical = match payload {
        // serde_json's default map is ordered by key
        Some(value) => value.to_string(),
        None => String::new(),
    };
    digest(canonical.as_bytes())
}

/// Fingerprint raw body bytes.
///
/// Empty bodies count as absent. Bodies that are not JSON are hashed verbatim.
pub fn fingerprint_body(body: &[u8]) -> Fingerprint {
    if body.iter().all(u8::is_ascii_whitespace) {
        return fingerprint_value(None);
    }
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => fingerprint_value(Some(&value)),
        Err(_) => digest(body),
    }
}

fn digest(bytes: &[u8]) -> Fingerprint {
    let hash = Sha256::digest(bytes);
    Fingerprint(general_purpose::STANDARD.encode(hash))
}
