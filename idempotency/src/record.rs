use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// State held per idempotency key.
///
/// `fingerprint`, `target_endpoint` and `first_seen_at` are fixed at
/// construction; only `attempt_count` moves, and only upward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    fingerprint: Fingerprint,
    target_endpoint: String,
    first_seen_at: DateTime<Utc>,
    attempt_count: u64,
}

impl AttemptRecord {
    /// First observation of a key.
    pub fn first_attempt(fingerprint: Fingerprint, target_endpoint: impl Into<String>) -> Self {
        Self::first_attempt_at(fingerprint, target_endpoint, Utc::now())
    }

    pub fn first_attempt_at(
        fingerprint: Fingerprint,
        target_endpoint: impl Into<String>,
        first_seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            fingerprint,
            target_endpoint: target_endpoint.into(),
            first_seen_at,
            attempt_count: 1,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn target_endpoint(&self) -> &str {
        &self.target_endpoint
    }

    pub fn first_seen_at(&self) -> DateTime<Utc> {
        self.first_seen_at
    }

    pub fn attempt_count(&self) -> u64 {
        self.attempt_count
    }

    /// Same body sent to the same endpoint.
    pub fn matches(&self, fingerprint: &Fingerprint, endpoint: &str) -> bool {
        self.fingerprint == *fingerprint && self.target_endpoint == endpoint
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempt_count = self.attempt_count.saturating_add(1);
    }

    /// Adopt the count kept by an external atomic counter.
    pub(crate) fn set_attempt_count(&mut self, count: u64) {
        self.attempt_count = count.max(1);
    }
}

/// Result of asking an attempt store to admit a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// First sight of the key; the request may run.
    Admitted,
    /// The key was already used for this same request. Carries the updated record.
    Duplicate(AttemptRecord),
    /// The key was already used for a different body or endpoint. Record unchanged.
    KeyReuse(AttemptRecord),
}

impl Outcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Outcome::Admitted)
    }
}
