//! Attempt store on top of a [`DistributedCache`].
//!
//! State is shared by every instance pointing at the same cache, so this is
//! the variant for multi-replica deployments. Entries expire through the
//! cache's own TTL.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::AttemptStore;
use crate::cache::{DistributedCache, IDEMPOTENCY_TAG};
use crate::error::IdempotencyError;
use crate::fingerprint::Fingerprint;
use crate::key::IdempotencyKey;
use crate::record::{AttemptRecord, Outcome};

/// Default entry lifetime (60 minutes)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Default namespace for cache keys
pub const DEFAULT_KEY_PREFIX: &str = "idempotent";

pub struct CachedAttemptStore {
    cache: Arc<dyn DistributedCache>,
    ttl: Duration,
    prefix: String,
}

impl CachedAttemptStore {
    pub fn new(cache: Arc<dyn DistributedCache>, ttl: Duration, prefix: impl Into<String>) -> Self {
        Self {
            cache,
            ttl,
            prefix: prefix.into(),
        }
    }

    /// Cache key holding the serialized record
    pub fn record_key(&self, key: &IdempotencyKey) -> String {
        format!("{}:{}", self.prefix, key)
    }

    /// Cache key holding the duplicate counter for one record generation.
    ///
    /// Keyed by first-seen time so a key admitted again after expiry starts
    /// from a fresh counter.
    pub fn attempts_key(&self, key: &IdempotencyKey, record: &AttemptRecord) -> String {
        format!(
            "{}:{}:attempts:{}",
            self.prefix,
            key,
            record.first_seen_at().timestamp_millis()
        )
    }
}

#[async_trait]
impl AttemptStore for CachedAttemptStore {
    async fn try_admit(
        &self,
        key: IdempotencyKey,
        fingerprint: &Fingerprint,
        endpoint: &str,
    ) -> Result<Outcome, IdempotencyError> {
        let record_key = self.record_key(&key);
        let candidate = AttemptRecord::first_attempt(fingerprint.clone(), endpoint);
        let (stored, created) = self
            .cache
            .get_or_create(&record_key, serde_json::to_string(&candidate)?, self.ttl, &[IDEMPOTENCY_TAG])
            .await?;

        if created {
            debug!(idempotency_key = %key, cache_key = %record_key, "Stored new attempt record");
            return Ok(Outcome::Admitted);
        }

        let mut record: AttemptRecord = serde_json::from_str(&stored)?;
        if !record.matches(fingerprint, endpoint) {
            return Ok(Outcome::KeyReuse(record));
        }

        // The counter holds duplicates only; the first attempt is implicit.
        // It lives twice as long as the record so it cannot expire while the
        // record (refreshed by the `set` below) is still readable.
        let duplicates = self
            .cache
            .increment(&self.attempts_key(&key, &record), self.ttl.saturating_mul(2))
            .await?;
        record.set_attempt_count(1 + duplicates.max(0) as u64);

        // Mirror the count into the record for readers. Concurrent duplicates
        // may overwrite each other here; the counter key is authoritative.
        self.cache
            .set(&record_key, serde_json::to_string(&record)?, self.ttl, &[IDEMPOTENCY_TAG])
            .await?;

        Ok(Outcome::Duplicate(record))
    }

    fn backend(&self) -> &'static str {
        "cache"
    }
}
