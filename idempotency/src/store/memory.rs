//! In-process attempt store.
//!
//! Records live only as long as the owning instance; nothing is shared
//! between service replicas. Expiry is manual: every admission first sweeps
//! records older than the retention window.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use super::AttemptStore;
use crate::error::IdempotencyError;
use crate::eviction::RetentionPolicy;
use crate::fingerprint::Fingerprint;
use crate::key::IdempotencyKey;
use crate::record::{AttemptRecord, Outcome};

/// Concurrent map of idempotency key -> attempt record.
#[derive(Clone)]
pub struct MemoryAttemptStore {
    records: Arc<DashMap<IdempotencyKey, AttemptRecord>>,
    retention: RetentionPolicy,
}

impl MemoryAttemptStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            retention,
        }
    }

    /// Admit against an explicit clock reading.
    pub fn try_admit_at(
        &self,
        key: IdempotencyKey,
        fingerprint: &Fingerprint,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> Outcome {
        // Must run before entry(): retain() write-locks each shard in turn
        self.sweep_at(now);

        // entry() holds the shard write lock until the match ends, so the
        // lookup and the insert/update cannot interleave with another caller.
        match self.records.entry(key) {
            Entry::Vacant(vacant) => {
                vacant.insert(AttemptRecord::first_attempt_at(fingerprint.clone(), endpoint, now));
                Outcome::Admitted
            }
            Entry::Occupied(mut occupied) => {
                if self.retention.is_expired(occupied.get(), now) {
                    // Aged out between the sweep and here
                    occupied.insert(AttemptRecord::first_attempt_at(fingerprint.clone(), endpoint, now));
                    return Outcome::Admitted;
                }
                let record = occupied.get_mut();
                if record.matches(fingerprint, endpoint) {
                    record.record_attempt();
                    Outcome::Duplicate(record.clone())
                } else {
                    Outcome::KeyReuse(record.clone())
                }
            }
        }
    }

    /// Remove every record older than the retention window.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = self.retention.cutoff(now);
        let before = self.records.len();
        self.records.retain(|_, record| record.first_seen_at() >= cutoff);
        let evicted = before.saturating_sub(self.records.len());
        if evicted > 0 {
            debug!(evicted, "Evicted expired idempotency records");
        }
        evicted
    }

    /// Record for `key`, if one is held (for monitoring and tests)
    pub fn get(&self, key: &IdempotencyKey) -> Option<AttemptRecord> {
        self.records.get(key).map(|r| r.clone())
    }

    /// Get store size (for monitoring)
    pub fn size(&self) -> usize {
        self.records.len()
    }
}

impl Default for MemoryAttemptStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn try_admit(
        &self,
        key: IdempotencyKey,
        fingerprint: &Fingerprint,
        endpoint: &str,
    ) -> Result<Outcome, IdempotencyError> {
        Ok(self.try_admit_at(key, fingerprint, endpoint, Utc::now()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
