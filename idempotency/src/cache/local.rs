use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{CacheError, DistributedCache};

struct LocalEntry {
    value: String,
    expires_at: Instant,
    tags: Vec<String>,
}

impl LocalEntry {
    fn new(value: String, ttl: Duration, tags: &[&str]) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process [`DistributedCache`] for tests and single-instance runs.
///
/// Same atomicity as the Redis implementation: each operation holds the
/// entry's shard lock for its whole read-modify-write.
#[derive(Clone, Default)]
pub struct LocalCache {
    entries: Arc<DashMap<String, LocalEntry>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live entry value, if any.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Drop expired entries. Lookups already ignore them; this frees memory.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
    }

    /// Entry count including not-yet-purged expired ones (for monitoring)
    pub fn size(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl DistributedCache for LocalCache {
    async fn get_or_create(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
        tags: &[&str],
    ) -> Result<(String, bool), CacheError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok((occupied.get().value.clone(), false))
                } else {
                    occupied.insert(LocalEntry::new(value.clone(), ttl, tags));
                    Ok((value, true))
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LocalEntry::new(value.clone(), ttl, tags));
                Ok((value, true))
            }
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration, tags: &[&str]) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), LocalEntry::new(value, ttl, tags));
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, CacheError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_live(now) => {
                let entry = occupied.get_mut();
                let current: i64 = entry.value.parse().map_err(|_| CacheError::NotACounter {
                    key: key.to_string(),
                })?;
                let next = current + 1;
                entry.value = next.to_string();
                entry.expires_at = now + ttl;
                Ok(next)
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(LocalEntry::new("1".to_string(), ttl, &[]));
                Ok(1)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LocalEntry::new("1".to_string(), ttl, &[]));
                Ok(1)
            }
        }
    }

    async fn remove_by_tag(&self, tag: &str) -> Result<usize, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.tags.iter().any(|t| t == tag));
        Ok(before.saturating_sub(self.entries.len()))
    }
}
