//! Distributed cache abstraction used by the externally-backed attempt store.
//!
//! Values are opaque strings (the store writes JSON). Every write carries an
//! explicit TTL; expiry is the cache's job, nobody sweeps.

mod local;
mod redis_cache;

pub use self::local::LocalCache;
pub use self::redis_cache::RedisCache;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Tag attached to every idempotency entry
pub const IDEMPOTENCY_TAG: &str = "idempotency";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection failed: {0}")]
    Connection(String),

    #[error("cache command failed: {0}")]
    Command(String),

    #[error("cache value for {key} is not a counter")]
    NotACounter { key: String },
}

impl From<::redis::RedisError> for CacheError {
    fn from(err: ::redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() || err.is_io_error() {
            CacheError::Connection(err.to_string())
        } else {
            CacheError::Command(err.to_string())
        }
    }
}

/// A cache shared across service instances.
#[async_trait]
pub trait DistributedCache: Send + Sync {
    /// Store `value` under `key` unless the key already holds a live value.
    ///
    /// Returns the value now held and whether this call created it. The
    /// check and the write are one atomic step.
    async fn get_or_create(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
        tags: &[&str],
    ) -> Result<(String, bool), CacheError>;

    /// Overwrite `key`, resetting its TTL.
    async fn set(&self, key: &str, value: String, ttl: Duration, tags: &[&str]) -> Result<(), CacheError>;

    /// Atomically add one to the counter at `key` and return the new value.
    ///
    /// A missing counter starts at zero. Every call resets the expiry to
    /// `ttl`, so a counter in steady use never lapses.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, CacheError>;

    /// Drop every entry written with `tag`. Returns how many were removed.
    async fn remove_by_tag(&self, tag: &str) -> Result<usize, CacheError>;
}
