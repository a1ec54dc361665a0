pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod eviction;
pub mod fingerprint;
pub mod key;
pub mod middleware;
pub mod record;
pub mod store;

pub use cache::{CacheError, DistributedCache, LocalCache, RedisCache, IDEMPOTENCY_TAG};
pub use config::{CliArgs, Config, StoreBackend};
pub use engine::{Decision, FailMode, IdempotencyEngine, SharedEngine, DEFAULT_STORE_TIMEOUT};
pub use error::IdempotencyError;
pub use eviction::{RetentionPolicy, DEFAULT_RETENTION};
pub use fingerprint::{fingerprint_body, fingerprint_value, Fingerprint};
pub use key::{key_from_headers, parse_key, IdempotencyKey, KeyError, IDEMPOTENCY_KEY_HEADER};
pub use middleware::{idempotency_guard, MAX_FINGERPRINT_BODY_SIZE};
pub use record::{AttemptRecord, Outcome};
pub use store::{AttemptStore, CachedAttemptStore, MemoryAttemptStore, DEFAULT_CACHE_TTL, DEFAULT_KEY_PREFIX};

use std::sync::Arc;

/// Build the attempt store selected by `config`.
///
/// The Redis backend connects eagerly; an unreachable server is a startup
/// error rather than a first-request surprise.
pub async fn build_store(config: &Config) -> Result<Arc<dyn AttemptStore>, IdempotencyError> {
    match config.store_backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryAttemptStore::new(RetentionPolicy::new(config.retention)))),
        StoreBackend::Redis => {
            let cache = RedisCache::connect(&config.redis_url, config.store_timeout).await?;
            Ok(Arc::new(CachedAttemptStore::new(
                Arc::new(cache),
                config.cache_ttl,
                config.cache_key_prefix.clone(),
            )))
        }
    }
}

/// Engine wired from `config`.
pub async fn build_engine(config: &Config) -> Result<SharedEngine, IdempotencyError> {
    let store = build_store(config).await?;
    tracing::info!(
        store = store.backend(),
        fail_mode = ?config.fail_mode,
        store_timeout_ms = config.store_timeout.as_millis() as u64,
        "Idempotency engine ready"
    );
    Ok(Arc::new(
        IdempotencyEngine::new(store)
            .with_store_timeout(config.store_timeout)
            .with_fail_mode(config.fail_mode),
    ))
}
