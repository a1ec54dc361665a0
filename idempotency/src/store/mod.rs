//! Attempt stores: per-key memory of which requests have already run.

mod cached;
mod memory;

pub use cached::{CachedAttemptStore, DEFAULT_CACHE_TTL, DEFAULT_KEY_PREFIX};
pub use memory::MemoryAttemptStore;

use async_trait::async_trait;

use crate::error::IdempotencyError;
use crate::fingerprint::Fingerprint;
use crate::key::IdempotencyKey;
use crate::record::Outcome;

/// Check-and-record for idempotency keys.
///
/// Implementations must make the first-sighting check and the insert a
/// single atomic step: of any number of concurrent callers presenting the
/// same new key, exactly one sees [`Outcome::Admitted`].
#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn try_admit(
        &self,
        key: IdempotencyKey,
        fingerprint: &Fingerprint,
        endpoint: &str,
    ) -> Result<Outcome, IdempotencyError>;

    /// Short backend name for logs
    fn backend(&self) -> &'static str;
}
