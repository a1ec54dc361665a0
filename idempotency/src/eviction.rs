//! Age-based retention for the in-process attempt store.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::record::AttemptRecord;

/// Default retention window (60 minutes)
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Records whose first sighting is older than `window` are dropped.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    window: Duration,
}

impl RetentionPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Anything first seen strictly before this instant is stale.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match chrono::Duration::from_std(self.window) {
            Ok(window) => now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC),
            Err(_) => DateTime::<Utc>::MIN_UTC,
        }
    }

    pub fn is_expired(&self, record: &AttemptRecord, now: DateTime<Utc>) -> bool {
        record.first_seen_at() < self.cutoff(now)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}
