//! Concurrent fixed-window accounting.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use tracing::{debug, trace};

use super::backend::RateLimiterBackend;
use super::purge::{PurgeController, RecordMap};
use super::registry::{LimitRegistry, LimiterId};
use super::window::{WindowKey, WindowRecord};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// Default entry count before a purge is considered.
pub const DEFAULT_PURGE_HIT_SIZE: usize = 100;
/// Default minimum time between two purges.
pub const DEFAULT_PURGE_HIT_DURATION: Duration = Duration::from_secs(10 * 60);
/// Default pre-sizing hint for the record map.
pub const DEFAULT_INITIAL_CAPACITY: usize = 64;

/// Tuning knobs of a [`WindowStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Store size that must be exceeded before a purge is considered
    pub purge_hit_size: usize,
    /// Minimum time that must pass between two purges
    pub purge_hit_duration: Duration,
    /// Initial capacity of the record map, no effect on behavior
    pub initial_capacity: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            purge_hit_size: DEFAULT_PURGE_HIT_SIZE,
            purge_hit_duration: DEFAULT_PURGE_HIT_DURATION,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        }
    }
}

/// Thread-safe store of window records for every `(limiter, key)` pair.
///
/// The decision path only takes the DashMap shard lock of the key being
/// counted; there is no global lock. Expired records are dropped lazily once
/// the store outgrows `purge_hit_size` and `purge_hit_duration` has passed.
pub struct WindowStore {
    registry: LimitRegistry,
    records: RecordMap,
    purge: PurgeController,
    clock: Arc<dyn Clock>,
}

impl WindowStore {
    /// Create a store for `registry` using the system clock.
    pub fn new(registry: LimitRegistry, settings: StoreSettings) -> Self {
        Self::with_clock(registry, settings, Arc::new(SystemClock))
    }

    /// Create a store with an explicit time source.
    pub fn with_clock(
        registry: LimitRegistry,
        settings: StoreSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let purge = PurgeController::new(
            settings.purge_hit_size,
            settings.purge_hit_duration,
            clock.now(),
        );
        Self {
            registry,
            records: RecordMap::with_capacity(settings.initial_capacity),
            purge,
            clock,
        }
    }

    /// Count one request for `key` under `limiter`.
    ///
    /// Returns `Ok(None)` when the request is admitted and `Ok(Some(secs))`
    /// when it is rejected, `secs` being the whole seconds until the current
    /// window resets. Fails with [`TollgateError::UnknownLimiter`] for ids
    /// that were never registered.
    ///
    /// [`TollgateError::UnknownLimiter`]: crate::error::TollgateError::UnknownLimiter
    pub fn process_request(&self, limiter: LimiterId, key: &str) -> Result<Option<u64>> {
        let limit = self.registry.get(limiter)?;
        let now = self.clock.now();
        let window_key = WindowKey::new(limiter, key);

        // Get-or-create-or-reset happens under the entry's shard lock, so racing
        // callers all end up with the same record.
        let record = match self.records.entry(window_key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    trace!(key = %occupied.key(), "Window expired, opening a new one");
                    occupied.insert(Arc::new(WindowRecord::open(limit, now)));
                }
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                debug!(
                    key = %vacant.key(),
                    limit = limit.max_requests,
                    window = ?limit.window,
                    "Creating new window record"
                );
                vacant.insert(Arc::new(WindowRecord::open(limit, now))).clone()
            }
        };

        self.purge.maybe_purge(&self.records, now);

        let remaining = record.hit();
        if remaining < 0 {
            let retry_after = record.retry_after_secs(now);
            trace!(
                limiter = %limit.label(),
                key = key,
                retry_after = retry_after,
                "Request rejected"
            );
            Ok(Some(retry_after))
        } else {
            trace!(
                limiter = %limit.label(),
                key = key,
                remaining = remaining,
                "Request admitted"
            );
            Ok(None)
        }
    }

    /// Sweep expired records right away, unless a sweep is already running.
    ///
    /// Returns the number of removed records, `None` if the sweep was skipped.
    pub fn purge_expired(&self) -> Option<usize> {
        self.purge.force_purge(&self.records, self.clock.now())
    }

    /// Counter value of the current record for `key`, if one exists.
    pub fn remaining(&self, limiter: LimiterId, key: &str) -> Option<i64> {
        self.records
            .get(&WindowKey::new(limiter, key))
            .map(|record| record.remaining())
    }

    /// Reset instant of the current record for `key`, if one exists.
    pub fn reset_at(&self, limiter: LimiterId, key: &str) -> Option<DateTime<Utc>> {
        self.records
            .get(&WindowKey::new(limiter, key))
            .map(|record| record.reset_at())
    }

    /// The limits this store accounts for.
    pub fn registry(&self) -> &LimitRegistry {
        &self.registry
    }

    /// Instant of the last completed purge, `None` while the purge lock is held.
    pub fn last_purge(&self) -> Option<DateTime<Utc>> {
        self.purge.last_purge()
    }

    /// Number of records currently held, expired ones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl std::fmt::Debug for WindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowStore")
            .field("limits", &self.registry.len())
            .field("records", &self.records.len())
            .field("purge", &self.purge)
            .finish()
    }
}

impl RateLimiterBackend for WindowStore {
    fn process_request(&self, limiter: LimiterId, key: &str) -> Result<Option<u64>> {
        WindowStore::process_request(self, limiter, key)
    }
}
