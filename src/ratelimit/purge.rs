//! Opportunistic sweeping of expired window records.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::window::{WindowKey, WindowRecord};

/// Map type shared between the store and the purge controller.
pub(crate) type RecordMap = DashMap<WindowKey, Arc<WindowRecord>>;

/// Decides when to sweep expired records and makes sure only one caller does it.
///
/// A sweep needs the store to hold more than `hit_size` records and more than
/// `hit_duration` to have passed since the previous sweep. The exclusive section
/// is entered with `try_lock` only; callers that lose the race go on without
/// waiting.
#[derive(Debug)]
pub(crate) struct PurgeController {
    hit_size: usize,
    hit_duration: ChronoDuration,
    /// Instant of the last completed sweep. Guarded by the purge lock.
    last_purge: Mutex<DateTime<Utc>>,
}

impl PurgeController {
    /// Create a controller whose interval starts counting at `now`.
    pub(crate) fn new(hit_size: usize, hit_duration: Duration, now: DateTime<Utc>) -> Self {
        Self {
            hit_size,
            hit_duration: ChronoDuration::from_std(hit_duration).unwrap_or(ChronoDuration::MAX),
            last_purge: Mutex::new(now),
        }
    }

    /// Instant of the last completed sweep, or `None` while the purge lock is
    /// held. The lock is also taken for the interval check, so `None` does not
    /// imply a sweep is running.
    pub(crate) fn last_purge(&self) -> Option<DateTime<Utc>> {
        self.last_purge.try_lock().map(|guard| *guard)
    }

    /// Sweep `records` if both thresholds are exceeded and nobody else is sweeping.
    ///
    /// Returns the number of removed records when this caller ran the sweep.
    pub(crate) fn maybe_purge(&self, records: &RecordMap, now: DateTime<Utc>) -> Option<usize> {
        if records.len() <= self.hit_size {
            return None;
        }

        let Some(mut last_purge) = self.last_purge.try_lock() else {
            trace!("Purge already in progress, skipping");
            return None;
        };

        if now.signed_duration_since(*last_purge) <= self.hit_duration {
            return None;
        }

        let removed = sweep(records, now);
        *last_purge = now;
        Some(removed)
    }

    /// Sweep unconditionally, still honoring the exclusive section.
    ///
    /// Returns `None` when another sweep is running.
    pub(crate) fn force_purge(&self, records: &RecordMap, now: DateTime<Utc>) -> Option<usize> {
        let mut last_purge = self.last_purge.try_lock()?;
        let removed = sweep(records, now);
        *last_purge = now;
        Some(removed)
    }
}

/// Remove every record whose window ended at or before `now`.
///
/// Keys are collected first so no shard lock is held while removing. The removal
/// re-checks expiry so a record replaced by a fresh window in the meantime stays.
fn sweep(records: &RecordMap, now: DateTime<Utc>) -> usize {
    let before = records.len();

    let expired: Vec<WindowKey> = records
        .iter()
        .filter(|entry| entry.value().reset_at() <= now)
        .map(|entry| entry.key().clone())
        .collect();

    let removed = expired
        .iter()
        .filter(|key| records.remove_if(*key, |_, record| record.is_expired(now)).is_some())
        .count();

    debug!(
        before = before,
        removed = removed,
        remaining = records.len(),
        "Purged expired window records"
    );

    removed
}
