//! Fixed-window records and their store keys.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use super::registry::{LimitDefinition, LimiterId};

/// Key of one window record: the limiter plus the extracted key.
///
/// Equal key strings under different limiters address different records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    /// The limiter this record belongs to
    pub limiter: LimiterId,
    /// The caller-extracted key (client host, token, ...)
    pub key: String,
}

impl WindowKey {
    /// Create a new window key.
    pub fn new(limiter: LimiterId, key: &str) -> Self {
        Self {
            limiter,
            key: key.to_string(),
        }
    }
}

impl std::fmt::Display for WindowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.limiter, self.key)
    }
}

/// Request accounting for one key inside one window.
///
/// `remaining` starts at the limit and is decremented for every request,
/// admitted or not. It is allowed to go negative: a negative value after the
/// decrement is the rejection signal. Do not turn this into check-then-decrement,
/// the single `fetch_sub` is what keeps concurrent callers from over-admitting.
/// A record is never reset upward, an expired one is replaced by a new record.
#[derive(Debug)]
pub struct WindowRecord {
    reset_at: DateTime<Utc>,
    remaining: AtomicI64,
}

impl WindowRecord {
    /// Open a fresh window for `limit` starting at `now`.
    pub fn open(limit: &LimitDefinition, now: DateTime<Utc>) -> Self {
        let window = ChronoDuration::from_std(limit.window).unwrap_or(ChronoDuration::MAX);
        let reset_at = now
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let remaining = i64::try_from(limit.max_requests).unwrap_or(i64::MAX);
        Self {
            reset_at,
            remaining: AtomicI64::new(remaining),
        }
    }

    /// The instant at which this window expires.
    pub fn reset_at(&self) -> DateTime<Utc> {
        self.reset_at
    }

    /// Whether the window is over at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }

    /// Current counter value; negative once the window is exhausted.
    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::SeqCst)
    }

    /// Count one request and return the counter after the decrement.
    pub fn hit(&self) -> i64 {
        self.remaining.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// Whole seconds from `now` until the window resets.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let secs = self.reset_at.timestamp() - now.timestamp();
        u64::try_from(secs).unwrap_or(0)
    }
}
