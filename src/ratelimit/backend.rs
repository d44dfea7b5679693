//! Rate limiter trait for abstracting the decision backend.

use super::registry::LimiterId;
use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// This trait abstracts over the store that makes per-key decisions so the
/// [`Evaluator`](super::Evaluator) can work with any of them.
pub trait RateLimiterBackend: Send + Sync {
    /// Count one request for `key` under `limiter`.
    ///
    /// `Ok(None)` admits the request, `Ok(Some(secs))` rejects it with the
    /// seconds left until the window resets.
    fn process_request(&self, limiter: LimiterId, key: &str) -> Result<Option<u64>>;
}

impl<B: RateLimiterBackend + ?Sized> RateLimiterBackend for std::sync::Arc<B> {
    fn process_request(&self, limiter: LimiterId, key: &str) -> Result<Option<u64>> {
        (**self).process_request(limiter, key)
    }
}
