//! Multi-limiter evaluation of a single request.

use std::fmt;

use tracing::trace;

use super::backend::RateLimiterBackend;
use super::registry::LimiterId;
use crate::error::Result;

/// Extracts the key a limiter tracks from a request. `None` means the limiter
/// does not apply to this request.
pub type KeyExtractor<Req> = Box<dyn Fn(&Req) -> Option<String> + Send + Sync>;

/// Returns `true` for requests that bypass rate limiting entirely.
pub type ExclusionPredicate<Req> = Box<dyn Fn(&Req) -> bool + Send + Sync>;

/// Outcome of evaluating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No limiter rejected the request
    Admit,
    /// The first limiter that rejected the request
    Reject {
        /// Limiter that rejected
        limiter: LimiterId,
        /// Key that exhausted its window
        key: String,
        /// Whole seconds until that window resets
        retry_after_secs: u64,
    },
}

impl Verdict {
    /// Whether the request may proceed.
    pub fn is_admit(&self) -> bool {
        matches!(self, Verdict::Admit)
    }
}

/// Applies registered limiters to a request in registration order and stops at
/// the first rejection.
pub struct Evaluator<Req, B> {
    limiters: Vec<(LimiterId, KeyExtractor<Req>)>,
    exclusion: Option<ExclusionPredicate<Req>>,
    backend: B,
}

impl<Req, B: RateLimiterBackend> Evaluator<Req, B> {
    /// Create an evaluator over `backend` with no limiters.
    pub fn new(backend: B) -> Self {
        Self {
            limiters: Vec::new(),
            exclusion: None,
            backend,
        }
    }

    /// Append a limiter; it is consulted after all previously added ones.
    pub fn with_limiter(mut self, limiter: LimiterId, extractor: KeyExtractor<Req>) -> Self {
        self.limiters.push((limiter, extractor));
        self
    }

    /// Set the predicate that exempts requests from every limiter.
    pub fn with_exclusion(mut self, exclusion: ExclusionPredicate<Req>) -> Self {
        self.exclusion = Some(exclusion);
        self
    }

    /// Decide whether `request` may proceed.
    ///
    /// Errors only on configuration mistakes such as a limiter id the backend
    /// does not know.
    pub fn evaluate(&self, request: &Req) -> Result<Verdict> {
        if self.exclusion.as_ref().is_some_and(|excluded| excluded(request)) {
            trace!("Request excluded from rate limiting");
            return Ok(Verdict::Admit);
        }

        for (limiter, extract) in &self.limiters {
            let Some(key) = extract(request) else {
                trace!(limiter = %limiter, "No key extracted, limiter skipped");
                continue;
            };

            if let Some(retry_after_secs) = self.backend.process_request(*limiter, &key)? {
                return Ok(Verdict::Reject {
                    limiter: *limiter,
                    key,
                    retry_after_secs,
                });
            }
        }

        Ok(Verdict::Admit)
    }

    /// Limiter ids in evaluation order.
    pub fn limiters(&self) -> impl Iterator<Item = LimiterId> + '_ {
        self.limiters.iter().map(|(id, _)| *id)
    }

    /// The backend that makes per-key decisions.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<Req, B: fmt::Debug> fmt::Debug for Evaluator<Req, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluator")
            .field("limiters", &self.limiters.iter().map(|(id, _)| id).collect::<Vec<_>>())
            .field("has_exclusion", &self.exclusion.is_some())
            .field("backend", &self.backend)
            .finish()
    }
}
