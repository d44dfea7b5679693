//! Registration of limits and assembly of a ready-to-use rate limiter.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::evaluator::{Evaluator, ExclusionPredicate, KeyExtractor, Verdict};
use super::registry::{LimitDefinition, LimitRegistry, LimiterId};
use super::store::{StoreSettings, WindowStore};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// Action invoked with the rejected key and its retry-after seconds.
pub type RateLimitHitAction<Req> = Box<dyn Fn(&Req, &str, u64) + Send + Sync>;

/// Collects limits and policies at configuration time, before any traffic.
pub struct RateLimitingBuilder<Req> {
    limits: Vec<(LimitDefinition, KeyExtractor<Req>)>,
    exclusion: Option<ExclusionPredicate<Req>>,
    hit_action: Option<RateLimitHitAction<Req>>,
    settings: StoreSettings,
    clock: Arc<dyn Clock>,
}

impl<Req> RateLimitingBuilder<Req> {
    /// Start with no limits, default store settings and the system clock.
    pub fn new() -> Self {
        Self {
            limits: Vec::new(),
            exclusion: None,
            hit_action: None,
            settings: StoreSettings::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Register a limit of `max_requests` per `window`, keyed by `extract_key`.
    ///
    /// Limits are evaluated in registration order. Keys of different limits
    /// never collide.
    pub fn register_limit<F>(
        &mut self,
        max_requests: u64,
        window: Duration,
        extract_key: F,
    ) -> Result<LimiterId>
    where
        F: Fn(&Req) -> Option<String> + Send + Sync + 'static,
    {
        let definition = LimitDefinition::new(max_requests, window)?;
        Ok(self.push(definition, Box::new(extract_key)))
    }

    /// Same as [`register_limit`](Self::register_limit), with a label for logs.
    pub fn register_named_limit<F>(
        &mut self,
        name: impl Into<String>,
        max_requests: u64,
        window: Duration,
        extract_key: F,
    ) -> Result<LimiterId>
    where
        F: Fn(&Req) -> Option<String> + Send + Sync + 'static,
    {
        let definition = LimitDefinition::new(max_requests, window)?.with_name(name);
        Ok(self.push(definition, Box::new(extract_key)))
    }

    fn push(&mut self, definition: LimitDefinition, extractor: KeyExtractor<Req>) -> LimiterId {
        let id = definition.id;
        self.limits.push((definition, extractor));
        id
    }

    /// Exempt requests matching `predicate` from every limit.
    pub fn exclude_request_when<F>(&mut self, predicate: F) -> &mut Self
    where
        F: Fn(&Req) -> bool + Send + Sync + 'static,
    {
        self.exclusion = Some(Box::new(predicate));
        self
    }

    /// Replace the action run on rejection. The default logs a warning.
    pub fn on_rate_limit_hit<F>(&mut self, action: F) -> &mut Self
    where
        F: Fn(&Req, &str, u64) + Send + Sync + 'static,
    {
        self.hit_action = Some(Box::new(action));
        self
    }

    /// Store size that must be exceeded before purging is considered.
    pub fn purge_hit_size(&mut self, size: usize) -> &mut Self {
        self.settings.purge_hit_size = size;
        self
    }

    /// Minimum time between two purges.
    pub fn purge_hit_duration(&mut self, duration: Duration) -> &mut Self {
        self.settings.purge_hit_duration = duration;
        self
    }

    /// Pre-sizing hint for the record store.
    pub fn initial_capacity(&mut self, capacity: usize) -> &mut Self {
        self.settings.initial_capacity = capacity;
        self
    }

    /// Apply all store settings at once.
    pub fn settings(&mut self, settings: StoreSettings) -> &mut Self {
        self.settings = settings;
        self
    }

    /// Use a custom time source.
    pub fn clock(&mut self, clock: Arc<dyn Clock>) -> &mut Self {
        self.clock = clock;
        self
    }

    /// Freeze the configuration into a [`RateLimiting`].
    pub fn build(self) -> RateLimiting<Req> {
        let (definitions, extractors): (Vec<_>, Vec<_>) = self
            .limits
            .into_iter()
            .map(|(definition, extractor)| {
                let id = definition.id;
                (definition, (id, extractor))
            })
            .unzip();

        info!(
            limits = definitions.len(),
            purge_hit_size = self.settings.purge_hit_size,
            purge_hit_duration = ?self.settings.purge_hit_duration,
            "Rate limiting configured"
        );

        let store = Arc::new(WindowStore::with_clock(
            LimitRegistry::new(definitions),
            self.settings,
            self.clock,
        ));

        let mut evaluator = extractors
            .into_iter()
            .fold(Evaluator::new(store.clone()), |evaluator, (id, extractor)| {
                evaluator.with_limiter(id, extractor)
            });
        if let Some(exclusion) = self.exclusion {
            evaluator = evaluator.with_exclusion(exclusion);
        }

        RateLimiting {
            evaluator,
            store,
            hit_action: self.hit_action,
        }
    }
}

impl<Req> Default for RateLimitingBuilder<Req> {
    fn default() -> Self {
        Self::new()
    }
}

/// Default reaction to a rejection.
fn log_rate_limit_hit(key: &str, retry_after: u64) {
    warn!(
        key = key,
        retry_after = retry_after,
        "Rate limit hit for key \"{}\" - retry after {}s",
        key,
        retry_after
    );
}

/// A configured rate limiter: evaluator, window store and hit action.
///
/// Share it between request handlers behind an `Arc`.
pub struct RateLimiting<Req> {
    evaluator: Evaluator<Req, Arc<WindowStore>>,
    store: Arc<WindowStore>,
    hit_action: Option<RateLimitHitAction<Req>>,
}

impl<Req> RateLimiting<Req> {
    /// Start configuring a new rate limiter.
    pub fn builder() -> RateLimitingBuilder<Req> {
        RateLimitingBuilder::new()
    }

    /// Evaluate `request` and run the hit action if it is rejected.
    ///
    /// On `Verdict::Reject` the caller must stop processing the request.
    pub fn check(&self, request: &Req) -> Result<Verdict> {
        let verdict = self.evaluator.evaluate(request)?;
        if let Verdict::Reject {
            key,
            retry_after_secs,
            ..
        } = &verdict
        {
            match &self.hit_action {
                Some(action) => action(request, key, *retry_after_secs),
                None => log_rate_limit_hit(key, *retry_after_secs),
            }
        }
        Ok(verdict)
    }

    /// The evaluator, for callers that handle rejections themselves.
    pub fn evaluator(&self) -> &Evaluator<Req, Arc<WindowStore>> {
        &self.evaluator
    }

    /// The underlying window store.
    pub fn store(&self) -> &Arc<WindowStore> {
        &self.store
    }
}

impl<Req> std::fmt::Debug for RateLimiting<Req> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiting")
            .field("evaluator", &self.evaluator)
            .finish()
    }
}
