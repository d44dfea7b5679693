//! Rate limiting logic and state management.

mod backend;
mod builder;
mod evaluator;
mod purge;
mod registry;
mod store;
mod window;

pub use backend::RateLimiterBackend;
pub use builder::{RateLimitHitAction, RateLimiting, RateLimitingBuilder};
pub use evaluator::{Evaluator, ExclusionPredicate, KeyExtractor, Verdict};
pub use registry::{LimitDefinition, LimitRegistry, LimiterId};
pub use store::{
    StoreSettings, WindowStore, DEFAULT_INITIAL_CAPACITY, DEFAULT_PURGE_HIT_DURATION,
    DEFAULT_PURGE_HIT_SIZE,
};
pub use window::{WindowKey, WindowRecord};
