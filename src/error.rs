//! Error types for Tollgate.

use thiserror::Error;

use crate::ratelimit::LimiterId;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// A decision was requested for a limiter that was never registered.
    ///
    /// This is a programming error in the calling layer, not a rate limit outcome.
    #[error("No limit with ID {0} was registered")]
    UnknownLimiter(LimiterId),

    /// A limit definition was rejected at registration time
    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
