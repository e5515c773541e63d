//! Error types for plaza-core
//!
//! Every rejection a placement or canvas read can produce is a variant here,
//! so the HTTP and WebSocket layers can map errors to wire responses without
//! string matching.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Coordinates outside the canvas bounds
    #[error("invalid coordinates ({x}, {y}): canvas is {width}x{height}")]
    InvalidCoordinates {
        /// Requested x
        x: i64,
        /// Requested y
        y: i64,
        /// Canvas width
        width: u32,
        /// Canvas height
        height: u32,
    },

    /// Color index outside the palette
    #[error("invalid color {color}: palette has {color_count} entries")]
    InvalidColor {
        /// Requested color index
        color: i64,
        /// Palette size
        color_count: u16,
    },

    /// Credential missing, unknown, or revoked
    #[error("unauthenticated")]
    Unauthenticated,

    /// Writer exists but is disabled or not allowed to place pixels
    #[error("writer is not active")]
    NotActive,

    /// Writer is inside its per-placement cooldown window
    #[error("cooldown active: {remaining_ms}ms remaining")]
    CooldownActive {
        /// Milliseconds until the next placement is allowed
        remaining_ms: u64,
    },

    /// Sliding-window quota exhausted
    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited {
        /// Seconds until the oldest window entry expires
        retry_after_seconds: u64,
    },

    /// A named circuit breaker is open and rejected the call unexecuted
    #[error("circuit '{circuit}' is open")]
    CircuitOpen {
        /// Name of the open circuit
        circuit: String,
    },

    /// A store call exceeded its deadline
    #[error("operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Name of the guarded operation
        operation: String,
        /// Configured deadline in milliseconds
        timeout_ms: u64,
    },

    /// The shared store failed or returned unusable data
    #[error("persistence unavailable: {message}")]
    PersistenceUnavailable {
        /// Underlying failure description
        message: String,
    },

    /// Invalid configuration
    #[error("invalid configuration: {field}: {message}")]
    InvalidConfig {
        /// Config field name
        field: String,
        /// Detailed message
        message: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for [`Error::PersistenceUnavailable`].
    pub fn persistence(message: impl Into<String>) -> Self {
        Error::PersistenceUnavailable {
            message: message.into(),
        }
    }

    /// Machine-readable code carried in wire error bodies.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidCoordinates { .. } => "INVALID_COORDINATES",
            Error::InvalidColor { .. } => "INVALID_COLOR",
            Error::Unauthenticated => "UNAUTHENTICATED",
            Error::NotActive => "NOT_ACTIVE",
            Error::CooldownActive { .. } => "COOLDOWN_ACTIVE",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::CircuitOpen { .. } => "SERVICE_UNAVAILABLE",
            Error::Timeout { .. } => "TIMEOUT",
            Error::PersistenceUnavailable { .. } => "PERSISTENCE_UNAVAILABLE",
            Error::InvalidConfig { .. } => "INVALID_CONFIG",
        }
    }

    /// Back-off hint in whole seconds for throttle rejections, rounded up.
    #[must_use]
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Error::CooldownActive { remaining_ms } => Some(remaining_ms.div_ceil(1000).max(1)),
            Error::RateLimited {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::PersistenceUnavailable {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::PersistenceUnavailable {
            message: format!("stored record is not valid JSON: {err}"),
        }
    }
}
