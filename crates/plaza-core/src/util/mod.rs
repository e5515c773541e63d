//! Utility modules for plaza-core
//!
//! Provides the resilience primitives wrapped around every shared-store
//! call:
//! - circuit_breaker: named breakers with a process-local registry
//! - timeout: deadline guard for async operations

mod circuit_breaker;
mod timeout;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitSnapshot, CircuitState,
};
pub use timeout::with_timeout;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
