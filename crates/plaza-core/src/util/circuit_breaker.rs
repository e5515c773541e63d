//! Circuit Breaker pattern implementation
//!
//! Protects calls to the shared store from cascading failures. Each named
//! circuit has three states:
//! - Closed: Normal operation, calls pass through
//! - Open: Failures exceeded threshold, calls are rejected unexecuted
//! - HalfOpen: Testing if the store has recovered
//!
//! Circuits are independent by name and live in a [`CircuitRegistry`]
//! constructed at process start, so tests can build isolated registries
//! instead of sharing process globals.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - calls pass through
    Closed,
    /// Failures exceeded threshold - calls are rejected
    Open,
    /// Testing recovery - calls pass through, counted toward closing
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Successes in half-open state needed to close the circuit
    pub success_threshold: u32,
    /// Duration to wait after the last failure before allowing a probe call
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure threshold
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set success threshold for half-open state
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Set reset timeout
    #[must_use]
    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

/// Point-in-time view of a circuit, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    /// Current state
    pub state: CircuitState,
    /// Failure count in the current closed window
    pub failures: u32,
    /// Success count in the current half-open window
    pub success_count: u32,
    /// Last failure, epoch milliseconds; `None` if never failed or reset
    pub last_failure_ms: Option<u64>,
}

/// Circuit breaker for fault tolerance
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    last_failure_time: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_failure_time: AtomicU64::new(0),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Get the circuit breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        *self.state.read().unwrap()
    }

    /// Get current failure count
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    /// Current state and counters in one view.
    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let last = self.last_failure_time.load(Ordering::SeqCst);
        CircuitSnapshot {
            state: self.state(),
            failures: self.failure_count.load(Ordering::SeqCst),
            success_count: self.success_count.load(Ordering::SeqCst),
            last_failure_ms: (last > 0).then_some(last),
        }
    }

    /// Check if the circuit allows a call.
    ///
    /// An open circuit whose reset timeout has elapsed transitions to
    /// half-open here, before the caller proceeds.
    #[must_use]
    pub fn can_execute(&self) -> bool {
        self.check_state_transition();

        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    /// Run `fut` under this circuit.
    ///
    /// While open, the future is dropped unpolled and the call fails with
    /// [`Error::CircuitOpen`]. Otherwise the outcome is recorded against the
    /// circuit and passed through unchanged.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.can_execute() {
            return Err(Error::CircuitOpen {
                circuit: self.name.clone(),
            });
        }

        match fut.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                // Reset failure count on success in closed state
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(
                    name = %self.name,
                    successes = successes,
                    threshold = self.config.success_threshold,
                    "Circuit breaker success in half-open state"
                );

                if successes >= self.config.success_threshold {
                    self.close();
                }
            }
            CircuitState::Open => {
                // Shouldn't happen, but ignore
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let now = current_timestamp();

        match self.state() {
            CircuitState::Closed => {
                self.last_failure_time.store(now, Ordering::SeqCst);
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;

                debug!(
                    name = %self.name,
                    failures = failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure recorded"
                );

                if failures >= self.config.failure_threshold {
                    self.open();
                }
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open state reopens the circuit and
                // restarts the reset window from this failure
                warn!(
                    name = %self.name,
                    "Circuit breaker failure in half-open state, reopening"
                );
                self.last_failure_time.store(now, Ordering::SeqCst);
                self.success_count.store(0, Ordering::SeqCst);
                self.open();
            }
            CircuitState::Open => {
                // Already open, ignore
            }
        }
    }

    /// Check and perform state transitions
    fn check_state_transition(&self) {
        if self.state() == CircuitState::Open {
            let last_failure = self.last_failure_time.load(Ordering::SeqCst);
            let now = current_timestamp();
            let elapsed = Duration::from_millis(now.saturating_sub(last_failure));

            if elapsed >= self.config.reset_timeout {
                self.half_open();
            }
        }
    }

    /// Transition to open state
    fn open(&self) {
        let mut state = self.state.write().unwrap();
        if *state != CircuitState::Open {
            info!(
                name = %self.name,
                failures = self.failure_count.load(Ordering::SeqCst),
                "Circuit breaker opened"
            );
            *state = CircuitState::Open;
        }
    }

    /// Transition to half-open state
    fn half_open(&self) {
        let mut state = self.state.write().unwrap();
        if *state == CircuitState::Open {
            info!(name = %self.name, "Circuit breaker entering half-open state");
            *state = CircuitState::HalfOpen;
            self.success_count.store(0, Ordering::SeqCst);
            self.failure_count.store(0, Ordering::SeqCst);
        }
    }

    /// Transition to closed state
    fn close(&self) {
        let mut state = self.state.write().unwrap();
        if *state != CircuitState::Closed {
            info!(name = %self.name, "Circuit breaker closed");
            *state = CircuitState::Closed;
            self.failure_count.store(0, Ordering::SeqCst);
            self.success_count.store(0, Ordering::SeqCst);
        }
    }

    /// Force the circuit back to closed with cleared counters and no
    /// recorded failure, regardless of current state.
    pub fn reset(&self) {
        self.close();
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        self.last_failure_time.store(0, Ordering::SeqCst);
    }
}

/// Named circuits, created lazily on first use.
///
/// One registry is built at process start and shared by reference; every
/// circuit it creates uses the registry's config.
pub struct CircuitRegistry {
    circuits: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl CircuitRegistry {
    /// Create a registry whose circuits use `config`.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: DashMap::new(),
            config,
        }
    }

    /// Create with default circuit configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }

    /// Get the circuit named `name`, creating it closed if absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.circuits
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config.clone())))
            .clone()
    }

    /// Run `fut` under the circuit named `name`.
    pub async fn run<T, F>(&self, name: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.get(name).run(fut).await
    }

    /// Snapshot of the circuit named `name` (created if absent).
    #[must_use]
    pub fn snapshot(&self, name: &str) -> CircuitSnapshot {
        self.get(name).snapshot()
    }

    /// Force the circuit named `name` back to closed. Used for test
    /// isolation and administrative recovery.
    pub fn reset(&self, name: &str) {
        self.get(name).reset();
    }
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Get current timestamp in milliseconds
fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
