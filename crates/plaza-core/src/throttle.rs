//! Write throttling
//!
//! Two interchangeable strategies, both backed by the shared store so every
//! process sees the same counters: a per-writer cooldown key with a TTL, and
//! a sliding window over a sorted set.
//!
//! Store failures fail open by default: an unreachable limiter slows nobody
//! down, it just stops limiting until the store comes back. Deployments that
//! prefer to reject writes instead can turn the flag off.

use crate::error::{Error, Result};
use crate::store::CanvasStore;
use crate::util::{epoch_ms, with_timeout};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// How long a window bucket outlives its own window before the store may
/// garbage-collect it.
const WINDOW_KEY_GRACE: Duration = Duration::from_secs(60);

/// Default deadline for throttle store calls.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a sliding-window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the placement may proceed.
    pub allowed: bool,
    /// Placements left in the current window after this one.
    pub remaining: u32,
    /// Seconds until the oldest window entry expires.
    pub reset_in_seconds: u64,
    /// Configured window limit, echoed for response headers.
    pub limit: u32,
}

/// Result of a cooldown check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownStatus {
    /// Whether the placement may proceed.
    pub allowed: bool,
    /// Milliseconds until the cooldown clears (0 when allowed).
    pub remaining_ms: u64,
}

/// Sliding-window limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum placements per window.
    pub limit: u32,
    /// Window length.
    pub window: Duration,
    /// Allow placements when the store itself fails.
    pub fail_open: bool,
    /// Deadline for each store call; a timeout counts as a store failure.
    pub store_timeout: Duration,
}

impl RateLimitConfig {
    /// Create a config with fail-open enabled.
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            fail_open: true,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Set the fail-open policy.
    #[must_use]
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// Set the store-call deadline.
    #[must_use]
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(100, Duration::from_secs(60))
    }
}

/// Sliding-window rate limiter over the shared store.
///
/// Entries are recorded at admission time with a unique member per call,
/// so two placements in the same millisecond still count as two.
pub struct RateLimiter {
    store: Arc<dyn CanvasStore>,
    scope: String,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a limiter for one scope ("pixel", "global", ...).
    ///
    /// Keys from different scopes never share a window bucket.
    pub fn new(store: Arc<dyn CanvasStore>, scope: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            store,
            scope: scope.into(),
            config,
        }
    }

    /// Configured limiter parameters.
    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Check the window for `key` and record the placement when allowed.
    ///
    /// A denied call records nothing, so probing a full window never
    /// extends it.
    pub async fn acquire(&self, key: &str) -> Result<RateLimitDecision> {
        match self.try_acquire(key).await {
            Ok(decision) => Ok(decision),
            Err(e) if self.config.fail_open => {
                warn!(
                    scope = %self.scope,
                    key = %key,
                    error = %e,
                    "rate limiter store unavailable, failing open"
                );
                Ok(RateLimitDecision {
                    allowed: true,
                    remaining: self.config.limit,
                    reset_in_seconds: self.config.window.as_secs(),
                    limit: self.config.limit,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn try_acquire(&self, key: &str) -> Result<RateLimitDecision> {
        let now = epoch_ms();
        let window_ms = self.config.window.as_millis() as u64;
        let bucket = format!("{}:{}", self.scope, key);

        let snapshot = with_timeout(
            "rate_window",
            self.config.store_timeout,
            self.store.window_count(&bucket, now.saturating_sub(window_ms)),
        )
        .await?;

        // With no surviving entries the window resets a full length from now.
        let reset_in_seconds = snapshot
            .oldest_ms
            .map(|oldest| (oldest + window_ms).saturating_sub(now).div_ceil(1000))
            .unwrap_or_else(|| self.config.window.as_secs());

        if snapshot.count >= u64::from(self.config.limit) {
            debug!(
                scope = %self.scope,
                key = %key,
                count = snapshot.count,
                limit = self.config.limit,
                "window full, placement denied"
            );
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_in_seconds: reset_in_seconds.max(1),
                limit: self.config.limit,
            });
        }

        let member = format!("{}-{}", now, Uuid::new_v4().as_simple());
        with_timeout(
            "rate_record",
            self.config.store_timeout,
            self.store
                .record_window_entry(&bucket, now, &member, self.config.window + WINDOW_KEY_GRACE),
        )
        .await?;

        let used = snapshot.count as u32;
        Ok(RateLimitDecision {
            allowed: true,
            remaining: self.config.limit.saturating_sub(used + 1),
            reset_in_seconds,
            limit: self.config.limit,
        })
    }
}

/// Per-writer cooldown gate over the shared store.
///
/// The gate only reads at admission time; arming happens after the write
/// succeeds, so a rejected placement never restarts anyone's clock.
pub struct CooldownGate {
    store: Arc<dyn CanvasStore>,
    ttl: Duration,
    fail_open: bool,
    store_timeout: Duration,
}

impl CooldownGate {
    /// Create a gate whose cooldowns last `ttl`.
    pub fn new(store: Arc<dyn CanvasStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            fail_open: true,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Set the fail-open policy.
    #[must_use]
    pub fn with_fail_open(mut self, fail_open: bool) -> Self {
        self.fail_open = fail_open;
        self
    }

    /// Set the store-call deadline.
    #[must_use]
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Configured cooldown length.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Check whether `writer_id` may place right now.
    pub async fn check(&self, writer_id: &str) -> Result<CooldownStatus> {
        let checked = with_timeout(
            "cooldown_check",
            self.store_timeout,
            self.store.cooldown_remaining_ms(writer_id),
        )
        .await;
        match checked {
            Ok(Some(remaining_ms)) => {
                debug!(writer_id = %writer_id, remaining_ms, "cooldown active, placement denied");
                Ok(CooldownStatus {
                    allowed: false,
                    remaining_ms,
                })
            }
            Ok(None) => Ok(CooldownStatus {
                allowed: true,
                remaining_ms: 0,
            }),
            Err(e) if self.fail_open => {
                warn!(
                    writer_id = %writer_id,
                    error = %e,
                    "cooldown store unavailable, failing open"
                );
                Ok(CooldownStatus {
                    allowed: true,
                    remaining_ms: 0,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Arm the configured cooldown for `writer_id`.
    pub async fn arm(&self, writer_id: &str) -> Result<()> {
        self.arm_for(writer_id, self.ttl).await
    }

    /// Arm a cooldown of explicit length, for per-writer overrides.
    pub async fn arm_for(&self, writer_id: &str, ttl: Duration) -> Result<()> {
        let armed = with_timeout(
            "cooldown_arm",
            self.store_timeout,
            self.store.set_cooldown(writer_id, ttl),
        )
        .await;
        match armed {
            Ok(()) => Ok(()),
            Err(e) if self.fail_open => {
                warn!(
                    writer_id = %writer_id,
                    error = %e,
                    "cooldown not armed, store unavailable"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// The configured write-throttle strategy.
pub enum Throttle {
    /// One placement per cooldown period, tracked per writer.
    Cooldown(CooldownGate),
    /// N placements per sliding window, tracked per writer.
    Window(RateLimiter),
}

impl Throttle {
    /// Gate a placement before the write. Denials surface as
    /// [`Error::CooldownActive`] or [`Error::RateLimited`].
    ///
    /// The window strategy records the placement here; recording before the
    /// write keeps the window honest even if the write later fails.
    pub async fn admit(&self, writer_id: &str) -> Result<()> {
        match self {
            Throttle::Cooldown(gate) => {
                let status = gate.check(writer_id).await?;
                if status.allowed {
                    Ok(())
                } else {
                    Err(Error::CooldownActive {
                        remaining_ms: status.remaining_ms,
                    })
                }
            }
            Throttle::Window(limiter) => {
                let decision = limiter.acquire(writer_id).await?;
                if decision.allowed {
                    Ok(())
                } else {
                    Err(Error::RateLimited {
                        retry_after_seconds: decision.reset_in_seconds,
                    })
                }
            }
        }
    }

    /// Record a successful placement. Arms the cooldown (honoring a
    /// per-writer override); the window strategy already recorded at admit.
    pub async fn commit(&self, writer_id: &str, cooldown_override: Option<Duration>) -> Result<()> {
        match self {
            Throttle::Cooldown(gate) => match cooldown_override {
                Some(ttl) => gate.arm_for(writer_id, ttl).await,
                None => gate.arm(writer_id).await,
            },
            Throttle::Window(_) => Ok(()),
        }
    }

    /// Seconds a client should wait before its next placement.
    #[must_use]
    pub fn retry_hint_seconds(&self, cooldown_override: Option<Duration>) -> u64 {
        match self {
            Throttle::Cooldown(gate) => cooldown_override.unwrap_or_else(|| gate.ttl()).as_secs(),
            Throttle::Window(limiter) => limiter.config().window.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests;
