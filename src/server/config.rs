//! Server configuration types
//!
//! Contains all configuration structures for the Plaza server.

use crate::middleware::rate_limit::RestLimitSettings;
use anyhow::{bail, Result};
use plaza_core::{CircuitBreakerConfig, WriteStrategy, DEFAULT_KEY_PREFIX};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application configuration
///
/// Scalar fields sit before the table-valued ones so the `config show`
/// TOML rendering stays valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Write surface: "agent" (REST + API key) or "session" (WS + token)
    #[serde(default = "default_mode")]
    pub mode: String,
    /// "atomic" or "read-modify-write"
    #[serde(default = "default_write_strategy")]
    pub write_strategy: String,
    /// "redis" or "memory"
    #[serde(default = "default_store")]
    pub store: String,
    pub server: ServerConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub canvas: CanvasSettings,
    #[serde(default)]
    pub throttle: ThrottleSettings,
    #[serde(default)]
    pub rest_limit: RestLimitSettings,
    #[serde(default)]
    pub resilience: ResilienceSettings,
    #[serde(default)]
    pub broadcast: BroadcastSettings,
}

fn default_mode() -> String {
    "agent".to_string()
}

fn default_write_strategy() -> String {
    "atomic".to_string()
}

fn default_store() -> String {
    "redis".to_string()
}

impl AppConfig {
    /// Reject values the server cannot run with, naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if let Err(e) = ConfigValidator::validate_port(self.server.port) {
            bail!("server.port: {e}");
        }
        if let Err(e) = ConfigValidator::validate_dimension(self.canvas.width) {
            bail!("canvas.width: {e}");
        }
        if let Err(e) = ConfigValidator::validate_dimension(self.canvas.height) {
            bail!("canvas.height: {e}");
        }
        if let Err(e) = ConfigValidator::validate_color_count(self.canvas.color_count) {
            bail!("canvas.color_count: {e}");
        }
        if let Err(e) = ConfigValidator::validate_threshold(self.resilience.failure_threshold) {
            bail!("resilience.failure_threshold: {e}");
        }
        if let Err(e) = ConfigValidator::validate_threshold(self.resilience.success_threshold) {
            bail!("resilience.success_threshold: {e}");
        }
        if let Err(e) = ConfigValidator::validate_mode(&self.mode) {
            bail!("mode: {e}");
        }
        if let Err(e) = ConfigValidator::validate_throttle_strategy(&self.throttle.strategy) {
            bail!("throttle.strategy: {e}");
        }
        if let Err(e) = ConfigValidator::validate_write_strategy(&self.write_strategy) {
            bail!("write_strategy: {e}");
        }
        if let Err(e) = ConfigValidator::validate_store(&self.store) {
            bail!("store: {e}");
        }
        Ok(())
    }

    /// The validated write surface.
    pub fn surface_mode(&self) -> SurfaceMode {
        match self.mode.as_str() {
            "session" => SurfaceMode::Session,
            _ => SurfaceMode::Agent,
        }
    }

    /// The validated buffer mutation strategy.
    pub fn write_strategy(&self) -> WriteStrategy {
        match self.write_strategy.as_str() {
            "read-modify-write" => WriteStrategy::ReadModifyWrite,
            _ => WriteStrategy::Atomic,
        }
    }
}

/// Which surface accepts writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceMode {
    /// Writes arrive over REST with an API key; sockets observe only.
    Agent,
    /// Sockets may authenticate with a session token and place pixels.
    Session,
}

/// Server bind configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8800,
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    /// Prefix shared by every key this deployment touches
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// Canvas geometry
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CanvasSettings {
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    #[serde(default = "default_color_count")]
    pub color_count: u16,
}

fn default_dimension() -> u32 {
    500
}

fn default_color_count() -> u16 {
    16
}

impl Default for CanvasSettings {
    fn default() -> Self {
        Self {
            width: default_dimension(),
            height: default_dimension(),
            color_count: default_color_count(),
        }
    }
}

/// Write throttle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleSettings {
    /// "cooldown" or "window"
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Cooldown length per writer (cooldown strategy)
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    /// Placements per window per writer (window strategy)
    #[serde(default = "default_window_limit")]
    pub limit: u32,
    /// Window length (window strategy)
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Allow placements when the throttle store itself fails
    #[serde(default = "default_true")]
    pub fail_open: bool,
}

fn default_strategy() -> String {
    "cooldown".to_string()
}

fn default_cooldown_seconds() -> u64 {
    30
}

fn default_window_limit() -> u32 {
    1
}

fn default_window_seconds() -> u64 {
    1800
}

fn default_true() -> bool {
    true
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            cooldown_seconds: default_cooldown_seconds(),
            limit: default_window_limit(),
            window_seconds: default_window_seconds(),
            fail_open: true,
        }
    }
}

/// Store resilience configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResilienceSettings {
    /// Deadline for each guarded store call
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Consecutive failures before a circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Half-open successes before a circuit closes
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// How long an open circuit waits before probing
    #[serde(default = "default_reset_timeout_seconds")]
    pub reset_timeout_seconds: u64,
}

fn default_store_timeout_ms() -> u64 {
    5000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    2
}

fn default_reset_timeout_seconds() -> u64 {
    30
}

impl ResilienceSettings {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_failure_threshold(self.failure_threshold)
            .with_success_threshold(self.success_threshold)
            .with_reset_timeout(Duration::from_secs(self.reset_timeout_seconds))
    }
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            store_timeout_ms: default_store_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            reset_timeout_seconds: default_reset_timeout_seconds(),
        }
    }
}

/// Observer fan-out configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BroadcastSettings {
    /// In-process update channel capacity
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Session-mode sockets must authenticate within this window
    #[serde(default = "default_auth_timeout_seconds")]
    pub auth_timeout_seconds: u64,
}

fn default_capacity() -> usize {
    1024
}

fn default_auth_timeout_seconds() -> u64 {
    10
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            auth_timeout_seconds: default_auth_timeout_seconds(),
        }
    }
}

// ============================================================================
// Shared Configuration Validator
// ============================================================================

/// Shared validation logic for the CLI and the server boot path
pub struct ConfigValidator;

impl ConfigValidator {
    const VALID_MODES: &[&str] = &["agent", "session"];

    const VALID_THROTTLE_STRATEGIES: &[&str] = &["cooldown", "window"];

    const VALID_WRITE_STRATEGIES: &[&str] = &["atomic", "read-modify-write"];

    const VALID_STORES: &[&str] = &["redis", "memory"];

    pub fn validate_port(p: u16) -> Result<(), String> {
        if p == 0 {
            Err("Port cannot be 0".to_string())
        } else {
            Ok(())
        }
    }

    pub fn validate_dimension(d: u32) -> Result<(), String> {
        if d == 0 {
            Err("Dimension must be at least 1".to_string())
        } else {
            Ok(())
        }
    }

    pub fn validate_color_count(c: u16) -> Result<(), String> {
        if (2..=16).contains(&c) {
            Ok(())
        } else {
            Err(format!(
                "Color count {c} does not fit 4-bit cells. Valid: 2..=16"
            ))
        }
    }

    pub fn validate_threshold(t: u32) -> Result<(), String> {
        if t == 0 {
            Err("Threshold must be at least 1".to_string())
        } else {
            Ok(())
        }
    }

    pub fn validate_mode(s: &str) -> Result<(), String> {
        if Self::VALID_MODES.contains(&s) {
            Ok(())
        } else {
            Err(format!(
                "Invalid mode '{}'. Valid: {}",
                s,
                Self::VALID_MODES.join(", ")
            ))
        }
    }

    pub fn validate_throttle_strategy(s: &str) -> Result<(), String> {
        if Self::VALID_THROTTLE_STRATEGIES.contains(&s) {
            Ok(())
        } else {
            Err(format!(
                "Invalid throttle strategy '{}'. Valid: {}",
                s,
                Self::VALID_THROTTLE_STRATEGIES.join(", ")
            ))
        }
    }

    pub fn validate_write_strategy(s: &str) -> Result<(), String> {
        if Self::VALID_WRITE_STRATEGIES.contains(&s) {
            Ok(())
        } else {
            Err(format!(
                "Invalid write strategy '{}'. Valid: {}",
                s,
                Self::VALID_WRITE_STRATEGIES.join(", ")
            ))
        }
    }

    pub fn validate_store(s: &str) -> Result<(), String> {
        if Self::VALID_STORES.contains(&s) {
            Ok(())
        } else {
            Err(format!(
                "Invalid store '{}'. Valid: {}",
                s,
                Self::VALID_STORES.join(", ")
            ))
        }
    }
}
