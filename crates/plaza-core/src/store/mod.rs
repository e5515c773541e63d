//! Canvas storage backends
//!
//! Everything the write path touches (pixel buffer, version counter,
//! cooldowns, rate-limit windows, the cross-process update channel) sits
//! behind the [`CanvasStore`] trait, so the same gateway runs against Redis
//! in production and an in-memory store in tests.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::error::Result;
use crate::events::PixelUpdate;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::broadcast;

/// Default key prefix, shared by every process of a deployment.
pub const DEFAULT_KEY_PREFIX: &str = "plaza";

/// Surviving entries of a sliding rate-limit window after pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Entries still inside the window.
    pub count: u64,
    /// Timestamp of the oldest surviving entry, in ms since the epoch.
    pub oldest_ms: Option<u64>,
}

/// Storage abstraction for the shared canvas and its side channels.
///
/// Callers pass logical identifiers (writer ids, window buckets); each
/// backend maps them onto its own key layout. Identifiers never contain
/// the deployment prefix.
#[async_trait]
pub trait CanvasStore: Send + Sync {
    /// Fetch the packed canvas buffer.
    ///
    /// Always returns exactly the configured buffer length: a missing key
    /// yields a zeroed buffer, and partially written values are padded.
    async fn fetch_canvas(&self) -> Result<Vec<u8>>;

    /// Replace the whole packed canvas buffer.
    async fn store_canvas(&self, buffer: &[u8]) -> Result<()>;

    /// Set a single 4-bit cell at `bit_offset`, leaving its neighbors intact.
    async fn set_cell(&self, bit_offset: u64, color: u8) -> Result<()>;

    /// Current canvas version (0 before the first write).
    async fn version(&self) -> Result<u64>;

    /// Increment the canvas version and return the new value.
    async fn bump_version(&self) -> Result<u64>;

    /// Milliseconds left on `writer_id`'s cooldown, or `None` when clear.
    async fn cooldown_remaining_ms(&self, writer_id: &str) -> Result<Option<u64>>;

    /// Arm `writer_id`'s cooldown for `ttl`, replacing any previous one.
    async fn set_cooldown(&self, writer_id: &str, ttl: Duration) -> Result<()>;

    /// Drop window entries with timestamps at or before `window_start_ms`,
    /// then report how many survive and the oldest surviving timestamp.
    async fn window_count(&self, bucket: &str, window_start_ms: u64) -> Result<WindowSnapshot>;

    /// Record one window entry. `member` must be unique per call so
    /// concurrent entries with the same timestamp never collapse; `ttl`
    /// bounds the bucket's lifetime on backends that garbage-collect.
    async fn record_window_entry(
        &self,
        bucket: &str,
        timestamp_ms: u64,
        member: &str,
        ttl: Duration,
    ) -> Result<()>;

    /// Publish an accepted placement to every process sharing the store.
    /// Returns the number of immediate receivers.
    async fn publish_update(&self, update: &PixelUpdate) -> Result<usize>;

    /// Subscribe to placements published by any process sharing the store,
    /// this one included.
    fn subscribe_updates(&self) -> broadcast::Receiver<PixelUpdate>;

    /// Verify the backend is reachable.
    async fn ping(&self) -> Result<()>;
}

/// Key layout for shared storage.
///
/// All processes of a deployment must agree on the prefix or they will
/// paint on different canvases.
#[derive(Debug, Clone)]
pub struct KeySchema {
    prefix: String,
}

impl KeySchema {
    /// Create a schema rooted at `prefix` (trailing `:` is stripped).
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches(':').to_string(),
        }
    }

    /// Packed pixel buffer.
    #[must_use]
    pub fn canvas_state(&self) -> String {
        format!("{}:canvas:state", self.prefix)
    }

    /// Monotonic canvas version counter.
    #[must_use]
    pub fn canvas_version(&self) -> String {
        format!("{}:canvas:version", self.prefix)
    }

    /// Per-writer cooldown key.
    #[must_use]
    pub fn cooldown(&self, writer_id: &str) -> String {
        format!("{}:cooldown:{}", self.prefix, writer_id)
    }

    /// Sliding-window sorted set for one rate-limit bucket.
    #[must_use]
    pub fn rate_window(&self, bucket: &str) -> String {
        format!("{}:ratelimit:{}", self.prefix, bucket)
    }

    /// Writer record, addressed by credential hash.
    #[must_use]
    pub fn writer(&self, key_hash: &str) -> String {
        format!("{}:writer:{}", self.prefix, key_hash)
    }

    /// Session record, addressed by session token.
    #[must_use]
    pub fn session(&self, token: &str) -> String {
        format!("{}:session:{}", self.prefix, token)
    }

    /// Pub/sub channel carrying accepted placements.
    #[must_use]
    pub fn updates_channel(&self) -> String {
        format!("{}:pubsub:pixels", self.prefix)
    }
}

impl Default for KeySchema {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}
