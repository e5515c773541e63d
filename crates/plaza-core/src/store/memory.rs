//! In-memory canvas store
//!
//! Single-process backend for tests and local development. Cooldowns and
//! rate-limit windows use real wall-clock arithmetic so throttle behavior
//! matches the Redis backend; cross-process fan-out degrades to an
//! in-process broadcast channel.

use super::{CanvasStore, WindowSnapshot};
use crate::canvas::CanvasSpec;
use crate::error::Result;
use crate::events::{PixelUpdate, UpdateBus};
use crate::util::epoch_ms;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};

#[derive(Debug, Default)]
struct State {
    canvas: Vec<u8>,
    version: u64,
    /// Writer id to cooldown expiry, ms since the epoch.
    cooldowns: HashMap<String, u64>,
    /// Window bucket to entry timestamps, ms since the epoch.
    windows: HashMap<String, Vec<u64>>,
}

/// In-memory [`CanvasStore`].
///
/// Data is lost on restart and never shared across processes; use
/// [`RedisStore`](super::RedisStore) for real deployments.
pub struct MemoryStore {
    spec: CanvasSpec,
    state: RwLock<State>,
    bus: UpdateBus,
}

impl MemoryStore {
    /// Create a store for `spec` with the default update-channel capacity.
    #[must_use]
    pub fn new(spec: CanvasSpec) -> Self {
        Self::with_capacity(spec, 256)
    }

    /// Create a store for `spec` with an explicit update-channel capacity.
    #[must_use]
    pub fn with_capacity(spec: CanvasSpec, capacity: usize) -> Self {
        Self {
            spec,
            state: RwLock::new(State {
                canvas: spec.empty_buffer(),
                ..State::default()
            }),
            bus: UpdateBus::new(capacity),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(CanvasSpec::default())
    }
}

#[async_trait]
impl CanvasStore for MemoryStore {
    async fn fetch_canvas(&self) -> Result<Vec<u8>> {
        let state = self.state.read().await;
        Ok(state.canvas.clone())
    }

    async fn store_canvas(&self, buffer: &[u8]) -> Result<()> {
        let mut state = self.state.write().await;
        state.canvas = buffer.to_vec();
        // Keep the invariant that the buffer is always exactly spec-sized.
        state.canvas.resize(self.spec.buffer_len(), 0);
        Ok(())
    }

    async fn set_cell(&self, bit_offset: u64, color: u8) -> Result<()> {
        let mut state = self.state.write().await;
        let byte_index = (bit_offset / 8) as usize;
        if byte_index >= state.canvas.len() {
            state.canvas.resize(byte_index + 1, 0);
        }
        let byte = &mut state.canvas[byte_index];
        if bit_offset % 8 == 0 {
            *byte = ((color & 0x0F) << 4) | (*byte & 0x0F);
        } else {
            *byte = (*byte & 0xF0) | (color & 0x0F);
        }
        Ok(())
    }

    async fn version(&self) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state.version)
    }

    async fn bump_version(&self) -> Result<u64> {
        let mut state = self.state.write().await;
        state.version += 1;
        Ok(state.version)
    }

    async fn cooldown_remaining_ms(&self, writer_id: &str) -> Result<Option<u64>> {
        let now = epoch_ms();
        let mut state = self.state.write().await;
        let expires_at = state.cooldowns.get(writer_id).copied();
        match expires_at {
            Some(at) if at > now => Ok(Some(at - now)),
            Some(_) => {
                state.cooldowns.remove(writer_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_cooldown(&self, writer_id: &str, ttl: Duration) -> Result<()> {
        let expires_at = epoch_ms() + ttl.as_millis() as u64;
        let mut state = self.state.write().await;
        state.cooldowns.insert(writer_id.to_string(), expires_at);
        Ok(())
    }

    async fn window_count(&self, bucket: &str, window_start_ms: u64) -> Result<WindowSnapshot> {
        let mut state = self.state.write().await;
        let Some(entries) = state.windows.get_mut(bucket) else {
            return Ok(WindowSnapshot {
                count: 0,
                oldest_ms: None,
            });
        };
        entries.retain(|&ts| ts > window_start_ms);
        let snapshot = WindowSnapshot {
            count: entries.len() as u64,
            oldest_ms: entries.iter().copied().min(),
        };
        if entries.is_empty() {
            state.windows.remove(bucket);
        }
        Ok(snapshot)
    }

    // `member` and `ttl` only matter for backends where entries can collide
    // or need garbage collection; a growable Vec has neither problem.
    async fn record_window_entry(
        &self,
        bucket: &str,
        timestamp_ms: u64,
        _member: &str,
        _ttl: Duration,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .windows
            .entry(bucket.to_string())
            .or_default()
            .push(timestamp_ms);
        Ok(())
    }

    async fn publish_update(&self, update: &PixelUpdate) -> Result<usize> {
        Ok(self.bus.publish(update.clone()))
    }

    fn subscribe_updates(&self) -> broadcast::Receiver<PixelUpdate> {
        self.bus.subscribe()
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
