//! Redis-backed canvas store (for production)
//!
//! One Redis deployment is the meeting point for every plaza process:
//! the packed canvas lives in a single value, throttle state in volatile
//! keys and sorted sets, and accepted placements fan out over pub/sub.
//!
//! The store holds one background subscription to the placement channel
//! and republishes everything it hears on its local [`UpdateBus`], so
//! in-process observers see writes from other processes the same way they
//! see their own.

use super::{CanvasStore, KeySchema, WindowSnapshot};
use crate::canvas::CanvasSpec;
use crate::error::{Error, Result};
use crate::events::{PixelUpdate, UpdateBus};
use crate::util::epoch_ms;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delay before re-subscribing after the pub/sub connection drops.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Redis-backed [`CanvasStore`].
///
/// Commands go over a multiplexed connection obtained per call; the
/// placement subscription runs on its own dedicated connection, as Redis
/// requires.
pub struct RedisStore {
    client: redis::Client,
    keys: KeySchema,
    spec: CanvasSpec,
    bus: UpdateBus,
    subscriber: JoinHandle<()>,
}

impl RedisStore {
    /// Connect to Redis and start the placement subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server does not
    /// answer a `PING`.
    pub async fn connect(
        redis_url: &str,
        keys: KeySchema,
        spec: CanvasSpec,
        capacity: usize,
    ) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::persistence(format!("invalid Redis URL: {e}")))?;
        let bus = UpdateBus::new(capacity);

        // Fail fast on an unreachable server instead of at the first write.
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::persistence(format!("Redis connection failed: {e}")))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis PING failed: {e}")))?;

        let subscriber = spawn_subscriber(client.clone(), keys.updates_channel(), bus.clone());

        info!(channel = %keys.updates_channel(), "connected to Redis canvas store");

        Ok(Self {
            client,
            keys,
            spec,
            bus,
            subscriber,
        })
    }

    /// Get an async connection
    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::persistence(format!("Redis connection failed: {e}")))
    }
}

impl Drop for RedisStore {
    fn drop(&mut self) {
        self.subscriber.abort();
    }
}

#[async_trait]
impl CanvasStore for RedisStore {
    async fn fetch_canvas(&self) -> Result<Vec<u8>> {
        let mut conn = self.get_connection().await?;
        let key = self.keys.canvas_state();

        let data: Option<Vec<u8>> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis GET failed: {e}")))?;

        // BITFIELD grows the value only as far as it has written, so a
        // sparsely painted canvas comes back short. Pad to the full frame.
        let mut buffer = data.unwrap_or_default();
        buffer.resize(self.spec.buffer_len(), 0);
        Ok(buffer)
    }

    async fn store_canvas(&self, buffer: &[u8]) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let key = self.keys.canvas_state();

        redis::cmd("SET")
            .arg(&key)
            .arg(buffer)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis SET failed: {e}")))?;

        debug!(bytes = buffer.len(), "canvas buffer replaced");
        Ok(())
    }

    async fn set_cell(&self, bit_offset: u64, color: u8) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let key = self.keys.canvas_state();

        // Single-command nibble write; concurrent writers can never tear a
        // byte the way a read-modify-write of the whole buffer can.
        let _: Vec<i64> = redis::cmd("BITFIELD")
            .arg(&key)
            .arg("SET")
            .arg("u4")
            .arg(bit_offset)
            .arg(color)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis BITFIELD failed: {e}")))?;

        Ok(())
    }

    async fn version(&self) -> Result<u64> {
        let mut conn = self.get_connection().await?;
        let key = self.keys.canvas_version();

        let version: Option<u64> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis GET failed: {e}")))?;

        Ok(version.unwrap_or(0))
    }

    async fn bump_version(&self) -> Result<u64> {
        let mut conn = self.get_connection().await?;
        let key = self.keys.canvas_version();

        redis::cmd("INCR")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis INCR failed: {e}")))
    }

    async fn cooldown_remaining_ms(&self, writer_id: &str) -> Result<Option<u64>> {
        let mut conn = self.get_connection().await?;
        let key = self.keys.cooldown(writer_id);

        // PTTL: -2 no key, -1 no expiry. Only a positive TTL is a live
        // cooldown; an unexpiring key would lock a writer out forever.
        let ttl_ms: i64 = redis::cmd("PTTL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis PTTL failed: {e}")))?;

        if ttl_ms > 0 {
            Ok(Some(ttl_ms as u64))
        } else {
            Ok(None)
        }
    }

    async fn set_cooldown(&self, writer_id: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let key = self.keys.cooldown(writer_id);

        redis::cmd("SET")
            .arg(&key)
            .arg(epoch_ms())
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis SET PX failed: {e}")))?;

        Ok(())
    }

    async fn window_count(&self, bucket: &str, window_start_ms: u64) -> Result<WindowSnapshot> {
        let mut conn = self.get_connection().await?;
        let key = self.keys.rate_window(bucket);

        let _: i64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(&key)
            .arg(0)
            .arg(window_start_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis ZREMRANGEBYSCORE failed: {e}")))?;

        let count: u64 = redis::cmd("ZCARD")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis ZCARD failed: {e}")))?;

        let oldest: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(&key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis ZRANGE failed: {e}")))?;

        Ok(WindowSnapshot {
            count,
            oldest_ms: oldest.first().map(|(_, score)| *score as u64),
        })
    }

    async fn record_window_entry(
        &self,
        bucket: &str,
        timestamp_ms: u64,
        member: &str,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let key = self.keys.rate_window(bucket);

        let _: i64 = redis::cmd("ZADD")
            .arg(&key)
            .arg(timestamp_ms)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis ZADD failed: {e}")))?;

        let _: i64 = redis::cmd("EXPIRE")
            .arg(&key)
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis EXPIRE failed: {e}")))?;

        Ok(())
    }

    /// Publish over the shared channel. Local subscribers receive the
    /// update through this store's own subscription, like any other
    /// process, so nothing is delivered twice.
    async fn publish_update(&self, update: &PixelUpdate) -> Result<usize> {
        let mut conn = self.get_connection().await?;
        let channel = self.keys.updates_channel();

        let payload = serde_json::to_string(update)
            .map_err(|e| Error::persistence(format!("serialize update failed: {e}")))?;

        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(&channel)
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis PUBLISH failed: {e}")))?;

        Ok(receivers.max(0) as usize)
    }

    fn subscribe_updates(&self) -> broadcast::Receiver<PixelUpdate> {
        self.bus.subscribe()
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::persistence(format!("Redis PING failed: {e}")))?;
        Ok(())
    }
}

/// Run the placement subscription until the process exits, reconnecting
/// whenever the pub/sub connection drops.
fn spawn_subscriber(client: redis::Client, channel: String, bus: UpdateBus) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = subscribe_and_forward(&client, &channel, &bus).await {
                warn!(channel = %channel, error = %e, "placement subscription lost, reconnecting");
            } else {
                warn!(channel = %channel, "placement subscription ended, reconnecting");
            }
            tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        }
    })
}

async fn subscribe_and_forward(
    client: &redis::Client,
    channel: &str,
    bus: &UpdateBus,
) -> Result<()> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| Error::persistence(format!("Redis subscribe connection failed: {e}")))?;
    pubsub
        .subscribe(channel)
        .await
        .map_err(|e| Error::persistence(format!("Redis SUBSCRIBE failed: {e}")))?;

    info!(channel = %channel, "subscribed to placement channel");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "unreadable placement message, skipping");
                continue;
            }
        };
        match serde_json::from_str::<PixelUpdate>(&payload) {
            Ok(update) => {
                bus.publish(update);
            }
            Err(e) => warn!(error = %e, "malformed placement message, skipping"),
        }
    }

    Ok(())
}
