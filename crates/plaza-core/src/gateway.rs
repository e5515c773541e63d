//! Placement gateway
//!
//! The single choke point every write goes through: resolve identity,
//! validate, throttle, mutate, publish. The REST and WebSocket surfaces are
//! thin adapters over this type, so both paths enforce identical rules.
//!
//! Store calls run inside a named circuit breaker with a per-call deadline.
//! Canvas traffic and identity lookups ride separate circuits: a broken
//! pixel buffer should not take credential checks down with it, and vice
//! versa. Throttle calls carry their own fail-open policy instead and never
//! trip a circuit.

use crate::canvas::CanvasSpec;
use crate::directory::{hash_credential, SessionRecord, WriterDirectory, WriterRecord};
use crate::error::{Error, Result};
use crate::events::PixelUpdate;
use crate::store::CanvasStore;
use crate::throttle::Throttle;
use crate::util::{with_timeout, CircuitBreakerConfig, CircuitRegistry};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};

/// Circuit guarding canvas reads, writes, and the version counter.
pub const CANVAS_CIRCUIT: &str = "canvas";
/// Circuit guarding writer and session lookups.
pub const IDENTITY_CIRCUIT: &str = "identity";

/// Default deadline for guarded store calls.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// How a placement mutates the shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteStrategy {
    /// One single-cell store operation. Concurrent writers can never lose
    /// each other's pixels.
    #[default]
    Atomic,
    /// Fetch the whole buffer, edit one nibble, write it back. Kept for
    /// stores without a single-cell operation; two overlapping writes can
    /// drop one of the pixels.
    ReadModifyWrite,
}

/// An accepted placement.
#[derive(Debug, Clone)]
pub struct Placement {
    /// The update as published to observers.
    pub update: PixelUpdate,
    /// Canvas version after this write.
    pub version: u64,
    /// Hint for when this writer may place again.
    pub retry_after_seconds: u64,
}

/// The full canvas as of one read.
#[derive(Debug, Clone)]
pub struct CanvasSnapshot {
    /// Packed pixel buffer.
    pub buffer: Vec<u8>,
    /// Version counter at fetch time.
    pub version: u64,
}

/// Orchestrates the write path and the guarded read paths.
pub struct PlacementGateway {
    spec: CanvasSpec,
    store: Arc<dyn CanvasStore>,
    directory: Arc<dyn WriterDirectory>,
    throttle: Throttle,
    circuits: CircuitRegistry,
    store_timeout: Duration,
    write_strategy: WriteStrategy,
}

impl PlacementGateway {
    /// Create a gateway with default resilience settings and the atomic
    /// write strategy.
    pub fn new(
        spec: CanvasSpec,
        store: Arc<dyn CanvasStore>,
        directory: Arc<dyn WriterDirectory>,
        throttle: Throttle,
    ) -> Self {
        Self {
            spec,
            store,
            directory,
            throttle,
            circuits: CircuitRegistry::with_defaults(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            write_strategy: WriteStrategy::default(),
        }
    }

    /// Set the write strategy.
    #[must_use]
    pub fn with_write_strategy(mut self, strategy: WriteStrategy) -> Self {
        self.write_strategy = strategy;
        self
    }

    /// Set the deadline applied to every guarded store call.
    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Replace the circuit configuration. Intended for construction time;
    /// existing circuit state is discarded.
    #[must_use]
    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuits = CircuitRegistry::new(config);
        self
    }

    /// Canvas geometry this gateway validates against.
    #[must_use]
    pub fn spec(&self) -> CanvasSpec {
        self.spec
    }

    /// The named circuits guarding this gateway's store calls.
    #[must_use]
    pub fn circuits(&self) -> &CircuitRegistry {
        &self.circuits
    }

    /// Subscribe to accepted placements from every process on this store.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PixelUpdate> {
        self.store.subscribe_updates()
    }

    /// Place a pixel as an API-key writer.
    pub async fn place_pixel(
        &self,
        credential: &str,
        x: i64,
        y: i64,
        color: i64,
    ) -> Result<Placement> {
        let writer = self.resolve_writer(credential).await?;
        self.place_as(&writer.id, &writer.name, None, x, y, color)
            .await
    }

    /// Place a pixel as an authenticated session.
    ///
    /// The token is re-resolved on every placement so revocation and
    /// spectator downgrades take effect immediately.
    pub async fn place_for_session(
        &self,
        token: &str,
        x: i64,
        y: i64,
        color: i64,
    ) -> Result<Placement> {
        let session = self.resolve_session(token).await?;
        if session.spectator {
            return Err(Error::NotActive);
        }
        let cooldown_override = session.cooldown_seconds.map(Duration::from_secs);
        self.place_as(
            &session.user_id,
            &session.username,
            cooldown_override,
            x,
            y,
            color,
        )
        .await
    }

    /// Resolve a session token, for the WebSocket authenticate handshake.
    pub async fn resolve_session(&self, token: &str) -> Result<SessionRecord> {
        self.guard(
            IDENTITY_CIRCUIT,
            "session_lookup",
            self.directory.find_session(token),
        )
        .await?
        .ok_or(Error::Unauthenticated)
    }

    /// Fetch the full canvas and its version.
    pub async fn canvas_snapshot(&self) -> Result<CanvasSnapshot> {
        let buffer = self
            .guard(CANVAS_CIRCUIT, "canvas_fetch", self.store.fetch_canvas())
            .await?;
        let version = self.canvas_version().await?;
        Ok(CanvasSnapshot { buffer, version })
    }

    /// Current canvas version.
    pub async fn canvas_version(&self) -> Result<u64> {
        self.guard(CANVAS_CIRCUIT, "version_read", self.store.version())
            .await
    }

    /// Read one cell.
    pub async fn read_cell(&self, x: i64, y: i64) -> Result<u8> {
        let (x, y) = self.spec.validate_coords(x, y)?;
        let buffer = self
            .guard(CANVAS_CIRCUIT, "canvas_fetch", self.store.fetch_canvas())
            .await?;
        self.spec.read_cell(&buffer, x, y)
    }

    /// Ping the shared store through the canvas circuit: an open circuit
    /// reports unhealthy without a round trip.
    pub async fn store_check(&self) -> Result<()> {
        self.guard(CANVAS_CIRCUIT, "store_ping", self.store.ping())
            .await
    }

    /// Whether the shared store currently answers.
    pub async fn store_healthy(&self) -> bool {
        self.store_check().await.is_ok()
    }

    async fn resolve_writer(&self, credential: &str) -> Result<WriterRecord> {
        let key_hash = hash_credential(credential);
        let record = self
            .guard(
                IDENTITY_CIRCUIT,
                "writer_lookup",
                self.directory.find_by_key_hash(&key_hash),
            )
            .await?
            .ok_or(Error::Unauthenticated)?;
        if !record.active {
            return Err(Error::NotActive);
        }
        Ok(record)
    }

    #[instrument(
        name = "place_pixel",
        skip(self, actor_name, cooldown_override),
        fields(writer = %actor_id)
    )]
    async fn place_as(
        &self,
        actor_id: &str,
        actor_name: &str,
        cooldown_override: Option<Duration>,
        x: i64,
        y: i64,
        color: i64,
    ) -> Result<Placement> {
        let (x, y) = self.spec.validate_coords(x, y)?;
        let color = self.spec.validate_color(color)?;

        self.throttle.admit(actor_id).await?;

        match self.write_strategy {
            WriteStrategy::Atomic => {
                let bit_offset = self.spec.bit_offset(x, y);
                self.guard(
                    CANVAS_CIRCUIT,
                    "cell_write",
                    self.store.set_cell(bit_offset, color),
                )
                .await?;
            }
            WriteStrategy::ReadModifyWrite => {
                let mut buffer = self
                    .guard(CANVAS_CIRCUIT, "canvas_fetch", self.store.fetch_canvas())
                    .await?;
                self.spec.write_cell(&mut buffer, x, y, color)?;
                self.guard(
                    CANVAS_CIRCUIT,
                    "canvas_store",
                    self.store.store_canvas(&buffer),
                )
                .await?;
            }
        }

        let version = self
            .guard(CANVAS_CIRCUIT, "version_bump", self.store.bump_version())
            .await?;

        self.throttle.commit(actor_id, cooldown_override).await?;

        let update = PixelUpdate::new(x, y, color, actor_id, actor_name);

        // The write is already durable; a failed publish only delays
        // observers until their next full fetch.
        let published = with_timeout(
            "update_publish",
            self.store_timeout,
            self.store.publish_update(&update),
        )
        .await;
        match published {
            Ok(receivers) => debug!(version, receivers, "placement published"),
            Err(e) => warn!(version, error = %e, "placement accepted but publish failed"),
        }

        Ok(Placement {
            update,
            version,
            retry_after_seconds: self.throttle.retry_hint_seconds(cooldown_override),
        })
    }

    async fn guard<T, F>(&self, circuit: &str, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.circuits
            .run(circuit, with_timeout(operation, self.store_timeout, fut))
            .await
    }
}
