//! Plaza Core - Shared Canvas Engine
//!
//! This crate provides the core logic for the Plaza shared pixel canvas,
//! including:
//! - Canvas: Packed 4-bit cell grid, coordinate/color validation, codecs
//! - Store: Canvas persistence backends (Redis and in-memory)
//! - Throttle: Per-writer cooldowns and sliding-window rate limits
//! - Gateway: The pixel placement pipeline (identity, validation, write, fan-out)
//! - Directory: Writer credentials and observer session lookups
//! - Events: Pixel update broadcasting to in-process subscribers
//! - Util: Circuit breaker and timeout guards for store calls

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod canvas;
pub mod directory;
pub mod error;
pub mod events;
pub mod gateway;
pub mod store;
pub mod throttle;
pub mod util;

pub use canvas::{
    decode_canvas, encode_canvas, CanvasSpec, BITS_PER_PIXEL, DEFAULT_COLOR_COUNT, DEFAULT_HEIGHT,
    DEFAULT_WIDTH,
};
pub use directory::{
    hash_credential, register_writer, MemoryDirectory, RedisDirectory, SessionRecord,
    WriterDirectory, WriterRecord,
};
pub use error::{Error, Result};
pub use events::{PixelUpdate, UpdateBus};
pub use gateway::{
    CanvasSnapshot, Placement, PlacementGateway, WriteStrategy, CANVAS_CIRCUIT, IDENTITY_CIRCUIT,
};
pub use store::{CanvasStore, KeySchema, MemoryStore, RedisStore, WindowSnapshot, DEFAULT_KEY_PREFIX};
pub use throttle::{
    CooldownGate, CooldownStatus, RateLimitConfig, RateLimitDecision, RateLimiter, Throttle,
};
pub use util::{
    epoch_ms, with_timeout, CircuitBreaker, CircuitBreakerConfig, CircuitRegistry, CircuitSnapshot,
    CircuitState,
};
