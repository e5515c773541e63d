//! Observer WebSocket wire protocol.
//!
//! Every frame on the socket is `{"type": ..., "payload": ...}`; requests
//! without a body omit the payload entirely.

use plaza_core::{Error, PixelUpdate};
use serde::{Deserialize, Serialize};

/// Client → Server messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Liveness probe
    Ping,
    /// Request a full canvas snapshot
    GetCanvas,
    /// Present a session token (session mode only)
    Authenticate {
        /// Opaque session token
        token: String,
    },
    /// Place a pixel (session mode only, after authenticate)
    PlacePixel { x: i64, y: i64, color: i64 },
}

/// Server → Client messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Answer to `ping`
    Pong {
        /// Server clock, epoch milliseconds
        server_time: u64,
    },
    /// Full canvas snapshot
    CanvasState {
        format: &'static str,
        /// Packed 4-bit buffer, base64
        data: String,
        version: u64,
        /// Snapshot time, epoch milliseconds
        timestamp: u64,
    },
    /// Session token accepted
    Authenticated { user_id: String, username: String },
    /// Session token rejected; the server closes the socket after this
    AuthError { message: String },
    /// Observers connected to this process
    ConnectionCount { count: usize },
    /// One accepted placement
    PixelUpdate(PixelUpdate),
    /// Request-level failure; the socket stays open
    Error {
        message: String,
        code: &'static str,
    },
}

impl ServerMessage {
    pub fn pong() -> Self {
        Self::Pong {
            server_time: plaza_core::epoch_ms(),
        }
    }

    pub fn canvas_state(data: String, version: u64) -> Self {
        Self::CanvasState {
            format: "full",
            data,
            version,
            timestamp: plaza_core::epoch_ms(),
        }
    }

    pub fn auth_error(message: impl Into<String>) -> Self {
        Self::AuthError {
            message: message.into(),
        }
    }

    pub fn connection_count(count: usize) -> Self {
        Self::ConnectionCount { count }
    }

    pub fn update(update: PixelUpdate) -> Self {
        Self::PixelUpdate(update)
    }

    /// A frame the server could not parse or does not know.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: "INVALID_MESSAGE",
        }
    }

    /// A request valid in some other mode but not this one.
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: "NOT_SUPPORTED",
        }
    }

    /// A gateway rejection, carrying its stable code.
    pub fn from_error(error: &Error) -> Self {
        Self::Error {
            message: error.to_string(),
            code: error.code(),
        }
    }
}
