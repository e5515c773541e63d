//! WebSocket module for Plaza
//!
//! Provides the real-time observer endpoint:
//! - /ws - canvas snapshots, pixel updates, observer counts, and (in
//!   session mode) authenticated placements

pub mod hub;
pub mod protocol;
mod socket;

pub use hub::BroadcastHub;
pub use socket::ws_handler;

use axum::{routing::get, Router};

/// Create the WebSocket router
pub fn websocket_routes() -> Router {
    Router::new().route("/ws", get(ws_handler))
}

#[cfg(test)]
mod tests;
