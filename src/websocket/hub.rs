//! Observer broadcast hub
//!
//! Registry of connected observer sockets on this process. One forwarding
//! task drains the gateway's update subscription and fans each accepted
//! placement out to every registered socket; per-socket unbounded channels
//! keep one slow observer from blocking the rest.

use dashmap::DashMap;
use plaza_core::PixelUpdate;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::ServerMessage;

/// Registry of connected observer sockets.
pub struct BroadcastHub {
    sockets: DashMap<Uuid, mpsc::UnboundedSender<ServerMessage>>,
}

impl BroadcastHub {
    /// Create the hub and spawn the update forwarding task.
    pub fn start(updates: broadcast::Receiver<PixelUpdate>) -> Arc<Self> {
        let hub = Arc::new(Self {
            sockets: DashMap::new(),
        });
        tokio::spawn(forward_updates(updates, hub.clone()));
        hub
    }

    /// Register a socket's send handle. Returns the new observer count.
    pub fn register(&self, id: Uuid, tx: mpsc::UnboundedSender<ServerMessage>) -> usize {
        self.sockets.insert(id, tx);
        debug!(socket = %id, observers = self.sockets.len(), "observer connected");
        self.sockets.len()
    }

    /// Drop a socket's send handle. Returns the remaining observer count.
    pub fn unregister(&self, id: &Uuid) -> usize {
        self.sockets.remove(id);
        debug!(socket = %id, observers = self.sockets.len(), "observer disconnected");
        self.sockets.len()
    }

    /// Observers currently connected to this process.
    pub fn connection_count(&self) -> usize {
        self.sockets.len()
    }

    /// Send a message to every registered socket.
    ///
    /// A failed send means that socket's loop already exited; it will
    /// unregister itself, so the failure is only counted here.
    pub fn broadcast(&self, message: ServerMessage) -> usize {
        let mut delivered = 0;
        let mut failed = 0;
        for entry in self.sockets.iter() {
            if entry.value().send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                failed += 1;
            }
        }
        if failed > 0 {
            debug!(failed, "skipped closed observer channels during broadcast");
        }
        delivered
    }

    /// Tell every observer how many observers there are now.
    pub fn broadcast_count(&self) {
        self.broadcast(ServerMessage::connection_count(self.connection_count()));
    }
}

/// Drain the update subscription into the registry until the bus closes.
async fn forward_updates(mut updates: broadcast::Receiver<PixelUpdate>, hub: Arc<BroadcastHub>) {
    loop {
        match updates.recv().await {
            Ok(update) => {
                hub.broadcast(ServerMessage::update(update));
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                // Observers resync with get_canvas; the stream itself continues.
                warn!(missed, "update forwarder lagged behind the bus");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("update bus closed, stopping forwarder");
                break;
            }
        }
    }
}
