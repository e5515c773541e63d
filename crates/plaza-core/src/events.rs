//! UpdateBus - broadcast channel carrying accepted placements.
//!
//! The gateway publishes one [`PixelUpdate`] per accepted write; the
//! WebSocket hub (and anything else watching the canvas) subscribes. The
//! channel is typed end to end, so the gateway-to-hub contract is this
//! struct and nothing else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One accepted placement, published once and never persisted.
///
/// This is also the wire shape of the `pixel_update` WebSocket payload and
/// of the cross-process pub/sub message, so the fields are stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelUpdate {
    /// Cell x coordinate
    pub x: u32,
    /// Cell y coordinate
    pub y: u32,
    /// New color index
    pub color: u8,
    /// Writer id (agent id or session user id)
    pub actor_id: String,
    /// Writer display name
    pub actor_name: String,
    /// When the placement was accepted
    pub timestamp: DateTime<Utc>,
}

impl PixelUpdate {
    /// Build an update stamped with the current time.
    #[must_use]
    pub fn new(
        x: u32,
        y: u32,
        color: u8,
        actor_id: impl Into<String>,
        actor_name: impl Into<String>,
    ) -> Self {
        Self {
            x,
            y,
            color,
            actor_id: actor_id.into(),
            actor_name: actor_name.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast-based channel for accepted placements.
///
/// Uses `tokio::broadcast` so multiple subscribers can receive the same
/// updates. Slow subscribers miss updates (lagged) rather than blocking the
/// publisher; a lagged observer recovers by re-fetching the full canvas.
#[derive(Debug, Clone)]
pub struct UpdateBus {
    sender: broadcast::Sender<PixelUpdate>,
}

impl UpdateBus {
    /// Create a bus with the given channel capacity.
    ///
    /// Capacity bounds how far a subscriber may fall behind before it starts
    /// missing updates.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PixelUpdate> {
        self.sender.subscribe()
    }

    /// Publish an update to all active subscribers.
    ///
    /// Returns the number of subscribers that received it; with no
    /// subscribers the update is silently dropped.
    pub fn publish(&self, update: PixelUpdate) -> usize {
        // send() errors only when there are no receivers
        self.sender.send(update).unwrap_or(0)
    }

    /// Current number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = UpdateBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(PixelUpdate::new(100, 100, 5, "agent-1", "painterbot"));

        let update = rx.recv().await.unwrap();
        assert_eq!(update.x, 100);
        assert_eq!(update.y, 100);
        assert_eq!(update.color, 5);
        assert_eq!(update.actor_name, "painterbot");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = UpdateBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        let count = bus.publish(PixelUpdate::new(0, 0, 1, "a", "a"));
        assert_eq!(count, 2);

        assert_eq!(rx1.recv().await.unwrap().x, 0);
        assert_eq!(rx2.recv().await.unwrap().x, 0);
    }

    #[test]
    fn test_publish_no_subscribers() {
        let bus = UpdateBus::new(16);
        let count = bus.publish(PixelUpdate::new(1, 2, 3, "a", "a"));
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_updates_arrive_in_publish_order() {
        let bus = UpdateBus::new(16);
        let mut rx = bus.subscribe();

        for x in 0..5 {
            bus.publish(PixelUpdate::new(x, 0, 1, "a", "a"));
        }
        for x in 0..5 {
            assert_eq!(rx.recv().await.unwrap().x, x);
        }
    }

    #[test]
    fn test_update_serialization() {
        let update = PixelUpdate::new(10, 20, 7, "agent-9", "mural");
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"x\":10"));
        assert!(json.contains("\"y\":20"));
        assert!(json.contains("\"color\":7"));
        assert!(json.contains("\"actor_name\":\"mural\""));

        let back: PixelUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, update);
    }
}
