// Push updates for dashboard clients
//
// Uses tokio broadcast channel to fan updates out to every SSE client

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Update pushed to dashboard clients
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PushUpdate {
    /// Event name, `<endpoint>_update`
    pub event: String,
    /// Raw data snapshot (not the envelope)
    pub data: Value,
}

/// Broadcaster shared by all pollers
#[derive(Clone)]
pub struct UpdateBroadcaster {
    sender: broadcast::Sender<PushUpdate>,
}

impl UpdateBroadcaster {
    /// Create a new broadcaster with buffer size
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Broadcast an update to all subscribers
    pub fn broadcast(&self, update: PushUpdate) {
        // Ignore error if no subscribers
        let _ = self.sender.send(update);
    }

    /// Subscribe to updates
    pub fn subscribe(&self) -> broadcast::Receiver<PushUpdate> {
        self.sender.subscribe()
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for UpdateBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}
