use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::status::StatusCenterItem;

/// Status center changes broadcast to presentation layers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum StatusCenterEvent {
    ItemPosted { item: StatusCenterItem },
    ItemUpdated { item: StatusCenterItem },
    ItemClosed { id: Uuid },
    CountsChanged {
        ongoing: usize,
        info_badge_state: u8,
        info_badge_value: i64,
    },
    MedianProgressChanged { value: f32 },
}

impl StatusCenterEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StatusCenterEvent::ItemPosted { .. } => "ItemPosted",
            StatusCenterEvent::ItemUpdated { .. } => "ItemUpdated",
            StatusCenterEvent::ItemClosed { .. } => "ItemClosed",
            StatusCenterEvent::CountsChanged { .. } => "CountsChanged",
            StatusCenterEvent::MedianProgressChanged { .. } => "MedianProgressChanged",
        }
    }
}

/// Fan-out of status center events over a broadcast channel
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: Arc<broadcast::Sender<StatusCenterEvent>>,
}

impl EventBroadcaster {
    /// Create a new event broadcaster
    ///
    /// # Arguments
    /// * `capacity` - The capacity of the broadcast channel (default: 100)
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusCenterEvent> {
        self.sender.subscribe()
    }

    /// Broadcast an event to all subscribers, returning how many received it
    pub fn broadcast(&self, event: StatusCenterEvent) -> usize {
        let name = event.name();
        match self.sender.send(event) {
            Ok(count) => {
                tracing::trace!(target: "events", event = name, subscribers = count, "Broadcast event");
                count
            }
            Err(_) => {
                tracing::trace!(target: "events", event = name, "No active subscribers");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
