use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Who currently holds the checkout of a book, as seen from this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckedOutBy {
    Unlocked,
    /// Checked out here by the current identity (or a new local book).
    Me,
    Other,
    /// The local folder is gone.
    Deleted,
}

/// Every change the engine wants collaborators to see produces an Event.
/// The CLI and any UI layer subscribe through [`EventBus::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CollectionEvent {
    BookStatusChanged {
        book: String,
        checked_out_by: CheckedOutBy,
    },
    /// A message or milestone was written; collection health may differ.
    StatusChanged,
}

const EVENT_CAPACITY: usize = 256;

/// Fan-out of [`CollectionEvent`]s to any number of independent listeners.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CollectionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CollectionEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, event: CollectionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
