//! Cache events and the per-backend event bus.
//!
//! Each backend instance owns an [`EventBus`] built on tokio's broadcast
//! channel. Enhancers subscribe to their underlying backend's bus at
//! construction and re-publish to their own, so subscribers on the outermost
//! layer observe removals occurring at any inner layer. There is no global
//! event bus.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default buffer size for the broadcast channel. Slow receivers beyond this
/// limit lose the oldest events.
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Why an item was removed from a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemRemovedReason {
    /// Explicitly removed by a caller.
    Removed,
    /// The entry's expiration elapsed.
    Expired,
    /// Evicted to reclaim capacity.
    Evicted,
    /// Removed because a dependency was invalidated.
    Invalidated,
    /// Any other backend-internal cause.
    Other,
}

impl std::fmt::Display for ItemRemovedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Removed => write!(f, "removed"),
            Self::Expired => write!(f, "expired"),
            Self::Evicted => write!(f, "evicted"),
            Self::Invalidated => write!(f, "invalidated"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// An event raised by a cache backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CacheEvent {
    /// An item was removed, whether explicitly or by backend-internal
    /// eviction.
    ItemRemoved {
        /// The removed item's key.
        key: String,
        /// Why the item was removed.
        reason: ItemRemovedReason,
        /// Id of the backend instance where the removal originated.
        source_id: Uuid,
    },
    /// A dependency key was invalidated.
    DependencyInvalidated {
        /// The invalidated dependency key.
        key: String,
        /// Id of the backend instance where the invalidation originated.
        source_id: Uuid,
    },
}

impl CacheEvent {
    /// Creates an `ItemRemoved` event.
    #[must_use]
    pub fn item_removed(key: impl Into<String>, reason: ItemRemovedReason, source_id: Uuid) -> Self {
        Self::ItemRemoved {
            key: key.into(),
            reason,
            source_id,
        }
    }

    /// Creates a `DependencyInvalidated` event.
    #[must_use]
    pub fn dependency_invalidated(key: impl Into<String>, source_id: Uuid) -> Self {
        Self::DependencyInvalidated {
            key: key.into(),
            source_id,
        }
    }

    /// The key the event is about.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::ItemRemoved { key, .. } | Self::DependencyInvalidated { key, .. } => key,
        }
    }

    /// Id of the backend instance that originated the event.
    #[must_use]
    pub fn source_id(&self) -> Uuid {
        match self {
            Self::ItemRemoved { source_id, .. } | Self::DependencyInvalidated { source_id, .. } => {
                *source_id
            }
        }
    }
}

/// Per-backend event broadcaster.
///
/// Cloneable and thread-safe; multiple subscribers receive events from a
/// single sender. Events published before subscription are not received.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    /// Creates a bus with the default buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// Creates a bus with a custom buffer size.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event (0 when
    /// there are none).
    pub fn publish(&self, event: CacheEvent) -> usize {
        self.sender.send(event).unwrap_or_default()
    }

    /// Subscribes to events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Returns `true` if anyone is listening.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_no_subscribers() {
        let bus = EventBus::new();
        assert!(!bus.has_subscribers());
        let delivered = bus.publish(CacheEvent::item_removed(
            "k",
            ItemRemovedReason::Removed,
            Uuid::new_v4(),
        ));
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_bus_publish_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let source = Uuid::new_v4();
        bus.publish(CacheEvent::dependency_invalidated("dep", source));

        let event = receiver.recv().await.expect("recv");
        assert_eq!(event.key(), "dep");
        assert_eq!(event.source_id(), source);
        assert!(matches!(event, CacheEvent::DependencyInvalidated { .. }));
    }

    #[tokio::test]
    async fn test_bus_multiple_subscribers() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let delivered = bus.publish(CacheEvent::item_removed(
            "k",
            ItemRemovedReason::Expired,
            Uuid::new_v4(),
        ));
        assert_eq!(delivered, 2);

        assert_eq!(first.recv().await.expect("recv").key(), "k");
        assert_eq!(second.recv().await.expect("recv").key(), "k");
    }
}
