use super::subscription::{EventSubscription, SubscriptionFilter};
use super::types::SystemEvent;
use crate::constants::broadcast as defaults;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Non-blocking fan-out of system events.
///
/// `publish` never waits on subscribers. The channel keeps the newest
/// `capacity` events; a slow subscriber skips ahead instead of stalling others.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<SystemEvent>,
    published: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPublisherStats {
    pub published: u64,
    pub subscribers: usize,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish to every current subscriber. Having none is not an error.
    pub fn publish(&self, event: SystemEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        let name = event.event_name();
        match self.sender.send(event) {
            Ok(receivers) => trace!(event = name, receivers = receivers, "Published event"),
            Err(broadcast::error::SendError(_)) => {
                trace!(event = name, "Published event with no subscribers")
            }
        }
    }

    pub fn subscribe(&self, filter: SubscriptionFilter) -> EventSubscription {
        EventSubscription::new(self.sender.subscribe(), filter)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> EventPublisherStats {
        EventPublisherStats {
            published: self.published.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(defaults::DEFAULT_CHANNEL_CAPACITY)
    }
}
