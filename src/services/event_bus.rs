//! Event distribution over a `tokio::sync::broadcast` channel. Trimmed to
//! drop persistence/replay, which this crate has no use for.

use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// Generic broadcast wrapper over one event kind `E`. The coordinator and
/// dispatcher each own one `EventBus<SwarmEvent>` / `EventBus<DispatcherEvent>`.
pub struct EventBus<E: Clone> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Best-effort: a channel with no subscribers is not an error, matching
    /// the "events are fire-and-forget" design note.
    pub fn publish(&self, event: E) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus: EventBus<u32> = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(42);
        assert_eq!(rx.recv().await.unwrap(), 42);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus: EventBus<u32> = EventBus::new();
        bus.publish(1);
    }
}
