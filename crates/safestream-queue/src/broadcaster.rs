//! Fan-out of status events to live subscribers.

use metrics::counter;
use tokio::sync::broadcast;
use tracing::trace;

use safestream_models::{StatusEvent, VideoStatus};

/// Events buffered per subscriber before it starts lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Volatile, at-most-once broadcaster. No replay, no acknowledgement.
///
/// Subscribing returns a receiver; dropping it unsubscribes.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<StatusEvent>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: StatusEvent) -> usize {
        let status = VideoStatus::from(event.status).as_str();
        counter!("status_events_published_total", "status" => status).increment(1);

        trace!(video_id = %event.video_id, status, progress = event.progress, "Publishing status event");
        // Err only means nobody is listening
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safestream_models::{Verdict, VideoId};

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let broadcaster = EventBroadcaster::default();
        assert_eq!(broadcaster.publish(StatusEvent::failed(&VideoId::from("v1"))), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let broadcaster = EventBroadcaster::default();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();

        let event = StatusEvent::completed(&VideoId::from("v1"), Verdict::Safe);
        assert_eq!(broadcaster.publish(event.clone()), 2);

        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_replay() {
        let broadcaster = EventBroadcaster::default();
        broadcaster.publish(StatusEvent::processing(&VideoId::from("v1"), 10));

        let mut late = broadcaster.subscribe();
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let broadcaster = EventBroadcaster::default();
        let rx = broadcaster.subscribe();
        assert_eq!(broadcaster.subscriber_count(), 1);
        drop(rx);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
