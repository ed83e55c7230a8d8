use tokio::sync::broadcast;
use tracing::trace;

use super::ProgressEvent;

/// Fan-out transport for progress events.
pub trait NotificationChannel: Send + Sync {
    fn publish(&self, topic: &str, event: &ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct TopicMessage {
    pub topic: String,
    pub event: ProgressEvent,
}

/// In-process channel backed by a tokio broadcast queue.
///
/// Slow subscribers lag and lose the oldest messages rather than blocking
/// publishers.
pub struct BroadcastChannel {
    sender: broadcast::Sender<TopicMessage>,
}

impl BroadcastChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TopicMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastChannel {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl NotificationChannel for BroadcastChannel {
    fn publish(&self, topic: &str, event: &ProgressEvent) {
        let message = TopicMessage {
            topic: topic.to_string(),
            event: event.clone(),
        };
        // No subscribers is not an error.
        if self.sender.send(message).is_err() {
            trace!("No subscribers for {}", topic);
        }
    }
}
