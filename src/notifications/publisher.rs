use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use super::{movie_topic, NotificationChannel, ProgressEvent, DOWNLOADS_TOPIC};
use crate::download_manager::DownloadStatus;

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(250);

struct MovieThrottle {
    at: Instant,
    status: DownloadStatus,
    pending: Option<ProgressEvent>,
    flush_at: Option<Instant>,
}

type ThrottleMap = Arc<Mutex<HashMap<String, MovieThrottle>>>;

/// Throttles progress ticks per movie and forwards events to a channel.
///
/// A tick with the same status as the previous event for that movie is held
/// back if it arrives within `min_interval` of it. Held ticks are coalesced
/// to the latest value, which is flushed once the interval has elapsed.
/// Status changes and terminal statuses are always forwarded immediately and
/// supersede any held tick.
pub struct ProgressPublisher {
    channel: Arc<dyn NotificationChannel>,
    min_interval: Duration,
    throttles: ThrottleMap,
}

impl ProgressPublisher {
    pub fn new(channel: Arc<dyn NotificationChannel>, min_interval: Duration) -> Self {
        Self {
            channel,
            min_interval,
            throttles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns whether the event was forwarded right away.
    ///
    /// Must be called from within a tokio runtime when throttling is enabled.
    pub fn publish(&self, event: &ProgressEvent) -> bool {
        let now = Instant::now();
        let mut throttles = self.throttles.lock().unwrap();

        if event.status.is_terminal() {
            throttles.remove(&event.movie_id);
        } else {
            if let Some(throttle) = throttles.get_mut(&event.movie_id) {
                if throttle.status == event.status
                    && now.duration_since(throttle.at) < self.min_interval
                {
                    throttle.pending = Some(event.clone());
                    if throttle.flush_at.is_none() {
                        let deadline = throttle.at + self.min_interval;
                        throttle.flush_at = Some(deadline);
                        self.schedule_flush(event.movie_id.clone(), deadline);
                    }
                    return false;
                }
            }
            throttles.insert(
                event.movie_id.clone(),
                MovieThrottle {
                    at: now,
                    status: event.status,
                    pending: None,
                    flush_at: None,
                },
            );
        }

        // Sent under the lock so a concurrent flush cannot reorder events.
        forward(self.channel.as_ref(), event);
        true
    }

    fn schedule_flush(&self, movie_id: String, deadline: Instant) {
        let channel = self.channel.clone();
        let throttles = self.throttles.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let mut throttles = throttles.lock().unwrap();
            let Some(throttle) = throttles.get_mut(&movie_id) else {
                return;
            };
            if throttle.flush_at != Some(deadline) {
                return;
            }
            throttle.flush_at = None;
            if let Some(event) = throttle.pending.take() {
                throttle.at = Instant::now();
                forward(channel.as_ref(), &event);
            }
        });
    }

    /// Number of movies with throttle state, i.e. with a non-terminal event
    /// published last.
    pub fn tracked_movies(&self) -> usize {
        self.throttles.lock().unwrap().len()
    }
}

fn forward(channel: &dyn NotificationChannel, event: &ProgressEvent) {
    channel.publish(&movie_topic(&event.movie_id), event);
    channel.publish(DOWNLOADS_TOPIC, event);
}
