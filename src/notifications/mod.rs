//! Download progress notifications.
//!
//! The orchestrator hands every progress tick and state transition to a
//! [`ProgressPublisher`], which rate-limits ticks per movie and fans events
//! out to a [`NotificationChannel`] on two topics: `downloads/{movie_id}` and
//! the combined `downloads` topic.

mod channel;
mod models;
mod publisher;

pub use channel::{BroadcastChannel, NotificationChannel, TopicMessage};
pub use models::{movie_topic, ProgressEvent, DOWNLOADS_TOPIC};
pub use publisher::ProgressPublisher;
