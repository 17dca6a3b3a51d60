//! Notifications published by the coordinator.
//!
//! Subscribers receive them asynchronously over a broadcast channel; a slow
//! subscriber lags and drops old notifications rather than stalling playback.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::primitives::{FilteredPrompt, PlaybackState};

const NOTIFICATION_CAPACITY: usize = 256;

/// Message shown when the backend connection is lost.
pub const CONNECTION_ERROR_MESSAGE: &str = "Connection error, please restart audio.";

/// Message shown when a push would leave the generator with nothing to follow.
pub const NO_ACTIVE_PROMPTS_MESSAGE: &str = "There needs to be one active prompt to play.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    PlaybackStateChanged { state: PlaybackState },
    PromptFiltered { prompt: FilteredPrompt },
    Error { message: String },
}

#[derive(Debug, Clone)]
pub struct NotificationHub {
    tx: broadcast::Sender<Notification>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn publish(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            debug!("notification dropped, no subscribers");
        }
    }

    pub fn error(&self, message: impl Into<String>) {
        self.publish(Notification::Error {
            message: message.into(),
        });
    }
}
