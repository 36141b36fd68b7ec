//! Best-effort session fan-out between sibling client instances ("tabs").
//!
//! Delivery is fire-and-forget: no ordering or delivery guarantee beyond
//! what the underlying channel provides, so consumers must treat repeated
//! or stale messages idempotently. A `disconnected()` broadcaster degrades
//! to single-instance operation without raising an error; cross-instance
//! consistency is an enhancement, not a correctness requirement.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionMessage {
    TokenUpdate {
        access_token: String,
        refresh_token: String,
        /// Unix millis; lets consumers drop stale updates.
        timestamp: i64,
    },
    Logout {
        timestamp: i64,
    },
}

impl SessionMessage {
    pub fn token_update(access_token: &str, refresh_token: &str) -> Self {
        SessionMessage::TokenUpdate {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn logout() -> Self {
        SessionMessage::Logout {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Clonable handle to the shared channel. Two runtimes constructed with
/// clones of the same broadcaster behave like two tabs of one origin.
#[derive(Clone)]
pub struct SessionBroadcaster {
    tx: broadcast::Sender<SessionMessage>,
    enabled: bool,
}

impl SessionBroadcaster {
    /// A live channel shared by every clone.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, enabled: true }
    }

    /// Local-only fallback for hosts without an inter-process primitive.
    /// Publishing is silently dropped; subscribers never fire.
    pub fn disconnected() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx, enabled: false }
    }

    /// Fire-and-forget publish. A send with no listeners is fine.
    pub fn publish(&self, message: SessionMessage) {
        if !self.enabled {
            return;
        }
        if self.tx.send(message).is_err() {
            tracing::debug!("session broadcast dropped: no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionMessage> {
        self.tx.subscribe()
    }
}

impl Default for SessionBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
