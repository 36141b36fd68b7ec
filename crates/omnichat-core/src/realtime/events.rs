//! Typed push events.
//!
//! The server frames every push as `{"type": "<entity>.<verb>", "data": ...}`.
//! Unknown types are skipped by the channel, not errors, so the server can
//! ship new event kinds before clients learn them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{AiModel, Conversation, Message, PreferenceValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "conversation.created")]
    ConversationCreated(Conversation),
    #[serde(rename = "conversation.updated")]
    ConversationUpdated(Conversation),
    #[serde(rename = "conversation.deleted")]
    ConversationDeleted { id: String },

    #[serde(rename = "message.created")]
    MessageCreated(Message),
    #[serde(rename = "message.updated")]
    MessageUpdated(Message),
    #[serde(rename = "message.deleted")]
    MessageDeleted { id: String, conversation_id: String },

    #[serde(rename = "model.updated")]
    ModelUpdated(AiModel),

    #[serde(rename = "preference.updated")]
    PreferenceUpdated {
        values: BTreeMap<String, PreferenceValue>,
    },

    /// Server revoked the session remotely; equivalent to a forced logout.
    #[serde(rename = "session.revoked")]
    SessionRevoked,
}

impl ServerEvent {
    /// Parse one wire frame. `None` for unknown or malformed frames.
    pub fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!("skipping unparseable push frame: {e}");
                None
            }
        }
    }
}
