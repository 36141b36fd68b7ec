use serde::{Deserialize, Serialize};

/// A chat conversation. Sorted most-recent-first everywhere it is listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    /// Model the conversation is currently pinned to.
    pub model_id: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A single message inside a conversation.
///
/// `seq` is the server-assigned per-conversation ordinal; the cache and the
/// stores order by it rather than by timestamp so that reordering-free
/// replay after reconnect is cheap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub seq: i64,
    pub created_at: i64,
    /// Model that produced this message, for assistant turns.
    #[serde(default)]
    pub model_id: Option<String>,
}

/// An AI model offered by one of the upstream providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiModel {
    pub id: String,
    pub provider: String,
    pub name: String,
    #[serde(default)]
    pub context_window: Option<u32>,
    #[serde(default)]
    pub available: bool,
}

/// Metadata about a stored provider credential. The secret itself never
/// leaves the server; the client only renders label and provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub provider: String,
    pub label: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}
