pub mod entities;
pub mod preferences;

pub use entities::{AiModel, ApiKey, Conversation, Message, MessageRole, User};
pub use preferences::{merge_layers, PreferenceLayers, PreferenceValue};
