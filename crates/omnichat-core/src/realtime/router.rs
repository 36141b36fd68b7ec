//! Fan-out of push events into the stores.
//!
//! Exactly one router per client instance consumes the realtime channel's
//! event stream, so every store mutation driven by a push happens on one
//! path and in arrival order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::realtime::events::ServerEvent;
use crate::store::{
    ApiKeyStore, ConversationStore, ModelCatalogStore, PreferenceStore, SessionStore,
};

pub struct EventRouter {
    pub conversations: Arc<ConversationStore>,
    pub models: Arc<ModelCatalogStore>,
    pub api_keys: Arc<ApiKeyStore>,
    pub preferences: Arc<PreferenceStore>,
    pub session: Arc<SessionStore>,
}

impl EventRouter {
    pub fn dispatch(&self, event: ServerEvent) {
        debug!(?event, "dispatching push event");
        match event {
            ServerEvent::ConversationCreated(c) | ServerEvent::ConversationUpdated(c) => {
                self.conversations.apply_conversation(c);
            }
            ServerEvent::ConversationDeleted { id } => {
                self.conversations.remove_conversation(&id);
            }
            ServerEvent::MessageCreated(m) | ServerEvent::MessageUpdated(m) => {
                self.conversations.apply_message(m);
            }
            ServerEvent::MessageDeleted {
                id,
                conversation_id,
            } => {
                self.conversations.remove_message(&id, &conversation_id);
            }
            ServerEvent::ModelUpdated(m) => {
                self.models.apply_model(m);
            }
            ServerEvent::PreferenceUpdated { values } => {
                self.preferences.apply_server_update(values);
            }
            ServerEvent::SessionRevoked => {
                info!("session revoked by server");
                self.session.handle_remote_logout();
            }
        }
    }

    /// Consume the channel's event stream until it closes.
    pub async fn run(self, mut events: mpsc::Receiver<ServerEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event);
        }
        debug!("event stream closed; router stopping");
    }
}
