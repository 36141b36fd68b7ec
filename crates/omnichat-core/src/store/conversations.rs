//! Reactive conversation/message store.
//!
//! In-memory state is the single source of truth for the UI and is always
//! the first writer: push events and API results mutate it here, and every
//! authoritative change is written through to the entity cache so it
//! survives going offline. The cache is read only on cold start or while
//! the monitor reports a disconnected state, and a cache failure degrades
//! to an empty result.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::api::ApiClient;
use crate::cache::EntityCache;
use crate::connectivity::ConnectivityMonitor;
use crate::constants::CACHE_PAGE_SIZE;
use crate::error::ApiError;
use crate::models::{Conversation, Message};

#[derive(Default)]
struct Inner {
    conversations: Vec<Conversation>,
    messages_by_conversation: HashMap<String, Vec<Message>>,
}

pub struct ConversationStore {
    api: Arc<ApiClient>,
    cache: EntityCache,
    monitor: Arc<ConnectivityMonitor>,
    inner: RwLock<Inner>,
}

impl ConversationStore {
    pub fn new(api: Arc<ApiClient>, cache: EntityCache, monitor: Arc<ConnectivityMonitor>) -> Self {
        let store = Self {
            api,
            cache,
            monitor,
            inner: RwLock::new(Inner::default()),
        };
        store.load_from_cache();
        store
    }

    /// Cold-start fill from the cache. Never fails; a broken cache means an
    /// empty list until the network answers.
    fn load_from_cache(&self) {
        match self.cache.conversations_page(CACHE_PAGE_SIZE, 0) {
            Ok(conversations) => {
                self.inner.write().conversations = conversations;
            }
            Err(e) => warn!("conversation cache read failed: {e}"),
        }
    }

    /// Fetch the authoritative list. Offline, this serves the cache; a
    /// network failure leaves previously loaded state intact and reports a
    /// per-operation error.
    pub async fn load(&self) -> Result<Vec<Conversation>, ApiError> {
        if self.monitor.current().connectivity.use_cache() {
            self.load_from_cache();
            return Ok(self.conversations());
        }
        let conversations = self.api.list_conversations().await?;
        {
            let mut inner = self.inner.write();
            inner.conversations = conversations.clone();
            Self::sort_conversations(&mut inner.conversations);
        }
        if let Err(e) = self.cache.upsert_conversations(&conversations) {
            warn!("conversation write-through failed: {e}");
        }
        Ok(self.conversations())
    }

    /// Load one conversation's messages, cache-first when offline.
    pub async fn open(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        if self.monitor.current().connectivity.use_cache() {
            let messages = self
                .cache
                .messages_page(conversation_id, CACHE_PAGE_SIZE, 0)
                .unwrap_or_else(|e| {
                    warn!("message cache read failed: {e}");
                    Vec::new()
                });
            self.inner
                .write()
                .messages_by_conversation
                .insert(conversation_id.to_string(), messages.clone());
            return Ok(messages);
        }
        let messages = self.api.list_messages(conversation_id).await?;
        self.inner
            .write()
            .messages_by_conversation
            .insert(conversation_id.to_string(), messages.clone());
        if let Err(e) = self.cache.upsert_messages(&messages) {
            warn!("message write-through failed: {e}");
        }
        Ok(messages)
    }

    pub async fn create(&self, title: &str, model_id: &str) -> Result<Conversation, ApiError> {
        let conversation = self.api.create_conversation(title, model_id).await?;
        self.apply_conversation(conversation.clone());
        Ok(conversation)
    }

    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Message, ApiError> {
        let message = self.api.send_message(conversation_id, content).await?;
        self.apply_message(message.clone());
        Ok(message)
    }

    pub async fn delete(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.api.delete_conversation(conversation_id).await?;
        self.remove_conversation(conversation_id);
        Ok(())
    }

    /// One catch-up fetch after a reconnect edge. Failures are absorbed;
    /// the next edge or explicit load retries.
    pub async fn refresh(&self) {
        if let Err(e) = self.load().await {
            warn!("conversation catch-up fetch failed: {e}");
        }
    }

    // --- mutation methods driven by the realtime router -------------------

    pub fn apply_conversation(&self, conversation: Conversation) {
        {
            let mut inner = self.inner.write();
            match inner
                .conversations
                .iter_mut()
                .find(|c| c.id == conversation.id)
            {
                Some(existing) => *existing = conversation.clone(),
                None => inner.conversations.push(conversation.clone()),
            }
            Self::sort_conversations(&mut inner.conversations);
        }
        if let Err(e) = self.cache.upsert_conversations(&[conversation]) {
            warn!("conversation write-through failed: {e}");
        }
    }

    pub fn remove_conversation(&self, id: &str) {
        {
            let mut inner = self.inner.write();
            inner.conversations.retain(|c| c.id != id);
            inner.messages_by_conversation.remove(id);
        }
        if let Err(e) = self.cache.delete_conversation(id) {
            warn!("conversation delete write-through failed: {e}");
        }
    }

    pub fn apply_message(&self, message: Message) {
        {
            let mut inner = self.inner.write();
            let messages = inner
                .messages_by_conversation
                .entry(message.conversation_id.clone())
                .or_default();
            match messages.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => *existing = message.clone(),
                None => messages.push(message.clone()),
            }
            messages.sort_by_key(|m| m.seq);
        }
        if let Err(e) = self.cache.upsert_messages(&[message]) {
            warn!("message write-through failed: {e}");
        }
    }

    pub fn remove_message(&self, id: &str, conversation_id: &str) {
        {
            let mut inner = self.inner.write();
            if let Some(messages) = inner.messages_by_conversation.get_mut(conversation_id) {
                messages.retain(|m| m.id != id);
            }
        }
        if let Err(e) = self.cache.delete_message(id) {
            warn!("message delete write-through failed: {e}");
        }
    }

    // --- getters ----------------------------------------------------------

    pub fn conversations(&self) -> Vec<Conversation> {
        self.inner.read().conversations.clone()
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.inner
            .read()
            .messages_by_conversation
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    fn sort_conversations(conversations: &mut [Conversation]) {
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    }
}
