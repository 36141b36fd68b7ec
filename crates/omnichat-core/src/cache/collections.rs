//! Typed collections over the cache database.
//!
//! Every upsert is idempotent (re-inserting an id overwrites), every read
//! is ordered by the collection's sort key and paginated. Callers in the
//! store layer absorb errors and degrade to empty results; nothing here
//! panics on a missing or broken database.

use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection};

use crate::error::ApiError;
use crate::models::{AiModel, ApiKey, Conversation, Message, MessageRole};

#[derive(Clone)]
pub struct EntityCache {
    conn: Arc<Mutex<Connection>>,
}

fn role_to_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    }
}

fn role_from_str(s: &str) -> MessageRole {
    match s {
        "assistant" => MessageRole::Assistant,
        "system" => MessageRole::System,
        _ => MessageRole::User,
    }
}

impl EntityCache {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ApiError> {
        self.conn
            .lock()
            .map_err(|_| ApiError::CacheUnavailable("connection poisoned".into()))
    }

    // --- conversations ---------------------------------------------------

    pub fn upsert_conversations(&self, items: &[Conversation]) -> Result<usize, ApiError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(ApiError::from)?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO conversations
                 (id, title, model_id, created_at, updated_at, archived)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for item in items {
                stmt.execute(params![
                    item.id,
                    item.title,
                    item.model_id,
                    item.created_at,
                    item.updated_at,
                    item.archived as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(items.len())
    }

    /// Most-recent-first page of conversations.
    pub fn conversations_page(&self, limit: u32, offset: u32) -> Result<Vec<Conversation>, ApiError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, model_id, created_at, updated_at, archived
             FROM conversations ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit, offset], |row| {
            Ok(Conversation {
                id: row.get(0)?,
                title: row.get(1)?,
                model_id: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
                archived: row.get::<_, i64>(5)? != 0,
            })
        })?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    pub fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        conn.execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])?;
        Ok(())
    }

    // --- messages --------------------------------------------------------

    pub fn upsert_messages(&self, items: &[Message]) -> Result<usize, ApiError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(ApiError::from)?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO messages
                 (id, conversation_id, role, content, seq, created_at, model_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for item in items {
                stmt.execute(params![
                    item.id,
                    item.conversation_id,
                    role_to_str(item.role),
                    item.content,
                    item.seq,
                    item.created_at,
                    item.model_id,
                ])?;
            }
        }
        tx.commit()?;
        Ok(items.len())
    }

    /// Messages for one conversation, sequence-ascending.
    pub fn messages_page(
        &self,
        conversation_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>, ApiError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, seq, created_at, model_id
             FROM messages WHERE conversation_id = ?1
             ORDER BY seq ASC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![conversation_id, limit, offset], |row| {
            Ok(Message {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                role: role_from_str(&row.get::<_, String>(2)?),
                content: row.get(3)?,
                seq: row.get(4)?,
                created_at: row.get(5)?,
                model_id: row.get(6)?,
            })
        })?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    pub fn delete_message(&self, id: &str) -> Result<(), ApiError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        Ok(())
    }

    // --- models ----------------------------------------------------------

    pub fn upsert_models(&self, items: &[AiModel]) -> Result<usize, ApiError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(ApiError::from)?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO models
                 (id, provider, name, context_window, available)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for item in items {
                stmt.execute(params![
                    item.id,
                    item.provider,
                    item.name,
                    item.context_window,
                    item.available as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(items.len())
    }

    pub fn models(&self) -> Result<Vec<AiModel>, ApiError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, provider, name, context_window, available
             FROM models ORDER BY provider, name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(AiModel {
                id: row.get(0)?,
                provider: row.get(1)?,
                name: row.get(2)?,
                context_window: row.get(3)?,
                available: row.get::<_, i64>(4)? != 0,
            })
        })?;
        Ok(rows.filter_map(Result::ok).collect())
    }

    // --- api keys --------------------------------------------------------

    pub fn upsert_api_keys(&self, items: &[ApiKey]) -> Result<usize, ApiError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(ApiError::from)?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO api_keys (id, provider, label, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for item in items {
                stmt.execute(params![item.id, item.provider, item.label, item.created_at])?;
            }
        }
        tx.commit()?;
        Ok(items.len())
    }

    pub fn api_keys(&self, provider: Option<&str>) -> Result<Vec<ApiKey>, ApiError> {
        let conn = self.lock()?;
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(ApiKey {
                id: row.get(0)?,
                provider: row.get(1)?,
                label: row.get(2)?,
                created_at: row.get(3)?,
            })
        };
        let rows = match provider {
            Some(provider) => {
                let mut stmt = conn.prepare(
                    "SELECT id, provider, label, created_at FROM api_keys
                     WHERE provider = ?1 ORDER BY created_at DESC",
                )?;
                let rows = stmt.query_map(params![provider], map_row)?;
                rows.filter_map(Result::ok).collect()
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, provider, label, created_at FROM api_keys
                     ORDER BY created_at DESC",
                )?;
                let rows = stmt.query_map([], map_row)?;
                rows.filter_map(Result::ok).collect()
            }
        };
        Ok(rows)
    }

    // --- kv (user record, preference blob, sync stamp) -------------------

    pub fn kv_put(&self, key: &str, value: &str) -> Result<(), ApiError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn kv_get(&self, key: &str) -> Result<Option<String>, ApiError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let mut rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Full data purge.
    pub fn clear_all(&self) -> Result<(), ApiError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "DELETE FROM conversations;
             DELETE FROM messages;
             DELETE FROM models;
             DELETE FROM api_keys;
             DELETE FROM kv;",
        )?;
        Ok(())
    }
}
