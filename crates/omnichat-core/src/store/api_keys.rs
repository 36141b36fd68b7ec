//! Provider credential metadata (label and provider only; secrets stay
//! server-side).

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::api::ApiClient;
use crate::cache::EntityCache;
use crate::connectivity::ConnectivityMonitor;
use crate::error::ApiError;
use crate::models::ApiKey;

pub struct ApiKeyStore {
    api: Arc<ApiClient>,
    cache: EntityCache,
    monitor: Arc<ConnectivityMonitor>,
    keys: RwLock<Vec<ApiKey>>,
}

impl ApiKeyStore {
    pub fn new(api: Arc<ApiClient>, cache: EntityCache, monitor: Arc<ConnectivityMonitor>) -> Self {
        let keys = cache.api_keys(None).unwrap_or_else(|e| {
            warn!("api key cache read failed: {e}");
            Vec::new()
        });
        Self {
            api,
            cache,
            monitor,
            keys: RwLock::new(keys),
        }
    }

    pub async fn load(&self) -> Result<Vec<ApiKey>, ApiError> {
        if self.monitor.current().connectivity.use_cache() {
            return Ok(self.keys());
        }
        let keys = self.api.list_api_keys().await?;
        *self.keys.write() = keys.clone();
        if let Err(e) = self.cache.upsert_api_keys(&keys) {
            warn!("api key write-through failed: {e}");
        }
        Ok(keys)
    }

    pub async fn refresh(&self) {
        if let Err(e) = self.load().await {
            warn!("api key catch-up fetch failed: {e}");
        }
    }

    pub fn keys(&self) -> Vec<ApiKey> {
        self.keys.read().clone()
    }

    pub fn keys_for_provider(&self, provider: &str) -> Vec<ApiKey> {
        self.keys
            .read()
            .iter()
            .filter(|k| k.provider == provider)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryCredentialStore, TokenCoordinator};
    use crate::broadcast::SessionBroadcaster;
    use crate::cache::Database;
    use crate::testing::RecordingTransport;
    use serde_json::json;

    #[tokio::test]
    async fn load_then_filter_by_provider() {
        let transport = Arc::new(RecordingTransport::new("at-ok", "rt-ok"));
        transport.respond_with(
            "/keys",
            json!([
                { "id": "k1", "provider": "openai", "label": "work", "created_at": 1 },
                { "id": "k2", "provider": "anthropic", "label": "home", "created_at": 2 }
            ]),
        );
        let cache = EntityCache::new(Database::in_memory().unwrap().connection());
        let coordinator = Arc::new(TokenCoordinator::new(
            transport,
            Arc::new(MemoryCredentialStore::with_tokens("at-ok", "rt-ok")),
            SessionBroadcaster::new(),
        ));
        let store = ApiKeyStore::new(
            Arc::new(ApiClient::new(coordinator)),
            cache,
            Arc::new(ConnectivityMonitor::new()),
        );

        assert_eq!(store.load().await.unwrap().len(), 2);
        let anthropic = store.keys_for_provider("anthropic");
        assert_eq!(anthropic.len(), 1);
        assert_eq!(anthropic[0].id, "k2");
    }
}
