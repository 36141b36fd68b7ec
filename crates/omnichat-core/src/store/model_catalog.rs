//! Catalog of models offered across providers.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::api::ApiClient;
use crate::cache::EntityCache;
use crate::connectivity::ConnectivityMonitor;
use crate::error::ApiError;
use crate::models::AiModel;

pub struct ModelCatalogStore {
    api: Arc<ApiClient>,
    cache: EntityCache,
    monitor: Arc<ConnectivityMonitor>,
    models: RwLock<Vec<AiModel>>,
}

impl ModelCatalogStore {
    pub fn new(api: Arc<ApiClient>, cache: EntityCache, monitor: Arc<ConnectivityMonitor>) -> Self {
        let models = cache.models().unwrap_or_else(|e| {
            warn!("model cache read failed: {e}");
            Vec::new()
        });
        Self {
            api,
            cache,
            monitor,
            models: RwLock::new(models),
        }
    }

    pub async fn load(&self) -> Result<Vec<AiModel>, ApiError> {
        if self.monitor.current().connectivity.use_cache() {
            return Ok(self.models());
        }
        let models = self.api.list_models().await?;
        *self.models.write() = models.clone();
        if let Err(e) = self.cache.upsert_models(&models) {
            warn!("model write-through failed: {e}");
        }
        Ok(models)
    }

    pub async fn refresh(&self) {
        if let Err(e) = self.load().await {
            warn!("model catch-up fetch failed: {e}");
        }
    }

    /// Router mutation: a single model changed availability or metadata.
    pub fn apply_model(&self, model: AiModel) {
        {
            let mut models = self.models.write();
            match models.iter_mut().find(|m| m.id == model.id) {
                Some(existing) => *existing = model.clone(),
                None => models.push(model.clone()),
            }
        }
        if let Err(e) = self.cache.upsert_models(&[model]) {
            warn!("model write-through failed: {e}");
        }
    }

    pub fn models(&self) -> Vec<AiModel> {
        self.models.read().clone()
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

    fn setup(transport: Arc<RecordingTransport>) -> (ModelCatalogStore, EntityCache) {
        let cache = EntityCache::new(Database::in_memory().unwrap().connection());
        let coordinator = Arc::new(TokenCoordinator::new(
            transport,
            Arc::new(MemoryCredentialStore::with_tokens("at-ok", "rt-ok")),
            SessionBroadcaster::new(),
        ));
        let store = ModelCatalogStore::new(
            Arc::new(ApiClient::new(coordinator)),
            cache.clone(),
            Arc::new(ConnectivityMonitor::new()),
        );
        (store, cache)
    }

    #[tokio::test]
    async fn load_and_apply_update() {
        let transport = Arc::new(RecordingTransport::new("at-ok", "rt-ok"));
        transport.respond_with(
            "/models",
            json!([{
                "id": "gpt-x", "provider": "openai", "name": "GPT X",
                "context_window": 128000, "available": true
            }]),
        );
        let (store, cache) = setup(transport);

        let models = store.load().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(cache.models().unwrap().len(), 1);

        store.apply_model(AiModel {
            id: "gpt-x".into(),
            provider: "openai".into(),
            name: "GPT X".into(),
            context_window: Some(128_000),
            available: false,
        });
        assert!(!store.models()[0].available);
        assert!(!cache.models().unwrap()[0].available);
    }
}
