//! Client runtime: wires the transport, coordinator, cache, stores, and
//! realtime plumbing into one handle a host embeds.
//!
//! One runtime per client instance ("tab"). Instances that should behave
//! like tabs of the same origin are built with clones of one
//! [`SessionBroadcaster`]; the default is a disconnected broadcaster, which
//! degrades to single-instance operation.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::{ApiClient, ApiTransport, HttpTransport};
use crate::auth::{CredentialStore, KeyringCredentialStore, TokenCoordinator};
use crate::broadcast::{SessionBroadcaster, SessionMessage};
use crate::cache::{Database, EntityCache};
use crate::config::CoreConfig;
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::models::PreferenceValue;
use crate::realtime::{EventRouter, RealtimeChannel};
use crate::store::{
    ApiKeyStore, ConversationStore, ModelCatalogStore, PreferenceStore, SessionStore,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct RuntimeBuilder {
    config: CoreConfig,
    transport: Option<Arc<dyn ApiTransport>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    broadcaster: SessionBroadcaster,
    preference_defaults: BTreeMap<String, PreferenceValue>,
    in_memory_cache: bool,
}

impl RuntimeBuilder {
    /// Swap the wire transport, e.g. for a scripted server in tests.
    pub fn transport(mut self, transport: Arc<dyn ApiTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Swap credential storage for hosts without an OS keychain.
    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Share a session channel with sibling instances.
    pub fn broadcaster(mut self, broadcaster: SessionBroadcaster) -> Self {
        self.broadcaster = broadcaster;
        self
    }

    pub fn preference_defaults(mut self, defaults: BTreeMap<String, PreferenceValue>) -> Self {
        self.preference_defaults = defaults;
        self
    }

    /// Back the entity cache with an in-memory database.
    pub fn in_memory_cache(mut self) -> Self {
        self.in_memory_cache = true;
        self
    }

    /// Assemble the runtime and spawn its background tasks. Must be called
    /// inside a tokio runtime.
    pub fn build(self) -> Result<CoreRuntime> {
        let db = if self.in_memory_cache {
            Database::in_memory()?
        } else {
            std::fs::create_dir_all(&self.config.data_dir).with_context(|| {
                format!("creating data directory {}", self.config.data_dir.display())
            })?;
            Database::new(self.config.data_dir.join("cache.db"))?
        };
        let cache = EntityCache::new(db.connection());

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new(self.config.api_base.clone())));
        let credentials: Arc<dyn CredentialStore> = self
            .credentials
            .unwrap_or_else(|| Arc::new(KeyringCredentialStore::new()));

        let monitor = Arc::new(ConnectivityMonitor::new());
        let coordinator = Arc::new(TokenCoordinator::new(
            transport.clone(),
            credentials.clone(),
            self.broadcaster.clone(),
        ));
        let api = Arc::new(ApiClient::new(coordinator.clone()));

        let session = Arc::new(SessionStore::new(
            transport,
            credentials.clone(),
            coordinator.clone(),
            cache.clone(),
        ));
        let conversations = Arc::new(ConversationStore::new(
            api.clone(),
            cache.clone(),
            monitor.clone(),
        ));
        let models = Arc::new(ModelCatalogStore::new(
            api.clone(),
            cache.clone(),
            monitor.clone(),
        ));
        let api_keys = Arc::new(ApiKeyStore::new(api.clone(), cache.clone(), monitor.clone()));
        let preferences = Arc::new(PreferenceStore::new(
            api.clone(),
            cache,
            self.preference_defaults,
        ));

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let channel = RealtimeChannel::new(
            self.config.realtime_url.clone(),
            credentials,
            monitor.clone(),
            coordinator.subscribe_epoch(),
            event_tx,
        );
        let router = EventRouter {
            conversations: conversations.clone(),
            models: models.clone(),
            api_keys: api_keys.clone(),
            preferences: preferences.clone(),
            session: session.clone(),
        };

        let mut tasks = vec![
            tokio::spawn(channel.run()),
            tokio::spawn(router.run(event_rx)),
        ];
        tasks.push(spawn_broadcast_listener(
            self.broadcaster.clone(),
            session.clone(),
        ));
        tasks.push(spawn_catchup_task(
            monitor.clone(),
            conversations.clone(),
            models.clone(),
            api_keys.clone(),
            preferences.clone(),
        ));
        info!("client runtime started");

        Ok(CoreRuntime {
            config: self.config,
            api,
            coordinator,
            monitor,
            broadcaster: self.broadcaster,
            session,
            conversations,
            models,
            api_keys,
            preferences,
            tasks,
        })
    }
}

/// React to session messages from sibling instances. Echoes of our own
/// publishes are harmless: token adoption drops identical pairs and remote
/// logout is idempotent.
fn spawn_broadcast_listener(
    broadcaster: SessionBroadcaster,
    session: Arc<SessionStore>,
) -> JoinHandle<()> {
    let mut rx = broadcaster.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(SessionMessage::TokenUpdate {
                    access_token,
                    refresh_token,
                    ..
                }) => {
                    session.handle_remote_token_update(&access_token, &refresh_token);
                }
                Ok(SessionMessage::Logout { .. }) => {
                    session.handle_remote_logout();
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "session broadcast receiver lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

/// One catch-up fetch per store on every edge into `Connected`. Steady
/// state between edges is carried by push events, not polling.
fn spawn_catchup_task(
    monitor: Arc<ConnectivityMonitor>,
    conversations: Arc<ConversationStore>,
    models: Arc<ModelCatalogStore>,
    api_keys: Arc<ApiKeyStore>,
    preferences: Arc<PreferenceStore>,
) -> JoinHandle<()> {
    let mut rx = monitor.subscribe();
    tokio::spawn(async move {
        let mut previous = rx.borrow_and_update().connectivity;
        loop {
            if rx.changed().await.is_err() {
                return;
            }
            let current = rx.borrow_and_update().connectivity;
            if current == Connectivity::Connected && previous != Connectivity::Connected {
                info!("reconnected; running catch-up fetches");
                tokio::join!(
                    conversations.refresh(),
                    models.refresh(),
                    api_keys.refresh(),
                    preferences.refresh(),
                );
            }
            previous = current;
        }
    })
}

pub struct CoreRuntime {
    config: CoreConfig,
    api: Arc<ApiClient>,
    coordinator: Arc<TokenCoordinator>,
    monitor: Arc<ConnectivityMonitor>,
    broadcaster: SessionBroadcaster,
    session: Arc<SessionStore>,
    conversations: Arc<ConversationStore>,
    models: Arc<ModelCatalogStore>,
    api_keys: Arc<ApiKeyStore>,
    preferences: Arc<PreferenceStore>,
    tasks: Vec<JoinHandle<()>>,
}

impl CoreRuntime {
    pub fn builder(config: CoreConfig) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            transport: None,
            credentials: None,
            broadcaster: SessionBroadcaster::disconnected(),
            preference_defaults: BTreeMap::new(),
            in_memory_cache: false,
        }
    }

    /// Production wiring: HTTP transport, OS keychain, on-disk cache.
    pub fn new(config: CoreConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn coordinator(&self) -> &Arc<TokenCoordinator> {
        &self.coordinator
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn broadcaster(&self) -> &SessionBroadcaster {
        &self.broadcaster
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn conversations(&self) -> &Arc<ConversationStore> {
        &self.conversations
    }

    pub fn models(&self) -> &Arc<ModelCatalogStore> {
        &self.models
    }

    pub fn api_keys(&self) -> &Arc<ApiKeyStore> {
        &self.api_keys
    }

    pub fn preferences(&self) -> &Arc<PreferenceStore> {
        &self.preferences
    }

    /// Stop background tasks. Dropping the runtime without calling this
    /// leaves tasks running until their channels close.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("client runtime stopped");
    }
}

impl Drop for CoreRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;
    use crate::testing::RecordingTransport;
    use serde_json::json;

    fn test_runtime(
        transport: Arc<RecordingTransport>,
        broadcaster: SessionBroadcaster,
    ) -> CoreRuntime {
        // Port 9 (discard) refuses immediately; the channel just backs off.
        let config = CoreConfig::new("unused").with_realtime_url("ws://127.0.0.1:9");
        CoreRuntime::builder(config)
            .transport(transport)
            .credentials(Arc::new(MemoryCredentialStore::new()))
            .broadcaster(broadcaster)
            .in_memory_cache()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn logout_in_one_instance_converges_the_sibling() {
        let broadcaster = SessionBroadcaster::new();
        let transport = Arc::new(RecordingTransport::new("at", "rt"));
        let tab_a = test_runtime(transport.clone(), broadcaster.clone());
        let tab_b = test_runtime(transport, broadcaster);

        // B shares no credential store with A; it adopts via broadcast.
        let mut epoch = tab_b.session().watch_session();
        tab_a.session().login("me@example.com", "pw").await.unwrap();
        epoch.changed().await.unwrap();
        assert!(tab_b.session().is_authenticated());

        tab_a.session().logout();
        epoch.changed().await.unwrap();
        assert!(!tab_b.session().is_authenticated());
        assert!(!tab_a.session().is_authenticated());
    }

    #[tokio::test]
    async fn reconnect_edge_triggers_one_catchup_fetch() {
        let broadcaster = SessionBroadcaster::disconnected();
        let transport = Arc::new(RecordingTransport::new("at", "rt"));
        transport.respond_with("/conversations", json!([]));
        transport.respond_with("/models", json!([]));
        transport.respond_with("/keys", json!([]));
        transport.respond_with("/preferences", json!({ "values": {} }));
        let runtime = test_runtime(transport.clone(), broadcaster);
        runtime.session().login("me@example.com", "pw").await.unwrap();
        assert_eq!(transport.send_count(), 0, "no fetches before a connected edge");

        runtime.monitor().report_realtime(true);
        // Let the catch-up task observe the edge and run its fetches.
        let expected = ["/conversations", "/models", "/keys", "/preferences"];
        for _ in 0..100 {
            let paths = transport.sent_paths();
            if expected.iter().all(|p| paths.iter().any(|sent| sent == p)) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("catch-up fetches did not run: {:?}", transport.sent_paths());
    }
}
