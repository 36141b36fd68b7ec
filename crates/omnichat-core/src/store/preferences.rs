//! Three-layer preference reconciliation.
//!
//! Layers: built-in defaults, last server-confirmed values, pending local
//! edits. The effective view overlays them pending-first. Edits coalesce
//! behind a debounce window and only the dirty subset is submitted; a
//! failed sync leaves the pending layer untouched and re-arms one more
//! window, so an isolated blip does not strand edits until the next
//! keystroke. Pending edits always win in the effective view, including
//! across a reconnect reconciliation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::api::ApiClient;
use crate::cache::EntityCache;
use crate::constants::{storage_keys, PREF_DEBOUNCE_MS};
use crate::error::ApiError;
use crate::models::{merge_layers, PreferenceLayers, PreferenceValue};

struct PrefInner {
    layers: PreferenceLayers,
    effective: BTreeMap<String, PreferenceValue>,
    dirty: BTreeSet<String>,
}

pub struct PreferenceStore {
    api: Arc<ApiClient>,
    cache: EntityCache,
    inner: RwLock<PrefInner>,
    /// Bumped on every local edit; a debounce task only fires if it still
    /// owns the latest epoch, which cancels superseded schedules.
    sync_epoch: AtomicU64,
    debounce: Duration,
}

impl PreferenceStore {
    pub fn new(
        api: Arc<ApiClient>,
        cache: EntityCache,
        defaults: BTreeMap<String, PreferenceValue>,
    ) -> Self {
        // Cold start: the last confirmed server layer survives in the cache.
        let server = match cache.kv_get(storage_keys::SERVER_PREFERENCES) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                warn!("preference cache read failed: {e}");
                BTreeMap::new()
            }
        };
        let layers = PreferenceLayers {
            defaults,
            server,
            pending: BTreeMap::new(),
        };
        let (effective, dirty) = merge_layers(&layers);
        Self {
            api,
            cache,
            inner: RwLock::new(PrefInner {
                layers,
                effective,
                dirty,
            }),
            sync_epoch: AtomicU64::new(0),
            debounce: Duration::from_millis(PREF_DEBOUNCE_MS),
        }
    }

    /// Replace the server layer wholesale. Pending edits are left alone —
    /// in particular, a key reset before it was ever submitted stays gone.
    pub fn set_server_confirmed(&self, values: BTreeMap<String, PreferenceValue>) {
        {
            let mut inner = self.inner.write();
            inner.layers.server = values;
            let (effective, dirty) = merge_layers(&inner.layers);
            inner.effective = effective;
            inner.dirty = dirty;
        }
        self.persist_server_layer();
    }

    /// Record a local edit and schedule a debounced sync. Rapid successive
    /// edits coalesce into one submission carrying the final values.
    pub fn update_local(self: &Arc<Self>, key: &str, value: PreferenceValue) {
        let any_dirty = {
            let mut inner = self.inner.write();
            inner.layers.pending.insert(key.to_string(), value);
            let (effective, dirty) = merge_layers(&inner.layers);
            inner.effective = effective;
            inner.dirty = dirty;
            !inner.dirty.is_empty()
        };
        if any_dirty {
            self.schedule_sync();
        }
    }

    /// Discard all pending edits without submitting them.
    pub fn reset_local(&self) {
        let mut inner = self.inner.write();
        inner.layers.pending.clear();
        let (effective, dirty) = merge_layers(&inner.layers);
        inner.effective = effective;
        inner.dirty = dirty;
    }

    fn schedule_sync(self: &Arc<Self>) {
        self.arm_sync_window(true);
    }

    fn arm_sync_window(self: &Arc<Self>, retry_on_failure: bool) {
        let epoch = self.sync_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let store = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(store.debounce).await;
            if store.sync_epoch.load(Ordering::SeqCst) != epoch {
                // A newer edit rescheduled the window.
                return;
            }
            if let Err(e) = store.sync().await {
                warn!("preference sync failed, pending retained: {e}");
                // One follow-up window; past that the diff waits for the
                // next edit, explicit sync, or reconnect.
                if retry_on_failure {
                    store.arm_sync_window(false);
                }
            }
        });
    }

    /// Submit the dirty subset. On success the returned canonical values
    /// become part of the server layer and the submitted keys leave the
    /// pending layer (unless edited again mid-flight).
    pub async fn sync(&self) -> Result<(), ApiError> {
        let diff: BTreeMap<String, PreferenceValue> = {
            let inner = self.inner.read();
            inner
                .dirty
                .iter()
                .filter_map(|key| {
                    inner
                        .layers
                        .pending
                        .get(key)
                        .map(|v| (key.clone(), v.clone()))
                })
                .collect()
        };
        if diff.is_empty() {
            return Ok(());
        }
        debug!(keys = diff.len(), "syncing preference diff");

        let canonical = self.api.patch_preferences(&diff).await?;

        {
            let mut inner = self.inner.write();
            for (key, value) in canonical {
                inner.layers.server.insert(key, value);
            }
            // Drop submitted keys from pending, but keep any value the user
            // changed again while the request was in flight.
            for (key, submitted) in &diff {
                if inner.layers.pending.get(key) == Some(submitted) {
                    inner.layers.pending.remove(key);
                }
            }
            let (effective, dirty) = merge_layers(&inner.layers);
            inner.effective = effective;
            inner.dirty = dirty;
        }
        self.persist_server_layer();
        if let Err(e) = self.cache.kv_put(
            storage_keys::PREFERENCES_SYNCED_AT,
            &chrono::Utc::now().timestamp().to_string(),
        ) {
            warn!("failed to record preference sync stamp: {e}");
        }
        Ok(())
    }

    /// Read-reconcile after a reconnect: adopt the freshly fetched server
    /// state if it drifted. Pending edits keep precedence in the effective
    /// view either way.
    pub async fn reconcile(&self) -> Result<(), ApiError> {
        let fetched = self.api.get_preferences().await?;
        let drifted = self.inner.read().layers.server != fetched;
        if drifted {
            self.set_server_confirmed(fetched);
        }
        Ok(())
    }

    pub async fn refresh(&self) {
        if let Err(e) = self.reconcile().await {
            warn!("preference catch-up fetch failed: {e}");
        }
    }

    /// Router mutation: the server pushed updated preference values.
    pub fn apply_server_update(&self, values: BTreeMap<String, PreferenceValue>) {
        {
            let mut inner = self.inner.write();
            for (key, value) in values {
                inner.layers.server.insert(key, value);
            }
            let (effective, dirty) = merge_layers(&inner.layers);
            inner.effective = effective;
            inner.dirty = dirty;
        }
        self.persist_server_layer();
    }

    fn persist_server_layer(&self) {
        let raw = {
            let inner = self.inner.read();
            serde_json::to_string(&inner.layers.server)
        };
        match raw {
            Ok(raw) => {
                if let Err(e) = self.cache.kv_put(storage_keys::SERVER_PREFERENCES, &raw) {
                    warn!("preference write-through failed: {e}");
                }
            }
            Err(e) => warn!("preference blob serialization failed: {e}"),
        }
    }

    // --- getters ----------------------------------------------------------

    pub fn effective(&self) -> BTreeMap<String, PreferenceValue> {
        self.inner.read().effective.clone()
    }

    pub fn get(&self, key: &str) -> Option<PreferenceValue> {
        self.inner.read().effective.get(key).cloned()
    }

    pub fn dirty_keys(&self) -> BTreeSet<String> {
        self.inner.read().dirty.clone()
    }
}
