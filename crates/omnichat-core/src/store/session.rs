//! Session state and the login/logout action surface.
//!
//! The UI reads `is_authenticated` and the cached user record from here and
//! never touches storage, the cache, or the realtime channel directly.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::ApiTransport;
use crate::auth::coordinator::SessionEpoch;
use crate::auth::{CredentialStore, TokenCoordinator, TokenPair};
use crate::cache::EntityCache;
use crate::constants::storage_keys;
use crate::error::ApiError;
use crate::models::User;

pub struct SessionStore {
    transport: Arc<dyn ApiTransport>,
    credentials: Arc<dyn CredentialStore>,
    coordinator: Arc<TokenCoordinator>,
    cache: EntityCache,
    user: RwLock<Option<User>>,
}

impl SessionStore {
    /// Cold start: authenticated iff a credential pair survives in the
    /// store; the user record comes from the cache so the UI can render
    /// before any network round trip.
    pub fn new(
        transport: Arc<dyn ApiTransport>,
        credentials: Arc<dyn CredentialStore>,
        coordinator: Arc<TokenCoordinator>,
        cache: EntityCache,
    ) -> Self {
        let user = match cache.kv_get(storage_keys::CACHED_USER) {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("cached user unavailable: {e}");
                None
            }
        };
        Self {
            transport,
            credentials,
            coordinator,
            cache,
            user: RwLock::new(user),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.coordinator.subscribe_epoch().borrow().authenticated
    }

    /// Watch channel for the global authenticated/unauthenticated signal.
    pub fn watch_session(&self) -> watch::Receiver<SessionEpoch> {
        self.coordinator.subscribe_epoch()
    }

    pub fn user(&self) -> Option<User> {
        self.user.read().clone()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let response = self.transport.login(email, password).await?;
        self.coordinator.install_tokens(&TokenPair {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
        });
        if let Some(decrypt_key) = &response.decrypt_key {
            if let Err(e) = self.credentials.set_decrypt_key(decrypt_key) {
                warn!("failed to persist decrypt key: {e}");
            }
        }
        if let Ok(raw) = serde_json::to_string(&response.user) {
            if let Err(e) = self.cache.kv_put(storage_keys::CACHED_USER, &raw) {
                warn!("failed to cache user record: {e}");
            }
        }
        *self.user.write() = Some(response.user.clone());
        info!(user = %response.user.id, "logged in");
        Ok(response.user)
    }

    /// Local logout: purge credentials, announce to sibling instances, and
    /// clear the whole entity cache.
    pub fn logout(&self) {
        self.coordinator.logout();
        *self.user.write() = None;
        if let Err(e) = self.cache.clear_all() {
            warn!("cache purge on logout failed: {e}");
        }
        info!("logged out");
    }

    /// A logout that arrived from elsewhere (broadcast, or a server-pushed
    /// revocation). Clears credentials and in-memory session only; the
    /// initiating side owns the cache purge. Idempotent.
    pub fn handle_remote_logout(&self) {
        self.coordinator.adopt_logout();
        *self.user.write() = None;
    }

    /// Tokens renewed by a sibling instance. Last write wins; an echo of a
    /// pair we already hold is dropped so the realtime channel does not
    /// re-dial for nothing.
    pub fn handle_remote_token_update(&self, access_token: &str, refresh_token: &str) {
        if let Some(current) = self.credentials.tokens() {
            if current.access_token == access_token && current.refresh_token == refresh_token {
                return;
            }
        }
        self.coordinator.adopt_tokens(&TokenPair {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
        });
    }
}
