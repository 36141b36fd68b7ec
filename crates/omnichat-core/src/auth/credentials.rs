/// Persistent storage for the session credential pair.
///
/// The keyring-backed implementation uses OS-backed secure storage:
/// - macOS/iOS: Keychain
/// - Linux: Secret Service API (gnome-keyring, KWallet, etc.)
/// - Windows: Credential Manager
///
/// Exactly one valid pair exists per profile. It is replaced atomically on
/// renewal and erased on logout; only the coordinator and the session store
/// mutate it.
use keyring::Entry;
use parking_lot::RwLock;

use crate::constants::{storage_keys, KEYRING_SERVICE};

/// Opaque credential pair, replaced as a unit on renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

pub trait CredentialStore: Send + Sync {
    /// The stored pair, or `None` when logged out.
    fn tokens(&self) -> Option<TokenPair>;

    /// Replace the pair. Both halves are written before the call returns so
    /// a renewal never leaves a mixed old/new pair behind.
    fn set_tokens(&self, pair: &TokenPair) -> Result<(), CredentialError>;

    fn decrypt_key(&self) -> Option<String>;

    fn set_decrypt_key(&self, key: &str) -> Result<(), CredentialError>;

    /// Erase everything. Erasing an already-empty store is a no-op.
    fn clear(&self) -> Result<(), CredentialError>;
}

pub struct KeyringCredentialStore;

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self
    }

    fn read(key: &str) -> Option<String> {
        let entry = Entry::new(KEYRING_SERVICE, key).ok()?;
        entry.get_password().ok()
    }

    fn write(key: &str, value: &str) -> Result<(), CredentialError> {
        let entry = Entry::new(KEYRING_SERVICE, key)?;
        entry.set_password(value)?;
        Ok(())
    }

    fn delete(key: &str) -> Result<(), CredentialError> {
        let entry = Entry::new(KEYRING_SERVICE, key)?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            // Already deleted is success
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CredentialError::Keyring(e)),
        }
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn tokens(&self) -> Option<TokenPair> {
        let access_token = Self::read(storage_keys::ACCESS_TOKEN)?;
        let refresh_token = Self::read(storage_keys::REFRESH_TOKEN)?;
        Some(TokenPair {
            access_token,
            refresh_token,
        })
    }

    fn set_tokens(&self, pair: &TokenPair) -> Result<(), CredentialError> {
        Self::write(storage_keys::ACCESS_TOKEN, &pair.access_token)?;
        Self::write(storage_keys::REFRESH_TOKEN, &pair.refresh_token)?;
        Ok(())
    }

    fn decrypt_key(&self) -> Option<String> {
        Self::read(storage_keys::DECRYPT_KEY)
    }

    fn set_decrypt_key(&self, key: &str) -> Result<(), CredentialError> {
        Self::write(storage_keys::DECRYPT_KEY, key)
    }

    fn clear(&self) -> Result<(), CredentialError> {
        Self::delete(storage_keys::ACCESS_TOKEN)?;
        Self::delete(storage_keys::REFRESH_TOKEN)?;
        Self::delete(storage_keys::DECRYPT_KEY)?;
        Ok(())
    }
}

/// In-memory store for tests and headless hosts without a keychain.
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    tokens: Option<TokenPair>,
    decrypt_key: Option<String>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(access: &str, refresh: &str) -> Self {
        let store = Self::new();
        store.inner.write().tokens = Some(TokenPair {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
        });
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn tokens(&self) -> Option<TokenPair> {
        self.inner.read().tokens.clone()
    }

    fn set_tokens(&self, pair: &TokenPair) -> Result<(), CredentialError> {
        self.inner.write().tokens = Some(pair.clone());
        Ok(())
    }

    fn decrypt_key(&self) -> Option<String> {
        self.inner.read().decrypt_key.clone()
    }

    fn set_decrypt_key(&self, key: &str) -> Result<(), CredentialError> {
        self.inner.write().decrypt_key = Some(key.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        let mut inner = self.inner.write();
        inner.tokens = None;
        inner.decrypt_key = None;
        Ok(())
    }
}
