//! Application-wide constants
//!
//! Centralized location for magic strings and tuning values that are used
//! across multiple modules.

/// Default chat API base URL
pub const DEFAULT_API_BASE: &str = "https://api.omnichat.dev";

/// Default realtime websocket endpoint
pub const DEFAULT_REALTIME_URL: &str = "wss://realtime.omnichat.dev/events";

/// Service name used for OS keychain entries
pub const KEYRING_SERVICE: &str = "dev.omnichat.client";

/// Quiet window before a pending preference edit is flushed to the server.
pub const PREF_DEBOUNCE_MS: u64 = 300;

/// Bounded attempts for the generic transient-error retry policy.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for retry backoff; doubled per attempt, plus jitter.
pub const RETRY_BASE_DELAY_MS: u64 = 250;

/// Realtime reconnect backoff: base delay, doubled per attempt up to the cap.
pub const RECONNECT_BASE_DELAY_MS: u64 = 500;
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// After this many consecutive failed dials the channel stops retrying and
/// waits for the connectivity monitor to report a fresh online transition.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 8;

/// Interval for the realtime liveness poll driven by the monitor.
pub const LIVENESS_POLL_SECS: u64 = 5;

/// Default page size for paginated cache reads.
pub const CACHE_PAGE_SIZE: u32 = 50;

// Persistent storage keys (namespaced strings). The credential store and the
// kv side of the cache both key off these.
pub mod storage_keys {
    /// Access token (keychain)
    pub const ACCESS_TOKEN: &str = "access_token";
    /// Refresh token (keychain)
    pub const REFRESH_TOKEN: &str = "refresh_token";
    /// Key-material used to decrypt synced blobs (keychain)
    pub const DECRYPT_KEY: &str = "decrypt_key";
    /// Cached user record (cache kv)
    pub const CACHED_USER: &str = "cached_user";
    /// Last server-confirmed preference blob (cache kv)
    pub const SERVER_PREFERENCES: &str = "server_preferences";
    /// Unix timestamp of the last successful preference sync (cache kv)
    pub const PREFERENCES_SYNCED_AT: &str = "preferences_synced_at";
}
