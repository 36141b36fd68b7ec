use std::fmt;

/// Error taxonomy for the session layer.
///
/// Only `AuthInvalid` is allowed to escalate to the global
/// "must re-authenticate" signal. Cache errors are absorbed by the stores
/// and degrade to empty results; everything else resolves to a
/// per-operation failure that leaves previously loaded state intact.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Network-level failure (connect, timeout, 5xx gateway). Retried by the
    /// generic retry policy with bounded, jittered backoff.
    #[error("network error: {0}")]
    Transient(String),

    /// The access token was rejected as expired. Drives the renewal path;
    /// never surfaced raw to callers of the coordinator.
    #[error("access token expired")]
    AuthExpired,

    /// Renewal itself failed. Forces logout.
    #[error("session expired, please sign in again")]
    AuthInvalid,

    /// Persistent storage missing or throwing. Logged and treated as an
    /// empty cache, never fatal.
    #[error("local cache unavailable: {0}")]
    CacheUnavailable(String),

    /// A preference sync failed mid-flight. The pending layer is preserved
    /// for retry, not merged blindly.
    #[error("preference sync failed: {0}")]
    SyncConflict(String),

    /// Any other server-reported failure (validation, server fault).
    /// Never enters the renewal queue.
    #[error("request failed ({status}): {message}")]
    Request { status: u16, message: String },
}

impl ApiError {
    /// Whether the generic retry policy may re-issue the request.
    /// Auth failures are never retried here; they belong to the coordinator.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::AuthExpired | ApiError::AuthInvalid)
    }

    pub(crate) fn request(status: u16, message: impl fmt::Display) -> Self {
        ApiError::Request {
            status,
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transient(err.to_string())
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        ApiError::CacheUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Request {
            status: 0,
            message: format!("malformed payload: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert!(ApiError::Transient("timeout".into()).is_transient());
        assert!(!ApiError::AuthExpired.is_transient());
        assert!(!ApiError::request(422, "bad field").is_transient());
    }

    #[test]
    fn auth_classification() {
        assert!(ApiError::AuthExpired.is_auth());
        assert!(ApiError::AuthInvalid.is_auth());
        assert!(!ApiError::Transient("x".into()).is_auth());
    }
}
