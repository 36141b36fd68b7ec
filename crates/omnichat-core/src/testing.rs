//! Shared test double for the API transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::api::{ApiRequest, ApiResponse, ApiTransport, LoginResponse};
use crate::auth::TokenPair;
use crate::error::ApiError;
use crate::models::User;

/// Scripted in-memory server. Validates bearer tokens, renews a known
/// refresh token, and records every authenticated send.
pub(crate) struct RecordingTransport {
    valid_access: Mutex<String>,
    valid_refresh: Mutex<Option<String>>,
    responses: Mutex<HashMap<String, Value>>,
    fail_remaining: AtomicUsize,
    reject: Mutex<Option<(u16, String)>>,
    sent_paths: Mutex<Vec<String>>,
    renewals: AtomicUsize,
}

impl RecordingTransport {
    pub fn new(valid_access: &str, valid_refresh: &str) -> Self {
        Self {
            valid_access: Mutex::new(valid_access.to_string()),
            valid_refresh: Mutex::new(Some(valid_refresh.to_string())),
            responses: Mutex::new(HashMap::new()),
            fail_remaining: AtomicUsize::new(0),
            reject: Mutex::new(None),
            sent_paths: Mutex::new(Vec::new()),
            renewals: AtomicUsize::new(0),
        }
    }

    /// The next `n` sends fail with a transient network error.
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Every send fails with a non-credential request error.
    pub fn reject_with(&self, status: u16, message: &str) {
        *self.reject.lock() = Some((status, message.to_string()));
    }

    /// Script the response body for a path.
    pub fn respond_with(&self, path: &str, body: Value) {
        self.responses.lock().insert(path.to_string(), body);
    }

    /// Invalidate the current access token, as if it expired server-side.
    pub fn expire_access_token(&self) {
        *self.valid_access.lock() = "__expired__".to_string();
    }

    pub fn send_count(&self) -> usize {
        self.sent_paths.lock().len()
    }

    pub fn sent_paths(&self) -> Vec<String> {
        self.sent_paths.lock().clone()
    }

    pub fn renewal_count(&self) -> usize {
        self.renewals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiTransport for RecordingTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        access_token: &str,
    ) -> Result<ApiResponse, ApiError> {
        loop {
            let remaining = self.fail_remaining.load(Ordering::SeqCst);
            if remaining == 0 {
                break;
            }
            if self
                .fail_remaining
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Err(ApiError::Transient("scripted network failure".into()));
            }
        }
        if let Some((status, message)) = self.reject.lock().clone() {
            return Err(ApiError::Request { status, message });
        }
        if *self.valid_access.lock() != access_token {
            return Err(ApiError::AuthExpired);
        }
        self.sent_paths.lock().push(request.path.clone());
        let body = self
            .responses
            .lock()
            .get(&request.path)
            .cloned()
            .unwrap_or(Value::Null);
        Ok(ApiResponse { status: 200, body })
    }

    async fn renew(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        let expected = self.valid_refresh.lock().clone();
        if expected.as_deref() != Some(refresh_token) {
            return Err(ApiError::AuthInvalid);
        }
        *self.valid_access.lock() = "at-fresh".to_string();
        *self.valid_refresh.lock() = Some("rt-fresh".to_string());
        Ok(TokenPair {
            access_token: "at-fresh".into(),
            refresh_token: "rt-fresh".into(),
        })
    }

    async fn login(&self, email: &str, _password: &str) -> Result<LoginResponse, ApiError> {
        *self.valid_access.lock() = "at-login".to_string();
        *self.valid_refresh.lock() = Some("rt-login".to_string());
        Ok(LoginResponse {
            access_token: "at-login".into(),
            refresh_token: "rt-login".into(),
            decrypt_key: Some("dk-login".into()),
            user: User {
                id: "u1".into(),
                email: email.to_string(),
                display_name: None,
            },
        })
    }
}
