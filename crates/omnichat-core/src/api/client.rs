//! Typed API surface over the coordinator.
//!
//! Transient failures are retried with bounded, jittered backoff. Auth
//! failures are never retried here; the coordinator owns that path.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::api::{ApiRequest, ApiResponse};
use crate::auth::TokenCoordinator;
use crate::constants::{MAX_RETRY_ATTEMPTS, RETRY_BASE_DELAY_MS};
use crate::error::ApiError;
use crate::models::{AiModel, ApiKey, Conversation, Message, PreferenceValue};

#[derive(Debug, Deserialize)]
struct PreferencesPayload {
    values: BTreeMap<String, PreferenceValue>,
}

pub struct ApiClient {
    coordinator: Arc<TokenCoordinator>,
}

fn retry_delay(attempt: u32) -> Duration {
    let base = RETRY_BASE_DELAY_MS << attempt.min(8);
    let jitter = rand::rng().random_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

impl ApiClient {
    pub fn new(coordinator: Arc<TokenCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<TokenCoordinator> {
        &self.coordinator
    }

    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut attempt = 0;
        loop {
            match self.coordinator.execute(request.clone()).await {
                Err(err) if err.is_transient() && attempt + 1 < MAX_RETRY_ATTEMPTS => {
                    let delay = retry_delay(attempt);
                    debug!(path = %request.path, attempt, "transient failure, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.execute(ApiRequest::get("/conversations")).await?.decode()
    }

    pub async fn create_conversation(
        &self,
        title: &str,
        model_id: &str,
    ) -> Result<Conversation, ApiError> {
        self.execute(ApiRequest::post(
            "/conversations",
            json!({ "title": title, "model_id": model_id }),
        ))
        .await?
        .decode()
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<(), ApiError> {
        self.execute(ApiRequest::delete(format!("/conversations/{id}")))
            .await?;
        Ok(())
    }

    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ApiError> {
        self.execute(ApiRequest::get(format!(
            "/conversations/{conversation_id}/messages"
        )))
        .await?
        .decode()
    }

    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<Message, ApiError> {
        self.execute(ApiRequest::post(
            format!("/conversations/{conversation_id}/messages"),
            json!({ "content": content }),
        ))
        .await?
        .decode()
    }

    pub async fn list_models(&self) -> Result<Vec<AiModel>, ApiError> {
        self.execute(ApiRequest::get("/models")).await?.decode()
    }

    pub async fn list_api_keys(&self) -> Result<Vec<ApiKey>, ApiError> {
        self.execute(ApiRequest::get("/keys")).await?.decode()
    }

    pub async fn get_preferences(&self) -> Result<BTreeMap<String, PreferenceValue>, ApiError> {
        let payload: PreferencesPayload =
            self.execute(ApiRequest::get("/preferences")).await?.decode()?;
        Ok(payload.values)
    }

    /// Submit only the given diff; the server answers with the canonical
    /// values for the submitted keys.
    pub async fn patch_preferences(
        &self,
        diff: &BTreeMap<String, PreferenceValue>,
    ) -> Result<BTreeMap<String, PreferenceValue>, ApiError> {
        let response = self
            .execute(ApiRequest::patch("/preferences", json!({ "values": diff })))
            .await
            .map_err(|err| match err {
                ApiError::AuthInvalid => ApiError::AuthInvalid,
                other => ApiError::SyncConflict(other.to_string()),
            })?;
        let payload: PreferencesPayload = response.decode()?;
        Ok(payload.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;
    use crate::broadcast::SessionBroadcaster;
    use crate::testing::RecordingTransport;

    fn client(transport: Arc<RecordingTransport>) -> ApiClient {
        let credentials = Arc::new(MemoryCredentialStore::with_tokens("at-ok", "rt-ok"));
        let coordinator = Arc::new(TokenCoordinator::new(
            transport,
            credentials,
            SessionBroadcaster::new(),
        ));
        ApiClient::new(coordinator)
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_retry_up_to_bound() {
        let transport = Arc::new(RecordingTransport::new("at-ok", "rt-ok"));
        transport.fail_next(MAX_RETRY_ATTEMPTS as usize + 2);
        let client = client(transport.clone());

        let result = client.list_models().await;
        assert!(matches!(result, Err(ApiError::Transient(_))));
        assert_eq!(
            transport.send_count(),
            MAX_RETRY_ATTEMPTS as usize,
            "bounded attempts"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_error_then_success() {
        let transport = Arc::new(RecordingTransport::new("at-ok", "rt-ok"));
        transport.fail_next(1);
        transport.respond_with("/models", serde_json::json!([]));
        let client = client(transport.clone());

        let models = client.list_models().await.unwrap();
        assert!(models.is_empty());
        assert_eq!(transport.send_count(), 2);
    }

    #[tokio::test]
    async fn expired_access_token_is_renewed_transparently() {
        let transport = Arc::new(RecordingTransport::new("at-ok", "rt-ok"));
        transport.respond_with("/models", serde_json::json!([]));
        let client = client(transport.clone());

        client.list_models().await.unwrap();
        assert_eq!(transport.renewal_count(), 0);

        transport.expire_access_token();
        client.list_models().await.unwrap();
        assert_eq!(transport.renewal_count(), 1);
        // The rejected attempt is never recorded as a send.
        assert_eq!(transport.send_count(), 2);
    }

    #[tokio::test]
    async fn request_errors_are_not_retried() {
        let transport = Arc::new(RecordingTransport::new("at-ok", "rt-ok"));
        transport.reject_with(422, "bad");
        let client = client(transport.clone());

        let result = client.list_models().await;
        assert!(matches!(result, Err(ApiError::Request { status: 422, .. })));
        assert_eq!(transport.send_count(), 1);
    }

    #[tokio::test]
    async fn preference_patch_maps_failures_to_sync_conflict() {
        let transport = Arc::new(RecordingTransport::new("at-ok", "rt-ok"));
        transport.reject_with(409, "stale");
        let client = client(transport);

        let diff: BTreeMap<String, PreferenceValue> =
            [("theme".to_string(), serde_json::json!("dark"))].into();
        let result = client.patch_preferences(&diff).await;
        assert!(matches!(result, Err(ApiError::SyncConflict(_))));
    }
}
