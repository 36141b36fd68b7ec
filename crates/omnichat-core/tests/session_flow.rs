//! End-to-end flows over a scripted server: login, token expiry under
//! concurrent load, offline cold start, and cross-instance logout.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use omnichat_core::api::{ApiRequest, ApiResponse, ApiTransport, LoginResponse};
use omnichat_core::auth::MemoryCredentialStore;
use omnichat_core::error::ApiError;
use omnichat_core::models::User;
use omnichat_core::{CoreConfig, CoreRuntime, SessionBroadcaster, TokenPair};

/// Minimal in-process server. Tokens rotate on login and renewal; every
/// accepted write is recorded so tests can assert exactly-once semantics.
struct FakeServer {
    valid_access: Mutex<String>,
    valid_refresh: Mutex<String>,
    renewals: AtomicUsize,
    conversations: Mutex<Vec<Value>>,
    next_id: AtomicUsize,
}

impl FakeServer {
    fn new() -> Self {
        Self {
            valid_access: Mutex::new(String::new()),
            valid_refresh: Mutex::new(String::new()),
            renewals: AtomicUsize::new(0),
            conversations: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
        }
    }

    fn expire_access_token(&self) {
        *self.valid_access.lock() = "__expired__".to_string();
    }

    fn renewal_count(&self) -> usize {
        self.renewals.load(Ordering::SeqCst)
    }

    fn conversation_count(&self) -> usize {
        self.conversations.lock().len()
    }
}

#[async_trait]
impl ApiTransport for FakeServer {
    async fn send(&self, request: &ApiRequest, access_token: &str) -> Result<ApiResponse, ApiError> {
        if *self.valid_access.lock() != access_token {
            return Err(ApiError::AuthExpired);
        }
        let body = match (request.method.as_str(), request.path.as_str()) {
            ("POST", "/conversations") => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let payload = request.body.clone().unwrap_or(Value::Null);
                let conversation = json!({
                    "id": format!("c{id}"),
                    "title": payload["title"],
                    "model_id": payload["model_id"],
                    "created_at": id,
                    "updated_at": id,
                    "archived": false
                });
                self.conversations.lock().push(conversation.clone());
                conversation
            }
            ("GET", "/conversations") => Value::Array(self.conversations.lock().clone()),
            ("GET", "/models") => json!([]),
            ("GET", "/keys") => json!([]),
            ("GET", "/preferences") => json!({ "values": {} }),
            _ => Value::Null,
        };
        Ok(ApiResponse { status: 200, body })
    }

    async fn renew(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let n = self.renewals.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.valid_refresh.lock() != refresh_token {
            return Err(ApiError::AuthInvalid);
        }
        let pair = TokenPair {
            access_token: format!("at-{n}"),
            refresh_token: format!("rt-{n}"),
        };
        *self.valid_access.lock() = pair.access_token.clone();
        *self.valid_refresh.lock() = pair.refresh_token.clone();
        Ok(pair)
    }

    async fn login(&self, email: &str, _password: &str) -> Result<LoginResponse, ApiError> {
        *self.valid_access.lock() = "at-0".to_string();
        *self.valid_refresh.lock() = "rt-0".to_string();
        Ok(LoginResponse {
            access_token: "at-0".into(),
            refresh_token: "rt-0".into(),
            decrypt_key: None,
            user: User {
                id: "u1".into(),
                email: email.to_string(),
                display_name: None,
            },
        })
    }
}

fn runtime_with(
    server: Arc<FakeServer>,
    data_dir: &std::path::Path,
    broadcaster: SessionBroadcaster,
) -> CoreRuntime {
    let config = CoreConfig::new(data_dir).with_realtime_url("ws://127.0.0.1:9");
    CoreRuntime::builder(config)
        .transport(server)
        .credentials(Arc::new(MemoryCredentialStore::new()))
        .broadcaster(broadcaster)
        .build()
        .unwrap()
}

#[tokio::test]
async fn expiry_under_load_renews_once_with_no_duplicates() {
    let server = Arc::new(FakeServer::new());
    let dir = tempfile::tempdir().unwrap();
    let runtime = runtime_with(server.clone(), dir.path(), SessionBroadcaster::disconnected());

    runtime.session().login("me@example.com", "pw").await.unwrap();
    runtime
        .conversations()
        .create("first", "gpt-x")
        .await
        .unwrap();

    // Every in-flight request now fails with an expired credential.
    server.expire_access_token();

    let mut handles = Vec::new();
    for i in 0..6 {
        let conversations = runtime.conversations().clone();
        handles.push(tokio::spawn(async move {
            conversations.create(&format!("burst {i}"), "gpt-x").await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(server.renewal_count(), 1, "one renewal for the whole burst");
    assert_eq!(
        server.conversation_count(),
        7,
        "each create accepted exactly once"
    );
    assert_eq!(runtime.conversations().conversations().len(), 7);
    assert!(runtime.session().is_authenticated());
}

#[tokio::test]
async fn offline_cold_start_serves_cached_state() {
    let server = Arc::new(FakeServer::new());
    let dir = tempfile::tempdir().unwrap();
    {
        let runtime =
            runtime_with(server.clone(), dir.path(), SessionBroadcaster::disconnected());
        runtime.session().login("me@example.com", "pw").await.unwrap();
        runtime
            .conversations()
            .create("survives restarts", "gpt-x")
            .await
            .unwrap();
        runtime.conversations().load().await.unwrap();
    }

    // Fresh instance over the same data dir, network down.
    let runtime = runtime_with(server, dir.path(), SessionBroadcaster::disconnected());
    runtime.monitor().set_network_online(false);
    let listed = runtime.conversations().load().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].title, "survives restarts");
}

#[tokio::test]
async fn renewal_failure_forces_logout_everywhere() {
    let server = Arc::new(FakeServer::new());
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let broadcaster = SessionBroadcaster::new();
    let tab_a = runtime_with(server.clone(), dir_a.path(), broadcaster.clone());
    let tab_b = runtime_with(server.clone(), dir_b.path(), broadcaster);

    let mut epoch_b = tab_b.session().watch_session();
    tab_a.session().login("me@example.com", "pw").await.unwrap();
    epoch_b.changed().await.unwrap();
    assert!(tab_b.session().is_authenticated());

    // Invalidate both tokens server-side: the next request fails, renewal
    // fails too, and the forced logout fans out.
    server.expire_access_token();
    *server.valid_refresh.lock() = "revoked".to_string();
    let result = tab_a.conversations().create("doomed", "gpt-x").await;
    assert!(matches!(result, Err(ApiError::AuthInvalid)));
    assert!(!tab_a.session().is_authenticated());

    while tab_b.session().is_authenticated() {
        epoch_b.changed().await.unwrap();
    }
}
