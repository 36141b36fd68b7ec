//! Abstract request/response transport.
//!
//! The coordinator and stores never touch reqwest directly; they speak
//! `ApiTransport`, which keeps the renewal machinery testable with a fake
//! server and keeps the wire mechanism swappable.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::TokenPair;
use crate::error::ApiError;
use crate::models::User;

/// A replayable description of one API call. Cloned into the renewal queue,
/// so it carries no streams or one-shot state.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::PATCH,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::DELETE,
            path: path.into(),
            body: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, ApiError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub decrypt_key: Option<String>,
    pub user: User,
}

#[async_trait]
pub trait ApiTransport: Send + Sync {
    /// Issue one authenticated request. Must map a credential rejection to
    /// `ApiError::AuthExpired` and network-level failures to
    /// `ApiError::Transient`; everything else is `ApiError::Request`.
    async fn send(
        &self,
        request: &ApiRequest,
        access_token: &str,
    ) -> Result<ApiResponse, ApiError>;

    /// Exchange the refresh token for a fresh pair. An explicit server
    /// rejection is `ApiError::AuthInvalid`.
    async fn renew(&self, refresh_token: &str) -> Result<TokenPair, ApiError>;

    /// Initial credential issuance.
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError>;
}

pub struct HttpTransport {
    base_url: String,
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn classify(status: StatusCode, body: Value) -> Result<ApiResponse, ApiError> {
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::AuthExpired);
        }
        if matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ) {
            return Err(ApiError::Transient(format!("upstream {status}")));
        }
        if !status.is_success() {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string();
            return Err(ApiError::Request {
                status: status.as_u16(),
                message,
            });
        }
        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }

    async fn read_body(response: reqwest::Response) -> (StatusCode, Value) {
        let status = response.status();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        access_token: &str,
    ) -> Result<ApiResponse, ApiError> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.url(&request.path))
            .bearer_auth(access_token);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        let (status, body) = Self::read_body(response).await;
        Self::classify(status, body)
    }

    async fn renew(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let response = self
            .http
            .post(self.url("/auth/renew"))
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let (status, body) = Self::read_body(response).await;
        if status.is_client_error() {
            return Err(ApiError::AuthInvalid);
        }
        if !status.is_success() {
            return Err(ApiError::Transient(format!("renewal failed: {status}")));
        }
        let access_token = body
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::request(status.as_u16(), "renewal response missing token"))?
            .to_string();
        let refresh_token = body
            .get("refresh_token")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::request(status.as_u16(), "renewal response missing token"))?
            .to_string();
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let response = self
            .http
            .post(self.url("/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let (status, body) = Self::read_body(response).await;
        let response = Self::classify(status, body)?;
        response.decode()
    }
}
