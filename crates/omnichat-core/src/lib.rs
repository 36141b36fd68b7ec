//! Client-side session and state synchronization for a multi-model chat
//! product.
//!
//! The crate owns everything between the UI and the server: credential
//! storage and single-flight renewal, an offline entity cache, reactive
//! stores fed by a realtime push channel, three-layer preference
//! reconciliation, and best-effort session fan-out between sibling client
//! instances. Hosts embed a [`CoreRuntime`] and talk to its stores; nothing
//! above this crate touches tokens, the cache, or the wire directly.

pub mod api;
pub mod auth;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod constants;
pub mod error;
pub mod models;
pub mod realtime;
pub mod runtime;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiTransport};
pub use auth::{CredentialStore, TokenCoordinator, TokenPair};
pub use broadcast::{SessionBroadcaster, SessionMessage};
pub use config::CoreConfig;
pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use error::ApiError;
pub use runtime::CoreRuntime;
