pub mod coordinator;
pub mod credentials;

pub use coordinator::TokenCoordinator;
pub use credentials::{
    CredentialStore, KeyringCredentialStore, MemoryCredentialStore, TokenPair,
};
