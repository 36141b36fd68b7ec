pub mod api_keys;
pub mod conversations;
pub mod model_catalog;
pub mod preferences;
pub mod session;

pub use api_keys::ApiKeyStore;
pub use conversations::ConversationStore;
pub use model_catalog::ModelCatalogStore;
pub use preferences::PreferenceStore;
pub use session::SessionStore;
