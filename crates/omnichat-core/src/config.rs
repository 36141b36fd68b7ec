use std::path::{Path, PathBuf};

use crate::constants::{DEFAULT_API_BASE, DEFAULT_REALTIME_URL};

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Directory holding the local entity cache database.
    pub data_dir: PathBuf,
    /// Base URL of the chat API, e.g. `https://api.omnichat.dev`.
    pub api_base: String,
    /// Websocket endpoint for the realtime event channel.
    pub realtime_url: String,
}

impl CoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            api_base: DEFAULT_API_BASE.to_string(),
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_realtime_url(mut self, realtime_url: impl Into<String>) -> Self {
        self.realtime_url = realtime_url.into();
        self
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new("omnichat_data")
    }
}
