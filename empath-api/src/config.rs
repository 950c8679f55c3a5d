//! HTTP submission API configuration

use ahash::AHashSet;
use serde::Deserialize;

/// Configuration for the HTTP submission API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Enable or disable the HTTP submission API.
    ///
    /// When disabled, the server will not start and SMTP remains the only intake.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Address to bind the HTTP submission API.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Valid bearer tokens accepted on `Authorization: Bearer <api_key>`.
    ///
    /// A request presenting a key not in this set is rejected with 401.
    #[serde(default)]
    pub api_keys: AHashSet<String>,
}

const fn default_enabled() -> bool {
    true
}

fn default_listen_address() -> String {
    "[::]:8025".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            listen_address: default_listen_address(),
            api_keys: AHashSet::default(),
        }
    }
}
