//! Remote API connection settings.

use serde::{Deserialize, Serialize};

use super::default_true;

/// Remote API configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    /// Base URL of the versioned REST API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Credential sent in the `Authorization` header.
    /// Usually supplied via `${SWEEPER_TOKEN}` or the `--token` flag.
    #[serde(default)]
    pub token: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Include age-restricted channels in community searches.
    #[serde(default = "default_true")]
    pub include_nsfw: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            include_nsfw: true,
        }
    }
}

impl ApiConfig {
    pub(super) fn validate(&self) -> Result<(), String> {
        url::Url::parse(&self.base_url)
            .map_err(|e| format!("api.base_url is not a valid URL: {e}"))?;
        if self.timeout_secs == 0 {
            return Err("api.timeout_secs must be greater than zero".into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "****"))
            .field("timeout_secs", &self.timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("include_nsfw", &self.include_nsfw)
            .finish()
    }
}

fn default_base_url() -> String {
    "https://discord.com/api/v9".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("sweeper/", env!("CARGO_PKG_VERSION")).to_string()
}
