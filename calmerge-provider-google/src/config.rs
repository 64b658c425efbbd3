//! Google OAuth client and endpoint configuration.
//!
//! Read from the `[google]` table of ~/.config/calmerge/config.toml:
//!
//! ```toml
//! [google]
//! client_id = "your-client-id.apps.googleusercontent.com"
//! client_secret = "your-client-secret"
//! ```

use serde::{Deserialize, Serialize};

use calmerge_core::{CalmergeError, CalmergeResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,

    /// Installed-app clients may omit the secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// Account to preselect on the consent page when no broker picks one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_hint: Option<String>,

    #[serde(default = "default_auth_url")]
    pub auth_url: String,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
}

fn default_redirect_uri() -> String {
    "http://localhost:8085/callback".to_string()
}

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_api_base() -> String {
    "https://www.googleapis.com/calendar/v3".to_string()
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

impl GoogleConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        GoogleConfig {
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: default_redirect_uri(),
            login_hint: None,
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            api_base: default_api_base(),
            calendar_id: default_calendar_id(),
        }
    }

    pub fn validate(&self) -> CalmergeResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(CalmergeError::Config(
                "google.client_id is empty. See https://console.cloud.google.com/apis/credentials"
                    .into(),
            ));
        }
        for (name, value) in [
            ("auth_url", &self.auth_url),
            ("token_url", &self.token_url),
            ("api_base", &self.api_base),
        ] {
            url::Url::parse(value)
                .map_err(|e| CalmergeError::Config(format!("google.{name} '{value}': {e}")))?;
        }
        Ok(())
    }
}
