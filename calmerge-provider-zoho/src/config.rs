//! Zoho OAuth client and endpoint configuration.
//!
//! Read from the `[zoho]` table of ~/.config/calmerge/config.toml. Endpoints
//! default to the EU data center; accounts in other regions override
//! `accounts_url` and `calendar_api` (e.g. `https://accounts.zoho.com`).

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use calmerge_core::{CalmergeError, CalmergeResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZohoConfig {
    pub client_id: String,
    pub client_secret: String,

    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    #[serde(default = "default_accounts_url")]
    pub accounts_url: String,

    #[serde(default = "default_calendar_api")]
    pub calendar_api: String,

    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// IANA zone sent along with new or edited timed events.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_redirect_uri() -> String {
    "com.myzoho://oauth2redirect".to_string()
}

fn default_accounts_url() -> String {
    "https://accounts.zoho.eu".to_string()
}

fn default_calendar_api() -> String {
    "https://calendar.zoho.eu/api/v1".to_string()
}

fn default_scopes() -> Vec<String> {
    vec![
        "ZohoCalendar.calendar.ALL".to_string(),
        "ZohoCalendar.event.ALL".to_string(),
        "AaaServer.profile.READ".to_string(),
    ]
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl ZohoConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        ZohoConfig {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: default_redirect_uri(),
            accounts_url: default_accounts_url(),
            calendar_api: default_calendar_api(),
            scopes: default_scopes(),
            timezone: default_timezone(),
        }
    }

    pub fn auth_endpoint(&self) -> String {
        format!("{}/oauth/v2/auth", self.accounts_url.trim_end_matches('/'))
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth/v2/token", self.accounts_url.trim_end_matches('/'))
    }

    pub fn user_info_endpoint(&self) -> String {
        format!("{}/oauth/user/info", self.accounts_url.trim_end_matches('/'))
    }

    pub fn validate(&self) -> CalmergeResult<()> {
        if self.client_id.trim().is_empty() || self.client_secret.trim().is_empty() {
            return Err(CalmergeError::Config(
                "zoho.client_id and zoho.client_secret are required. See https://api-console.zoho.eu"
                    .into(),
            ));
        }
        for (name, value) in [
            ("accounts_url", &self.accounts_url),
            ("calendar_api", &self.calendar_api),
        ] {
            url::Url::parse(value)
                .map_err(|e| CalmergeError::Config(format!("zoho.{name} '{value}': {e}")))?;
        }
        self.timezone
            .parse::<Tz>()
            .map_err(|_| CalmergeError::Config(format!("zoho.timezone '{}' is unknown", self.timezone)))?;
        Ok(())
    }
}
