//! A linked calendar-provider identity and its OAuth credentials.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::TokenGrant;
use crate::provider::Provider;

/// Identifies an account across the store, the manager and the event cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountKey {
    pub provider: Provider,
    pub email: String,
}

impl AccountKey {
    pub fn new(provider: Provider, email: impl Into<String>) -> Self {
        AccountKey {
            provider,
            email: email.into(),
        }
    }
}

impl std::fmt::Display for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.email)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub provider: Provider,
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(rename = "expiresAtEpochMillis", with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl Account {
    /// Build a freshly authorized account from a token grant.
    pub fn from_grant(
        provider: Provider,
        email: &str,
        display_name: Option<&str>,
        grant: TokenGrant,
    ) -> Self {
        let display_name = display_name
            .filter(|n| !n.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_display_name(email));

        Account {
            provider,
            email: email.to_string(),
            display_name,
            expires_at: grant.expires_at(Utc::now()),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
        }
    }

    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.provider, self.email.clone())
    }

    /// Whether the access token can still be used for at least `margin`.
    pub fn is_fresh(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        now < self.expires_at - margin
    }

    /// Apply a refresh grant. Providers often omit the refresh token on
    /// refresh, in which case the stored one is kept.
    pub fn with_grant(&self, grant: TokenGrant) -> Self {
        Account {
            provider: self.provider,
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            expires_at: grant.expires_at(Utc::now()),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.or_else(|| self.refresh_token.clone()),
        }
    }
}

fn default_display_name(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}
