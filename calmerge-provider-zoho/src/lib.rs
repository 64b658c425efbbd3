//! Zoho Calendar provider for calmerge.
//!
//! - `auth`: authorization-code OAuth flow, profile lookup and refresh
//! - `gateway`: Calendar API v1 calls across all of an account's calendars
//! - `from_zoho` / `to_zoho`: conversion between Zoho's compact date formats
//!   and the canonical `Event`

pub mod auth;
pub mod config;
pub mod from_zoho;
pub mod gateway;
pub mod to_zoho;

pub use auth::ZohoAuthAdapter;
pub use config::ZohoConfig;
pub use gateway::ZohoGateway;

/// `Authorization` header value for Zoho APIs.
pub(crate) fn authorization_header(access_token: &str) -> String {
    format!("Zoho-oauthtoken {access_token}")
}
