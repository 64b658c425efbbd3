//! Google Calendar provider for calmerge.
//!
//! - `auth`: two-phase identity + consent OAuth flow and silent refresh
//! - `gateway`: Calendar v3 REST calls on behalf of a linked account
//! - `from_google` / `to_google`: payload conversion to and from `Event`

pub mod auth;
pub mod config;
pub mod from_google;
pub mod gateway;
pub mod identity;
pub mod to_google;

pub use auth::GoogleAuthAdapter;
pub use config::GoogleConfig;
pub use gateway::GoogleGateway;
pub use identity::{ConsentPageBroker, GoogleIdentity, IdentityBroker};

/// OAuth scopes requested for calendar access.
pub const SCOPES: &[&str] = &["https://www.googleapis.com/auth/calendar"];
