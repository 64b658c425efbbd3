//! Core types for calmerge.
//!
//! This crate provides everything that is not specific to one calendar provider:
//! - `Account`, `Event` and `Provider`, the provider-neutral data model
//! - `credential_store` for durable, provider-scoped account persistence
//! - `auth` and `gateway`, the capability traits each provider implements
//! - `account_manager`, which keeps every linked account's token valid
//! - `aggregator` and `window`, the merged event cache and its day/week/month queries

pub mod account;
pub mod account_manager;
pub mod aggregator;
pub mod auth;
pub mod constants;
pub mod credential_store;
pub mod error;
pub mod event;
pub mod gateway;
pub mod provider;
pub mod settings;
pub mod sync_range;
pub mod window;

#[cfg(test)]
pub(crate) mod test_support;

pub use account::{Account, AccountKey};
pub use error::{AuthFailure, CalmergeError, CalmergeResult};
pub use event::{Event, EventTime};
pub use provider::Provider;
