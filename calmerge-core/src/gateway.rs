//! The capability every provider's calendar API is reached through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::error::CalmergeResult;
use crate::event::Event;
use crate::provider::Provider;
use crate::sync_range::SyncRange;

/// An event exactly as the provider API returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub provider: Provider,
    /// Calendar the payload was listed from, for providers that list per calendar.
    pub calendar_id: Option<String>,
    pub payload: serde_json::Value,
}

impl RawEvent {
    pub fn new(provider: Provider, calendar_id: Option<String>, payload: serde_json::Value) -> Self {
        RawEvent {
            provider,
            calendar_id,
            payload,
        }
    }
}

/// CRUD against one provider's REST API on behalf of a linked account.
///
/// Implementations never retry. A 401 answer must surface as
/// `CalmergeError::TokenExpired` so the account manager can refresh and
/// retry; every other non-2xx status is `ProviderRejected`.
#[async_trait]
pub trait EventGateway: Send + Sync {
    fn provider(&self) -> Provider;

    async fn fetch(&self, account: &Account, range: &SyncRange) -> CalmergeResult<Vec<RawEvent>>;

    async fn create(&self, account: &Account, event: &Event) -> CalmergeResult<RawEvent>;

    async fn update(&self, account: &Account, event: &Event) -> CalmergeResult<RawEvent>;

    async fn delete(&self, account: &Account, event: &Event) -> CalmergeResult<()>;

    /// Convert a provider payload into the canonical event. Pure.
    fn normalize(&self, raw: &RawEvent, account_email: &str) -> CalmergeResult<Event>;
}
