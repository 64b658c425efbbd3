//! Merged event cache across all linked accounts.
//!
//! `refresh_all` fetches every account concurrently and publishes one
//! immutable `EventSnapshot`; the day/week/month queries read whatever
//! snapshot is current. A failing account never fails the batch, it is
//! listed in the snapshot's `failures` instead.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::account::{Account, AccountKey};
use crate::account_manager::AccountManager;
use crate::constants::{DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_SYNC_DAYS};
use crate::error::{CalmergeError, CalmergeResult};
use crate::event::Event;
use crate::gateway::EventGateway;
use crate::provider::Provider;
use crate::sync_range::SyncRange;
use crate::window::TimeWindow;

/// An account whose events are missing from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountFailure {
    pub account: AccountKey,
    /// The user has to log in again before this account can be fetched.
    pub reauthorization_required: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct EventSnapshot {
    /// Accounts the snapshot was built from, including failed ones.
    pub accounts: Vec<AccountKey>,
    pub events: Vec<Event>,
    pub failures: Vec<AccountFailure>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Order in which the refresh that built this snapshot was started.
    pub generation: u64,
}

impl EventSnapshot {
    /// Event ids are only unique within one account.
    pub fn event(&self, account: &AccountKey, id: &str) -> Option<&Event> {
        self.events
            .iter()
            .find(|event| event.id == id && event.account_key() == *account)
    }
}

#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub snapshot: Arc<EventSnapshot>,
    /// Provider payloads that could not be normalized.
    pub dropped: usize,
    /// A refresh started later already published; `snapshot` was not cached.
    pub superseded: bool,
}

impl RefreshReport {
    pub fn failures(&self) -> &[AccountFailure] {
        &self.snapshot.failures
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Created(Event),
    Updated(Event),
    /// The calendar refused the edit, so it was stored as a new event.
    SavedAsNew(Event),
}

impl UpdateOutcome {
    pub fn event(&self) -> &Event {
        match self {
            UpdateOutcome::Created(event)
            | UpdateOutcome::Updated(event)
            | UpdateOutcome::SavedAsNew(event) => event,
        }
    }
}

pub struct Aggregator {
    manager: Arc<AccountManager>,
    gateways: HashMap<Provider, Arc<dyn EventGateway>>,
    cache: RwLock<Arc<EventSnapshot>>,
    generation: AtomicU64,
    week_start: Weekday,
    timezone: Tz,
    fetch_timeout: Duration,
    sync_days: i64,
}

impl Aggregator {
    pub fn new(manager: Arc<AccountManager>) -> Self {
        Aggregator {
            manager,
            gateways: HashMap::new(),
            cache: RwLock::new(Arc::new(EventSnapshot::default())),
            generation: AtomicU64::new(0),
            week_start: Weekday::Mon,
            timezone: Tz::UTC,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            sync_days: DEFAULT_SYNC_DAYS,
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn EventGateway>) -> Self {
        self.gateways.insert(gateway.provider(), gateway);
        self
    }

    pub fn with_week_start(mut self, week_start: Weekday) -> Self {
        self.week_start = week_start;
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_sync_days(mut self, days: i64) -> Self {
        self.sync_days = days;
        self
    }

    pub fn manager(&self) -> &Arc<AccountManager> {
        &self.manager
    }

    /// Fetch all `accounts` concurrently and publish the result as the new
    /// snapshot, unless a refresh started after this one got there first.
    pub async fn refresh_all(&self, accounts: &[Account]) -> RefreshReport {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut seen = HashSet::new();
        let accounts: Vec<&Account> = accounts
            .iter()
            .filter(|account| seen.insert(account.key()))
            .collect();

        let range = SyncRange::around(Utc::now(), self.sync_days);
        let results = join_all(
            accounts
                .iter()
                .map(|account| self.fetch_account(account, range)),
        )
        .await;

        let mut snapshot = EventSnapshot {
            fetched_at: Some(Utc::now()),
            generation,
            ..EventSnapshot::default()
        };
        let mut dropped = 0;

        for (account, result) in accounts.iter().zip(results) {
            snapshot.accounts.push(account.key());
            match result {
                Ok((events, malformed)) => {
                    snapshot.events.extend(events);
                    dropped += malformed;
                }
                Err(e) => {
                    warn!(account = %account.key(), error = %e, "fetch failed");
                    snapshot.failures.push(AccountFailure {
                        account: account.key(),
                        reauthorization_required: e.needs_reauthorization(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            accounts = snapshot.accounts.len(),
            events = snapshot.events.len(),
            failures = snapshot.failures.len(),
            dropped,
            "event snapshot refreshed"
        );

        let snapshot = Arc::new(snapshot);
        let superseded = {
            let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
            if cache.generation < generation {
                *cache = snapshot.clone();
                false
            } else {
                debug!(generation, published = cache.generation, "discarding stale snapshot");
                true
            }
        };

        RefreshReport {
            snapshot,
            dropped,
            superseded,
        }
    }

    /// `refresh_all` over every account in the credential store.
    pub async fn refresh_stored(&self) -> RefreshReport {
        let accounts = self.manager.accounts();
        self.refresh_all(&accounts).await
    }

    pub fn snapshot(&self) -> Arc<EventSnapshot> {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn day(&self, date: NaiveDate) -> Vec<Event> {
        self.query(TimeWindow::Day(date))
    }

    pub fn week(&self, date: NaiveDate) -> Vec<Event> {
        self.query(TimeWindow::Week {
            anchor: date,
            week_start: self.week_start,
        })
    }

    pub fn month(&self, date: NaiveDate) -> Vec<Event> {
        self.query(TimeWindow::Month(date))
    }

    pub fn event(&self, account: &AccountKey, id: &str) -> Option<Event> {
        self.snapshot().event(account, id).cloned()
    }

    /// Events of the current snapshot inside `window`, in start order.
    pub fn query(&self, window: TimeWindow) -> Vec<Event> {
        let snapshot = self.snapshot();
        let mut events: Vec<Event> = snapshot
            .events
            .iter()
            .filter(|event| window.includes(event, &self.timezone))
            .cloned()
            .collect();

        events.sort_by_cached_key(|event| {
            (
                event
                    .start_time()
                    .map(|start| start.sort_instant(&self.timezone)),
                event.summary.clone(),
            )
        });
        events
    }

    /// Create `event` in `account`'s calendar.
    pub async fn create_event(&self, account: &Account, event: Event) -> CalmergeResult<Event> {
        let gateway = self.gateway(account.provider)?;

        let mut draft = event;
        draft.provider = account.provider;
        draft.calendar_email = account.email.clone();

        let (used, raw) = self
            .manager
            .call_with_refresh(account, |acct| {
                let gateway = gateway.clone();
                let draft = draft.clone();
                async move { gateway.create(&acct, &draft).await }
            })
            .await?;

        let created = gateway.normalize(&raw, &used.email)?;
        info!(account = %used.key(), id = %created.id, "event created");

        self.refresh_stored().await;
        Ok(created)
    }

    /// Save an edited event back to its owning account. An event without an
    /// id is created instead.
    pub async fn update_event(&self, event: Event) -> CalmergeResult<UpdateOutcome> {
        let account = self.manager.account(event.provider, &event.calendar_email)?;

        if event.is_draft() {
            return self
                .create_event(&account, event)
                .await
                .map(UpdateOutcome::Created);
        }

        let gateway = self.gateway(account.provider)?;
        let result = self
            .manager
            .call_with_refresh(&account, |acct| {
                let gateway = gateway.clone();
                let event = event.clone();
                async move { gateway.update(&acct, &event).await }
            })
            .await;

        match result {
            Ok((used, raw)) => {
                let updated = gateway.normalize(&raw, &used.email)?;
                info!(account = %used.key(), id = %updated.id, "event updated");
                self.refresh_stored().await;
                Ok(UpdateOutcome::Updated(updated))
            }
            Err(CalmergeError::ProviderRejected { status: 403, .. }) => {
                info!(account = %account.key(), id = %event.id, "calendar is read-only, saving as new event");
                let created = self.create_event(&account, event.as_new()).await?;
                Ok(UpdateOutcome::SavedAsNew(created))
            }
            Err(e) => Err(e),
        }
    }

    /// Delete `account`'s event `event_id` from the current snapshot.
    pub async fn delete_event(&self, account: &AccountKey, event_id: &str) -> CalmergeResult<()> {
        let event = self
            .event(account, event_id)
            .ok_or_else(|| CalmergeError::EventNotFound(event_id.to_string()))?;
        let account = self.manager.account(event.provider, &event.calendar_email)?;
        let gateway = self.gateway(account.provider)?;

        self.manager
            .call_with_refresh(&account, |acct| {
                let gateway = gateway.clone();
                let event = event.clone();
                async move { gateway.delete(&acct, &event).await }
            })
            .await?;
        info!(account = %account.key(), id = event_id, "event deleted");

        self.refresh_stored().await;
        Ok(())
    }

    async fn fetch_account(
        &self,
        account: &Account,
        range: SyncRange,
    ) -> CalmergeResult<(Vec<Event>, usize)> {
        let gateway = self.gateway(account.provider)?;

        let (used, raws) = tokio::time::timeout(
            self.fetch_timeout,
            self.manager.call_with_refresh(account, |acct| {
                let gateway = gateway.clone();
                async move { gateway.fetch(&acct, &range).await }
            }),
        )
        .await
        .map_err(|_| CalmergeError::Timeout(self.fetch_timeout.as_secs()))??;

        let mut events = Vec::with_capacity(raws.len());
        let mut dropped = 0;
        for raw in &raws {
            match gateway.normalize(raw, &used.email) {
                Ok(event) => events.push(event),
                Err(e) => {
                    debug!(account = %used.key(), error = %e, "dropping malformed event");
                    dropped += 1;
                }
            }
        }

        Ok((events, dropped))
    }

    fn gateway(&self, provider: Provider) -> CalmergeResult<Arc<dyn EventGateway>> {
        self.gateways
            .get(&provider)
            .cloned()
            .ok_or(CalmergeError::ProviderNotConfigured(provider))
    }
}
