//! In-memory auth adapter and gateway used by the core crate's tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};

use crate::account::Account;
use crate::auth::{AuthAdapter, AuthAttempts, AuthPhase, AuthResolution, AuthStep, PendingAction, TokenGrant};
use crate::error::{AuthFailure, CalmergeError, CalmergeResult};
use crate::event::Event;
use crate::gateway::{EventGateway, RawEvent};
use crate::provider::Provider;
use crate::sync_range::SyncRange;

pub fn account_expiring_in(provider: Provider, email: &str, secs: i64) -> Account {
    Account {
        provider,
        email: email.to_string(),
        display_name: email.to_string(),
        access_token: format!("token-{email}"),
        refresh_token: Some(format!("refresh-{email}")),
        expires_at: (Utc::now() + chrono::Duration::seconds(secs)).trunc_subsecs(3),
    }
}

pub struct MockAdapter {
    provider: Provider,
    pub refreshes: AtomicUsize,
    fail_refresh: AtomicBool,
    delay: Option<Duration>,
    login_refresh_token: bool,
    attempts: AuthAttempts,
}

impl MockAdapter {
    pub const LOGIN_EMAIL: &'static str = "new@example.com";

    pub fn new(provider: Provider) -> Self {
        MockAdapter {
            provider,
            refreshes: AtomicUsize::new(0),
            fail_refresh: AtomicBool::new(false),
            delay: None,
            login_refresh_token: true,
            attempts: AuthAttempts::new(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn without_login_refresh_token(mut self) -> Self {
        self.login_refresh_token = false;
        self
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthAdapter for MockAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn begin_authorization(&self) -> CalmergeResult<AuthStep> {
        let state = self.attempts.begin(AuthPhase::RedirectedToConsentPage);
        Ok(AuthStep::Pending(PendingAction {
            provider: self.provider,
            url: format!("https://consent.example/auth?state={state}"),
            state,
            email_hint: None,
        }))
    }

    async fn complete_authorization(&self, resolution: AuthResolution) -> CalmergeResult<Account> {
        let state = resolution.state().to_string();
        self.attempts
            .expect(&state, &AuthPhase::RedirectedToConsentPage)?;

        match resolution {
            AuthResolution::Code { .. } => {
                self.attempts.advance(&state, AuthPhase::TokenExchanged);
                Ok(Account::from_grant(
                    self.provider,
                    Self::LOGIN_EMAIL,
                    None,
                    TokenGrant {
                        access_token: "login-token".to_string(),
                        refresh_token: self
                            .login_refresh_token
                            .then(|| "login-refresh".to_string()),
                        expires_in: 3600,
                    },
                ))
            }
            AuthResolution::Cancelled { .. } => Err(self.attempts.fail(&state, AuthFailure::Cancelled)),
            AuthResolution::Denied { reason, .. } => {
                Err(self.attempts.fail(&state, AuthFailure::Other(reason)))
            }
        }
    }

    fn cancel_authorization(&self, state: &str) {
        self.attempts
            .advance(state, AuthPhase::Failed(AuthFailure::Cancelled));
    }

    async fn refresh(&self, account: &Account) -> CalmergeResult<Account> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(AuthFailure::Other("refresh token revoked".to_string()).into());
        }
        Ok(account.with_grant(TokenGrant {
            access_token: format!("{}-refreshed-{n}", account.email),
            refresh_token: None,
            expires_in: 3600,
        }))
    }

    fn phase(&self, state: &str) -> AuthPhase {
        self.attempts.phase(state)
    }
}

/// A fake provider API holding raw event payloads per account email.
pub struct MockGateway {
    provider: Provider,
    calendars: Mutex<HashMap<String, Vec<serde_json::Value>>>,
    failing: Mutex<HashSet<String>>,
    rejected_tokens: Mutex<HashSet<String>>,
    read_only: Mutex<HashSet<String>>,
    read_only_calendars: Mutex<HashSet<String>>,
    fetch_delays: Mutex<HashMap<String, Duration>>,
    pub seen_tokens: Mutex<Vec<String>>,
    pub fetches: AtomicUsize,
    next_id: AtomicUsize,
}

impl MockGateway {
    pub fn new(provider: Provider) -> Self {
        MockGateway {
            provider,
            calendars: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            rejected_tokens: Mutex::new(HashSet::new()),
            read_only: Mutex::new(HashSet::new()),
            read_only_calendars: Mutex::new(HashSet::new()),
            fetch_delays: Mutex::new(HashMap::new()),
            seen_tokens: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn add_event(&self, email: &str, id: &str, summary: &str, start: &str, end: &str) {
        let mut event = Event::draft(self.provider, email);
        event.id = id.to_string();
        event.summary = summary.to_string();
        event.start = start.to_string();
        event.end = end.to_string();
        event.provider_event_tag = Some(format!("etag-{id}"));
        self.add_raw(email, serde_json::to_value(event).unwrap());
    }

    pub fn add_raw(&self, email: &str, payload: serde_json::Value) {
        self.calendars
            .lock()
            .unwrap()
            .entry(email.to_string())
            .or_default()
            .push(payload);
    }

    pub fn fail_fetch_for(&self, email: &str) {
        self.failing.lock().unwrap().insert(email.to_string());
    }

    pub fn reject_token(&self, token: &str) {
        self.rejected_tokens.lock().unwrap().insert(token.to_string());
    }

    pub fn make_read_only(&self, event_id: &str) {
        self.read_only.lock().unwrap().insert(event_id.to_string());
    }

    /// Writes that target this calendar id are refused with a 403.
    pub fn make_calendar_read_only(&self, calendar_id: &str) {
        self.read_only_calendars
            .lock()
            .unwrap()
            .insert(calendar_id.to_string());
    }

    pub fn slow_fetch_for(&self, email: &str, delay: Duration) {
        self.fetch_delays
            .lock()
            .unwrap()
            .insert(email.to_string(), delay);
    }

    pub fn stored_events(&self, email: &str) -> Vec<serde_json::Value> {
        self.calendars
            .lock()
            .unwrap()
            .get(email)
            .cloned()
            .unwrap_or_default()
    }

    fn authorize(&self, account: &Account) -> CalmergeResult<()> {
        self.seen_tokens
            .lock()
            .unwrap()
            .push(account.access_token.clone());
        if self.rejected_tokens.lock().unwrap().contains(&account.access_token) {
            return Err(CalmergeError::TokenExpired(account.email.clone()));
        }
        Ok(())
    }

    fn check_writable(&self, event: &Event) -> CalmergeResult<()> {
        let calendar_locked = event
            .calendar_id
            .as_ref()
            .is_some_and(|id| self.read_only_calendars.lock().unwrap().contains(id));
        if calendar_locked || self.read_only.lock().unwrap().contains(&event.id) {
            return Err(CalmergeError::ProviderRejected {
                status: 403,
                body: "read-only calendar".to_string(),
            });
        }
        Ok(())
    }

    fn raw(&self, payload: serde_json::Value) -> RawEvent {
        RawEvent::new(self.provider, None, payload)
    }
}

#[async_trait]
impl EventGateway for MockGateway {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn fetch(&self, account: &Account, _range: &SyncRange) -> CalmergeResult<Vec<RawEvent>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.authorize(account)?;
        let delay = self.fetch_delays.lock().unwrap().get(&account.email).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&account.email) {
            return Err(CalmergeError::ProviderRejected {
                status: 500,
                body: "backend error".to_string(),
            });
        }
        Ok(self
            .stored_events(&account.email)
            .into_iter()
            .map(|payload| self.raw(payload))
            .collect())
    }

    async fn create(&self, account: &Account, event: &Event) -> CalmergeResult<RawEvent> {
        self.authorize(account)?;
        self.check_writable(event)?;
        let mut created = event.clone();
        created.id = format!("new-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        created.provider_event_tag = Some(format!("etag-{}", created.id));
        let payload = serde_json::to_value(&created).unwrap();
        self.add_raw(&account.email, payload.clone());
        Ok(self.raw(payload))
    }

    async fn update(&self, account: &Account, event: &Event) -> CalmergeResult<RawEvent> {
        self.authorize(account)?;
        self.check_writable(event)?;

        let payload = serde_json::to_value(event).unwrap();
        let mut calendars = self.calendars.lock().unwrap();
        let events = calendars.entry(account.email.clone()).or_default();
        match events.iter_mut().find(|e| e["id"] == event.id.as_str()) {
            Some(existing) => *existing = payload.clone(),
            None => {
                return Err(CalmergeError::ProviderRejected {
                    status: 404,
                    body: "not found".to_string(),
                });
            }
        }
        Ok(self.raw(payload))
    }

    async fn delete(&self, account: &Account, event: &Event) -> CalmergeResult<()> {
        self.authorize(account)?;
        if let Some(events) = self.calendars.lock().unwrap().get_mut(&account.email) {
            events.retain(|e| e["id"] != event.id.as_str());
        }
        Ok(())
    }

    fn normalize(&self, raw: &RawEvent, account_email: &str) -> CalmergeResult<Event> {
        let mut event: Event = serde_json::from_value(raw.payload.clone())
            .map_err(|e| CalmergeError::MalformedData(e.to_string()))?;
        event.calendar_email = account_email.to_string();
        event.provider = self.provider;
        Ok(event)
    }
}
