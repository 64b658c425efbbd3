//! The capability every provider's OAuth flow is expressed through.
//!
//! Google and Zoho authorize in structurally different ways, but both reduce
//! to the same two-phase handshake: `begin_authorization` either finishes on
//! its own or hands the host a `PendingAction` (a consent page to show), and
//! `complete_authorization` resumes once the host has the redirect result.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::account::Account;
use crate::error::{AuthFailure, CalmergeError, CalmergeResult};
use crate::provider::Provider;

/// Tokens handed out by a provider's token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds
    pub expires_in: i64,
}

impl TokenGrant {
    /// Millisecond precision, the resolution accounts are persisted with.
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        (now + chrono::Duration::seconds(self.expires_in.max(0))).trunc_subsecs(3)
    }
}

/// Something the host UI has to resolve before authorization can finish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    pub provider: Provider,
    /// Correlates the resolution with the attempt that produced it.
    pub state: String,
    /// Consent page to open.
    pub url: String,
    /// Identity the consent is being requested for, when already known.
    pub email_hint: Option<String>,
}

/// What the host reports back after resolving a `PendingAction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResolution {
    Code { state: String, code: String },
    Cancelled { state: String },
    Denied { state: String, reason: String },
}

impl AuthResolution {
    pub fn state(&self) -> &str {
        match self {
            AuthResolution::Code { state, .. }
            | AuthResolution::Cancelled { state }
            | AuthResolution::Denied { state, .. } => state,
        }
    }

    /// Read the resolution out of an OAuth redirect URL
    /// (`…?code=…&state=…` or `…?error=…&state=…`).
    pub fn from_redirect(redirect: &str) -> CalmergeResult<Self> {
        let url = Url::parse(redirect)
            .map_err(|e| AuthFailure::Parsing(format!("invalid redirect '{redirect}': {e}")))?;
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        let state = params
            .get("state")
            .cloned()
            .ok_or_else(|| AuthFailure::Parsing("redirect has no 'state'".into()))?;

        if let Some(code) = params.get("code") {
            return Ok(AuthResolution::Code {
                state,
                code: code.clone(),
            });
        }

        match params.get("error").map(String::as_str) {
            Some("access_denied") => Ok(AuthResolution::Cancelled { state }),
            Some(reason) => Ok(AuthResolution::Denied {
                state,
                reason: reason.to_string(),
            }),
            None => Err(AuthFailure::Parsing("redirect has neither 'code' nor 'error'".into()).into()),
        }
    }
}

/// Result of starting an authorization.
#[derive(Debug, Clone)]
pub enum AuthStep {
    Authorized(Account),
    Pending(PendingAction),
}

/// Where one authorization attempt currently stands.
///
/// Google walks `AwaitingIdentity → AwaitingConsent → Authorized`, Zoho walks
/// `RedirectedToConsentPage → CodeReceived → TokenExchanged`; both can end in
/// `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPhase {
    Idle,
    AwaitingIdentity,
    AwaitingConsent,
    RedirectedToConsentPage,
    CodeReceived,
    Authorized,
    TokenExchanged,
    Failed(AuthFailure),
}

impl AuthPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthPhase::Authorized | AuthPhase::TokenExchanged | AuthPhase::Failed(_)
        )
    }
}

#[async_trait]
pub trait AuthAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Start an interactive authorization.
    async fn begin_authorization(&self) -> CalmergeResult<AuthStep>;

    /// Resume an attempt after the host resolved its `PendingAction`.
    async fn complete_authorization(&self, resolution: AuthResolution) -> CalmergeResult<Account>;

    /// Abandon an attempt the user walked away from.
    fn cancel_authorization(&self, state: &str);

    /// Obtain a new access token without user interaction.
    async fn refresh(&self, account: &Account) -> CalmergeResult<Account>;

    fn phase(&self, state: &str) -> AuthPhase;
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub phase: AuthPhase,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

/// Bookkeeping for in-flight authorization attempts, keyed by OAuth `state`.
#[derive(Default)]
pub struct AuthAttempts {
    attempts: Mutex<HashMap<String, Attempt>>,
}

impl AuthAttempts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new attempt and return its `state` value.
    pub fn begin(&self, phase: AuthPhase) -> String {
        let state = uuid::Uuid::new_v4().simple().to_string();
        let mut attempts = self.lock();
        attempts.retain(|_, attempt| !attempt.phase.is_terminal());
        attempts.insert(
            state.clone(),
            Attempt {
                phase,
                email: None,
                display_name: None,
            },
        );
        state
    }

    pub fn advance(&self, state: &str, phase: AuthPhase) {
        if let Some(attempt) = self.lock().get_mut(state) {
            tracing::debug!(state, from = ?attempt.phase, to = ?phase, "authorization phase");
            attempt.phase = phase;
        }
    }

    pub fn set_identity(&self, state: &str, email: &str, display_name: Option<&str>) {
        if let Some(attempt) = self.lock().get_mut(state) {
            attempt.email = Some(email.to_string());
            attempt.display_name = display_name.map(str::to_string);
        }
    }

    pub fn get(&self, state: &str) -> Option<Attempt> {
        self.lock().get(state).cloned()
    }

    /// Look up an attempt that is waiting in `expected`; anything else is a
    /// stale or forged redirect.
    pub fn expect(&self, state: &str, expected: &AuthPhase) -> CalmergeResult<Attempt> {
        match self.get(state) {
            Some(attempt) if &attempt.phase == expected => Ok(attempt),
            Some(attempt) => Err(AuthFailure::Parsing(format!(
                "authorization {state} is {:?}, not {:?}",
                attempt.phase, expected
            ))
            .into()),
            None => Err(AuthFailure::Parsing(format!("unknown authorization state '{state}'")).into()),
        }
    }

    /// Record a failure and hand it back as an error.
    pub fn fail(&self, state: &str, failure: AuthFailure) -> CalmergeError {
        self.advance(state, AuthPhase::Failed(failure.clone()));
        CalmergeError::Auth(failure)
    }

    pub fn phase(&self, state: &str) -> AuthPhase {
        self.get(state)
            .map(|attempt| attempt.phase)
            .unwrap_or(AuthPhase::Idle)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Attempt>> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Bound a network-bound auth operation; expiry becomes `AuthFailure::Timeout`.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, AuthFailure>
where
    F: Future<Output = Result<T, AuthFailure>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| AuthFailure::Timeout(limit.as_secs()))?
}
