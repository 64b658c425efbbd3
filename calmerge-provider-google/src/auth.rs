//! Google OAuth: identity, consent and token refresh.
//!
//! An attempt walks `AwaitingIdentity → AwaitingConsent → Authorized`. The
//! identity comes from the host's `IdentityBroker`; calendar access is then
//! either granted silently by the broker or requested on Google's consent
//! page, whose authorization code is exchanged at the token endpoint. A
//! consent-page account is named after the primary calendar of the granted
//! token, not after the identity that was hinted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use calmerge_core::auth::{
    AuthAdapter, AuthAttempts, AuthPhase, AuthResolution, AuthStep, PendingAction, TokenGrant,
    with_timeout,
};
use calmerge_core::constants::{DEFAULT_EXPIRES_IN_SECS, DEFAULT_NETWORK_TIMEOUT_SECS};
use calmerge_core::{Account, AuthFailure, CalmergeError, CalmergeResult, Provider};

use crate::SCOPES;
use crate::config::GoogleConfig;
use crate::identity::{GoogleIdentity, IdentityBroker};

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl From<TokenResponse> for TokenGrant {
    fn from(response: TokenResponse) -> Self {
        TokenGrant {
            access_token: response.access_token,
            // Google typically doesn't return a new refresh_token on refresh
            refresh_token: response.refresh_token.filter(|t| !t.is_empty()),
            expires_in: response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        }
    }
}

pub struct GoogleAuthAdapter {
    config: GoogleConfig,
    broker: Arc<dyn IdentityBroker>,
    http: reqwest::Client,
    attempts: AuthAttempts,
    timeout: Duration,
}

impl GoogleAuthAdapter {
    pub fn new(config: GoogleConfig, broker: Arc<dyn IdentityBroker>) -> Self {
        GoogleAuthAdapter {
            config,
            broker,
            http: reqwest::Client::new(),
            attempts: AuthAttempts::new(),
            timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Silent grant from the broker, or the consent page for `identity`.
    async fn authorize_calendar_access(
        &self,
        state: &str,
        identity: Option<GoogleIdentity>,
    ) -> CalmergeResult<AuthStep> {
        if let Some(identity) = &identity {
            let silent = with_timeout(
                self.timeout,
                self.broker.silent_authorization(&identity.email, SCOPES),
            )
            .await;

            match silent {
                Ok(Some(grant)) => {
                    self.attempts.advance(state, AuthPhase::Authorized);
                    info!(email = %identity.email, "calendar access granted without consent page");
                    return Ok(AuthStep::Authorized(Account::from_grant(
                        Provider::Google,
                        &identity.email,
                        identity.display_name.as_deref(),
                        grant,
                    )));
                }
                Ok(None) => {}
                Err(failure) => return Err(self.attempts.fail(state, failure)),
            }
        }

        let email_hint = identity.map(|i| i.email);
        let url = self.consent_url(state, email_hint.as_deref())?;
        debug!(state, "calendar access needs consent");

        Ok(AuthStep::Pending(PendingAction {
            provider: Provider::Google,
            state: state.to_string(),
            url,
            email_hint,
        }))
    }

    pub fn consent_url(&self, state: &str, login_hint: Option<&str>) -> CalmergeResult<String> {
        let mut url = Url::parse(&self.config.auth_url)
            .map_err(|e| CalmergeError::Config(format!("google.auth_url: {e}")))?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("scope", &SCOPES.join(" "))
                .append_pair("access_type", "offline")
                .append_pair("prompt", "consent")
                .append_pair("state", state);
            if let Some(hint) = login_hint.or(self.config.login_hint.as_deref()) {
                query.append_pair("login_hint", hint);
            }
        }

        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant, AuthFailure> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ])
        .await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenGrant, AuthFailure> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        form.push(("client_id", self.config.client_id.as_str()));
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthFailure::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthFailure::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(AuthFailure::Other(format!(
                "Google token endpoint answered {status}: {body}"
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| AuthFailure::Parsing(format!("Google token response: {e}")))?;
        Ok(token.into())
    }

    /// The primary calendar's id is the signed-in account's email.
    async fn primary_calendar_identity(
        &self,
        access_token: &str,
    ) -> Result<GoogleIdentity, AuthFailure> {
        #[derive(Deserialize)]
        struct CalendarResource {
            id: String,
        }

        let url = format!("{}/calendars/primary", self.config.api_base.trim_end_matches('/'));
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthFailure::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthFailure::Other(format!(
                "could not read primary calendar ({})",
                response.status()
            )));
        }

        let calendar: CalendarResource = response
            .json()
            .await
            .map_err(|e| AuthFailure::Parsing(format!("primary calendar: {e}")))?;

        Ok(GoogleIdentity {
            email: calendar.id,
            display_name: None,
        })
    }
}

#[async_trait]
impl AuthAdapter for GoogleAuthAdapter {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn begin_authorization(&self) -> CalmergeResult<AuthStep> {
        let state = self.attempts.begin(AuthPhase::AwaitingIdentity);

        let identity = match with_timeout(self.timeout, self.broker.sign_in()).await {
            Ok(identity) => identity,
            Err(failure) => return Err(self.attempts.fail(&state, failure)),
        };

        if let Some(identity) = &identity {
            self.attempts
                .set_identity(&state, &identity.email, identity.display_name.as_deref());
        }
        self.attempts.advance(&state, AuthPhase::AwaitingConsent);

        self.authorize_calendar_access(&state, identity).await
    }

    async fn complete_authorization(&self, resolution: AuthResolution) -> CalmergeResult<Account> {
        let state = resolution.state().to_string();
        let attempt = self.attempts.expect(&state, &AuthPhase::AwaitingConsent)?;

        let code = match resolution {
            AuthResolution::Code { code, .. } => code,
            AuthResolution::Cancelled { .. } => {
                return Err(self.attempts.fail(&state, AuthFailure::Cancelled));
            }
            AuthResolution::Denied { reason, .. } => {
                return Err(self
                    .attempts
                    .fail(&state, AuthFailure::Other(format!("consent denied: {reason}"))));
            }
        };

        let grant = match with_timeout(self.timeout, self.exchange_code(&code)).await {
            Ok(grant) => grant,
            Err(failure) => return Err(self.attempts.fail(&state, failure)),
        };

        // The hint only pre-fills the consent page; the user may pick
        // another account there, so the token decides whose account this is.
        let mut identity = match with_timeout(
            self.timeout,
            self.primary_calendar_identity(&grant.access_token),
        )
        .await
        {
            Ok(identity) => identity,
            Err(failure) => return Err(self.attempts.fail(&state, failure)),
        };
        match attempt.email {
            Some(hint) if hint.eq_ignore_ascii_case(&identity.email) => {
                identity.display_name = attempt.display_name;
            }
            Some(hint) => {
                warn!(hint = %hint, email = %identity.email, "consent granted for a different Google account");
            }
            None => {}
        }

        self.attempts.advance(&state, AuthPhase::Authorized);
        info!(email = %identity.email, "Google account authorized");

        Ok(Account::from_grant(
            Provider::Google,
            &identity.email,
            identity.display_name.as_deref(),
            grant,
        ))
    }

    fn cancel_authorization(&self, state: &str) {
        self.attempts
            .advance(state, AuthPhase::Failed(AuthFailure::Cancelled));
    }

    async fn refresh(&self, account: &Account) -> CalmergeResult<Account> {
        if let Some(refresh_token) = &account.refresh_token {
            let grant = with_timeout(
                self.timeout,
                self.token_request(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token.as_str()),
                ]),
            )
            .await?;
            return Ok(account.with_grant(grant));
        }

        let silent = with_timeout(
            self.timeout,
            self.broker.silent_authorization(&account.email, SCOPES),
        )
        .await?;

        match silent {
            Some(grant) => Ok(account.with_grant(grant)),
            None => Err(AuthFailure::NoCredential.into()),
        }
    }

    fn phase(&self, state: &str) -> AuthPhase {
        self.attempts.phase(state)
    }
}
