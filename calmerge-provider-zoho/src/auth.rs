//! Zoho OAuth: authorization code flow and refresh-token grant.
//!
//! An attempt walks `RedirectedToConsentPage → CodeReceived → TokenExchanged`.
//! Zoho reports most token endpoint errors with HTTP 200 and an `error` field,
//! so the body is always inspected.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use calmerge_core::auth::{
    AuthAdapter, AuthAttempts, AuthPhase, AuthResolution, AuthStep, PendingAction, TokenGrant,
    with_timeout,
};
use calmerge_core::constants::{DEFAULT_EXPIRES_IN_SECS, DEFAULT_NETWORK_TIMEOUT_SECS};
use calmerge_core::{Account, AuthFailure, CalmergeError, CalmergeResult, Provider};

use crate::authorization_header;
use crate::config::ZohoConfig;

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct UserInfo {
    #[serde(rename = "Email", default)]
    email: Option<String>,
    #[serde(rename = "Display_Name", default)]
    display_name: Option<String>,
}

pub struct ZohoAuthAdapter {
    config: ZohoConfig,
    http: reqwest::Client,
    attempts: AuthAttempts,
    timeout: Duration,
}

impl ZohoAuthAdapter {
    pub fn new(config: ZohoConfig) -> Self {
        ZohoAuthAdapter {
            config,
            http: reqwest::Client::new(),
            attempts: AuthAttempts::new(),
            timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Consent page URL. No network access.
    pub fn authorization_url(&self, state: &str) -> CalmergeResult<String> {
        let mut url = Url::parse(&self.config.auth_endpoint())
            .map_err(|e| CalmergeError::Config(format!("zoho.accounts_url: {e}")))?;

        url.query_pairs_mut()
            .append_pair("scope", &self.config.scopes.join(","))
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("access_type", "offline")
            .append_pair("prompt", "consent")
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("state", state);

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
        form.push(("client_secret", self.config.client_secret.as_str()));

        let response = self
            .http
            .post(self.config.token_endpoint())
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthFailure::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthFailure::Network(e.to_string()))?;

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            AuthFailure::Parsing(format!("Zoho token response ({status}): {e}"))
        })?;

        if let Some(error) = token.error {
            return Err(AuthFailure::Parsing(format!("Zoho token endpoint: {error}")));
        }
        if !status.is_success() {
            return Err(AuthFailure::Other(format!(
                "Zoho token endpoint answered {status}: {body}"
            )));
        }

        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthFailure::Parsing("Zoho token response has no access_token".into()))?;

        Ok(TokenGrant {
            access_token,
            refresh_token: token.refresh_token.filter(|t| !t.is_empty()),
            expires_in: token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        })
    }

    async fn user_info(&self, access_token: &str) -> Result<(String, Option<String>), AuthFailure> {
        let response = self
            .http
            .get(self.config.user_info_endpoint())
            .header(AUTHORIZATION, authorization_header(access_token))
            .send()
            .await
            .map_err(|e| AuthFailure::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthFailure::Other(format!(
                "Zoho profile lookup answered {}",
                response.status()
            )));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| AuthFailure::Parsing(format!("Zoho profile: {e}")))?;

        let email = info
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AuthFailure::Parsing("Zoho profile has no Email".into()))?;

        Ok((email, info.display_name))
    }
}

#[async_trait]
impl AuthAdapter for ZohoAuthAdapter {
    fn provider(&self) -> Provider {
        Provider::Zoho
    }

    async fn begin_authorization(&self) -> CalmergeResult<AuthStep> {
        let state = self.attempts.begin(AuthPhase::RedirectedToConsentPage);
        let url = match self.authorization_url(&state) {
            Ok(url) => url,
            Err(e) => {
                self.attempts
                    .advance(&state, AuthPhase::Failed(AuthFailure::Other(e.to_string())));
                return Err(e);
            }
        };
        debug!(state = %state, "Zoho consent page ready");

        Ok(AuthStep::Pending(PendingAction {
            provider: Provider::Zoho,
            state,
            url,
            email_hint: None,
        }))
    }

    async fn complete_authorization(&self, resolution: AuthResolution) -> CalmergeResult<Account> {
        let state = resolution.state().to_string();
        self.attempts
            .expect(&state, &AuthPhase::RedirectedToConsentPage)?;

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
        self.attempts.advance(&state, AuthPhase::CodeReceived);

        let grant = match with_timeout(self.timeout, self.exchange_code(&code)).await {
            Ok(grant) => grant,
            Err(failure) => return Err(self.attempts.fail(&state, failure)),
        };

        let (email, display_name) =
            match with_timeout(self.timeout, self.user_info(&grant.access_token)).await {
                Ok(profile) => profile,
                Err(failure) => return Err(self.attempts.fail(&state, failure)),
            };

        self.attempts.advance(&state, AuthPhase::TokenExchanged);
        info!(email = %email, "Zoho account authorized");

        Ok(Account::from_grant(
            Provider::Zoho,
            &email,
            display_name.as_deref(),
            grant,
        ))
    }

    fn cancel_authorization(&self, state: &str) {
        self.attempts
            .advance(state, AuthPhase::Failed(AuthFailure::Cancelled));
    }

    async fn refresh(&self, account: &Account) -> CalmergeResult<Account> {
        let refresh_token = account
            .refresh_token
            .as_deref()
            .ok_or(AuthFailure::NoCredential)?;

        let grant = with_timeout(
            self.timeout,
            self.token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ]),
        )
        .await?;

        Ok(account.with_grant(grant))
    }

    fn phase(&self, state: &str) -> AuthPhase {
        self.attempts.phase(state)
    }
}
