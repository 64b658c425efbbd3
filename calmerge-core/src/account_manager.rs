//! Keeps every linked account's access token usable.
//!
//! The manager owns the provider auth adapters and the credential store. It
//! answers "give me a valid account" with a silent refresh when the token is
//! close to expiry, and wraps gateway calls so that a single 401 is recovered
//! by one forced refresh and one retry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use crate::account::{Account, AccountKey};
use crate::auth::{AuthAdapter, AuthPhase, AuthResolution, AuthStep, PendingAction};
use crate::constants::DEFAULT_REFRESH_MARGIN_SECS;
use crate::credential_store::CredentialStore;
use crate::error::{AuthFailure, CalmergeError, CalmergeResult};
use crate::provider::Provider;

/// How an interactive login ended.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    LoggedIn(Account),
    /// The host must show `action.url` and call `complete_log_in` afterwards.
    Pending(PendingAction),
    Cancelled,
}

pub struct AccountManager {
    store: Arc<CredentialStore>,
    adapters: HashMap<Provider, Arc<dyn AuthAdapter>>,
    refresh_locks: Mutex<HashMap<AccountKey, Arc<tokio::sync::Mutex<()>>>>,
    safety_margin: Duration,
}

impl AccountManager {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        AccountManager {
            store,
            adapters: HashMap::new(),
            refresh_locks: Mutex::new(HashMap::new()),
            safety_margin: Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS),
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn AuthAdapter>) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.store.load_every()
    }

    pub fn account(&self, provider: Provider, email: &str) -> CalmergeResult<Account> {
        self.store
            .find(provider, email)
            .ok_or_else(|| CalmergeError::AccountNotFound {
                provider,
                email: email.to_string(),
            })
    }

    /// Return an account whose token stays valid for at least the safety
    /// margin, refreshing silently if needed.
    ///
    /// Fails with `AccountNotFound` once the account has been logged out.
    pub async fn ensure_valid_account(&self, account: &Account) -> CalmergeResult<Account> {
        let current = self.latest(account)?;
        if current.is_fresh(self.safety_margin, Utc::now()) {
            return Ok(current);
        }

        let lock = self.refresh_lock(&account.key());
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited.
        let current = self.latest(account)?;
        if current.is_fresh(self.safety_margin, Utc::now()) {
            debug!(account = %current.key(), "token refreshed by a concurrent caller");
            return Ok(current);
        }

        self.refresh_now(&current).await
    }

    /// Refresh after the provider rejected `rejected.access_token`.
    pub async fn force_refresh(&self, rejected: &Account) -> CalmergeResult<Account> {
        let lock = self.refresh_lock(&rejected.key());
        let _guard = lock.lock().await;

        let current = self.latest(rejected)?;
        if current.access_token != rejected.access_token
            && current.is_fresh(self.safety_margin, Utc::now())
        {
            debug!(account = %current.key(), "rejected token already replaced");
            return Ok(current);
        }

        self.refresh_now(&current).await
    }

    /// Run `op` with a valid account. A `TokenExpired` answer triggers one
    /// forced refresh and one retry; a second rejection means the user has
    /// to log in again.
    ///
    /// Returns the account the successful call used alongside its result.
    pub async fn call_with_refresh<T, F, Fut>(
        &self,
        account: &Account,
        op: F,
    ) -> CalmergeResult<(Account, T)>
    where
        F: Fn(Account) -> Fut,
        Fut: Future<Output = CalmergeResult<T>>,
    {
        let valid = self.ensure_valid_account(account).await?;

        match op(valid.clone()).await {
            Ok(value) => Ok((valid, value)),
            Err(CalmergeError::TokenExpired(_)) => {
                info!(account = %valid.key(), "access token rejected, refreshing once");
                let refreshed = self.force_refresh(&valid).await?;

                match op(refreshed.clone()).await {
                    Ok(value) => Ok((refreshed, value)),
                    Err(CalmergeError::TokenExpired(_)) => {
                        warn!(account = %refreshed.key(), "refreshed token rejected too");
                        Err(CalmergeError::ReauthorizationRequired {
                            provider: refreshed.provider,
                            email: refreshed.email,
                        })
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Start an interactive login for `provider`.
    pub async fn log_in(&self, provider: Provider) -> CalmergeResult<LoginOutcome> {
        let adapter = self.adapter(provider)?;

        match adapter.begin_authorization().await {
            Ok(AuthStep::Authorized(account)) => {
                let account = self.persist_login(account)?;
                Ok(LoginOutcome::LoggedIn(account))
            }
            Ok(AuthStep::Pending(action)) => {
                debug!(%provider, state = %action.state, "login waiting for consent");
                Ok(LoginOutcome::Pending(action))
            }
            Err(CalmergeError::Auth(AuthFailure::Cancelled)) => Ok(LoginOutcome::Cancelled),
            Err(e) => Err(e),
        }
    }

    /// Resume a login after the host resolved the consent page.
    pub async fn complete_log_in(
        &self,
        provider: Provider,
        resolution: AuthResolution,
    ) -> CalmergeResult<LoginOutcome> {
        let adapter = self.adapter(provider)?;

        match adapter.complete_authorization(resolution).await {
            Ok(account) => {
                let account = self.persist_login(account)?;
                Ok(LoginOutcome::LoggedIn(account))
            }
            Err(CalmergeError::Auth(AuthFailure::Cancelled)) => {
                info!(%provider, "login cancelled");
                Ok(LoginOutcome::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    pub fn cancel_log_in(&self, provider: Provider, state: &str) -> CalmergeResult<()> {
        self.adapter(provider)?.cancel_authorization(state);
        Ok(())
    }

    pub fn login_phase(&self, provider: Provider, state: &str) -> CalmergeResult<AuthPhase> {
        Ok(self.adapter(provider)?.phase(state))
    }

    /// Forget an account. Returns whether it was linked.
    pub fn log_out(&self, provider: Provider, email: &str) -> CalmergeResult<bool> {
        let removed = self.store.remove(provider, email)?;
        self.locks().remove(&AccountKey::new(provider, email));
        if removed {
            info!(%provider, email, "account logged out");
        }
        Ok(removed)
    }

    fn adapter(&self, provider: Provider) -> CalmergeResult<&Arc<dyn AuthAdapter>> {
        self.adapters
            .get(&provider)
            .ok_or(CalmergeError::ProviderNotConfigured(provider))
    }

    /// The stored copy wins unless the caller holds a newer token. An
    /// account missing from the store has been logged out.
    fn latest(&self, account: &Account) -> CalmergeResult<Account> {
        match self.store.find(account.provider, &account.email) {
            Some(stored) if stored.expires_at >= account.expires_at => Ok(stored),
            Some(_) => Ok(account.clone()),
            None => Err(self.not_found(account)),
        }
    }

    fn not_found(&self, account: &Account) -> CalmergeError {
        CalmergeError::AccountNotFound {
            provider: account.provider,
            email: account.email.clone(),
        }
    }

    async fn refresh_now(&self, account: &Account) -> CalmergeResult<Account> {
        let adapter = self.adapter(account.provider)?;
        debug!(account = %account.key(), expires_at = %account.expires_at, "refreshing token");

        let mut refreshed = match adapter.refresh(account).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                warn!(account = %account.key(), error = %e, "silent refresh failed");
                return Err(CalmergeError::ReauthorizationRequired {
                    provider: account.provider,
                    email: account.email.clone(),
                });
            }
        };

        refreshed.provider = account.provider;
        refreshed.email = account.email.clone();
        if refreshed.refresh_token.is_none() {
            refreshed.refresh_token = account.refresh_token.clone();
        }

        if !self.store.replace_existing(refreshed.clone())? {
            info!(account = %refreshed.key(), "account logged out during refresh, discarding token");
            return Err(self.not_found(&refreshed));
        }
        info!(account = %refreshed.key(), expires_at = %refreshed.expires_at, "token refreshed");
        Ok(refreshed)
    }

    fn persist_login(&self, mut account: Account) -> CalmergeResult<Account> {
        if account.refresh_token.is_none() {
            account.refresh_token = self
                .store
                .find(account.provider, &account.email)
                .and_then(|existing| existing.refresh_token);
        }
        self.store.add_or_replace(account.clone())?;
        info!(account = %account.key(), "account linked");
        Ok(account)
    }

    fn refresh_lock(&self, key: &AccountKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks();
        // Only the map holds an idle lock
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key.clone()).or_default().clone()
    }

    fn locks(&self) -> std::sync::MutexGuard<'_, HashMap<AccountKey, Arc<tokio::sync::Mutex<()>>>> {
        self.refresh_locks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential_store::MemoryKeyValueStore;
    use crate::test_support::{MockAdapter, account_expiring_in};
    use std::sync::atomic::Ordering;

    fn manager_with(adapter: Arc<MockAdapter>) -> (Arc<CredentialStore>, AccountManager) {
        let store = Arc::new(CredentialStore::new(Arc::new(MemoryKeyValueStore::new())));
        let manager = AccountManager::new(store.clone()).with_adapter(adapter);
        (store, manager)
    }

    #[tokio::test]
    async fn test_fresh_account_is_returned_without_network() {
        let adapter = Arc::new(MockAdapter::new(Provider::Google));
        let (store, manager) = manager_with(adapter.clone());
        let account = account_expiring_in(Provider::Google, "a@example.com", 3600);
        store.add_or_replace(account.clone()).unwrap();

        let valid = manager.ensure_valid_account(&account).await.unwrap();

        assert_eq!(valid, account);
        assert_eq!(adapter.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_account_is_refreshed_exactly_once() {
        let adapter = Arc::new(MockAdapter::new(Provider::Zoho));
        let (store, manager) = manager_with(adapter.clone());
        let account = account_expiring_in(Provider::Zoho, "a@example.com", -60);
        store.add_or_replace(account.clone()).unwrap();

        let valid = manager.ensure_valid_account(&account).await.unwrap();

        assert_eq!(adapter.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(valid.email, account.email);
        assert!(valid.expires_at > account.expires_at);
        assert_eq!(valid.refresh_token, account.refresh_token);
        assert_eq!(store.find(Provider::Zoho, "a@example.com").unwrap(), valid);
    }

    #[tokio::test]
    async fn test_token_inside_safety_margin_is_refreshed() {
        let adapter = Arc::new(MockAdapter::new(Provider::Google));
        let (store, manager) = manager_with(adapter.clone());
        let account = account_expiring_in(Provider::Google, "a@example.com", 120);
        store.add_or_replace(account.clone()).unwrap();

        manager.ensure_valid_account(&account).await.unwrap();
        assert_eq!(adapter.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let adapter =
            Arc::new(MockAdapter::new(Provider::Google).with_delay(std::time::Duration::from_millis(50)));
        let (store, manager) = manager_with(adapter.clone());
        let account = account_expiring_in(Provider::Google, "a@example.com", -60);
        store.add_or_replace(account.clone()).unwrap();

        let calls = (0..5).map(|_| manager.ensure_valid_account(&account));
        let results = futures::future::join_all(calls).await;

        assert_eq!(adapter.refreshes.load(Ordering::SeqCst), 1);
        let tokens: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap().access_token)
            .collect();
        assert!(tokens.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_refresh_failure_requires_reauthorization_and_keeps_account() {
        let adapter = Arc::new(MockAdapter::new(Provider::Zoho));
        adapter.fail_refresh(true);
        let (store, manager) = manager_with(adapter.clone());
        let account = account_expiring_in(Provider::Zoho, "a@example.com", -60);
        store.add_or_replace(account.clone()).unwrap();

        let err = manager.ensure_valid_account(&account).await.unwrap_err();

        assert!(err.needs_reauthorization());
        assert_eq!(store.find(Provider::Zoho, "a@example.com").unwrap(), account);
    }

    #[tokio::test]
    async fn test_logged_out_account_is_not_refreshed_back_into_the_store() {
        let adapter = Arc::new(MockAdapter::new(Provider::Zoho));
        let (store, manager) = manager_with(adapter.clone());
        let expired = account_expiring_in(Provider::Zoho, "a@example.com", -60);
        store.add_or_replace(expired.clone()).unwrap();

        assert!(manager.log_out(Provider::Zoho, "a@example.com").unwrap());

        let err = manager.ensure_valid_account(&expired).await.unwrap_err();
        assert!(matches!(err, CalmergeError::AccountNotFound { .. }));
        assert!(matches!(
            manager.force_refresh(&expired).await,
            Err(CalmergeError::AccountNotFound { .. })
        ));
        assert_eq!(adapter.refreshes.load(Ordering::SeqCst), 0);
        assert!(store.find(Provider::Zoho, "a@example.com").is_none());
    }

    #[tokio::test]
    async fn test_logout_during_refresh_discards_the_new_token() {
        let adapter =
            Arc::new(MockAdapter::new(Provider::Zoho).with_delay(std::time::Duration::from_millis(50)));
        let (store, manager) = manager_with(adapter.clone());
        let expired = account_expiring_in(Provider::Zoho, "a@example.com", -60);
        store.add_or_replace(expired.clone()).unwrap();

        let refresh = manager.ensure_valid_account(&expired);
        let logout = async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            manager.log_out(Provider::Zoho, "a@example.com").unwrap()
        };
        let (refreshed, logged_out) = tokio::join!(refresh, logout);

        assert!(logged_out);
        assert!(matches!(refreshed, Err(CalmergeError::AccountNotFound { .. })));
        assert!(store.find(Provider::Zoho, "a@example.com").is_none());
    }

    #[tokio::test]
    async fn test_idle_refresh_locks_are_pruned() {
        let adapter = Arc::new(MockAdapter::new(Provider::Google));
        let (store, manager) = manager_with(adapter.clone());
        for email in ["a@example.com", "b@example.com", "c@example.com"] {
            let account = account_expiring_in(Provider::Google, email, -60);
            store.add_or_replace(account.clone()).unwrap();
            manager.ensure_valid_account(&account).await.unwrap();
        }

        assert_eq!(adapter.refreshes.load(Ordering::SeqCst), 3);
        assert_eq!(manager.locks().len(), 1);
    }

    #[tokio::test]
    async fn test_call_with_refresh_retries_once_after_401() {
        let adapter = Arc::new(MockAdapter::new(Provider::Google));
        let (store, manager) = manager_with(adapter.clone());
        let account = account_expiring_in(Provider::Google, "a@example.com", 3600);
        store.add_or_replace(account.clone()).unwrap();

        let calls = std::sync::atomic::AtomicUsize::new(0);
        let rejected = account.access_token.clone();
        let (used, value) = manager
            .call_with_refresh(&account, |acct| {
                calls.fetch_add(1, Ordering::SeqCst);
                let rejected = rejected.clone();
                async move {
                    if acct.access_token == rejected {
                        Err(CalmergeError::TokenExpired(acct.email))
                    } else {
                        Ok(acct.access_token.len())
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(adapter.refreshes.load(Ordering::SeqCst), 1);
        assert_ne!(used.access_token, account.access_token);
        assert_eq!(value, used.access_token.len());
    }

    #[tokio::test]
    async fn test_call_with_refresh_gives_up_after_second_401() {
        let adapter = Arc::new(MockAdapter::new(Provider::Google));
        let (store, manager) = manager_with(adapter.clone());
        let account = account_expiring_in(Provider::Google, "a@example.com", 3600);
        store.add_or_replace(account.clone()).unwrap();

        let err = manager
            .call_with_refresh(&account, |acct| async move {
                Err::<(), _>(CalmergeError::TokenExpired(acct.email))
            })
            .await
            .unwrap_err();

        assert!(err.needs_reauthorization());
        assert_eq!(adapter.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_login_through_consent_persists_account() {
        let adapter = Arc::new(MockAdapter::new(Provider::Zoho));
        let (store, manager) = manager_with(adapter.clone());

        let action = match manager.log_in(Provider::Zoho).await.unwrap() {
            LoginOutcome::Pending(action) => action,
            other => panic!("Expected Pending, got {:?}", other),
        };
        assert_eq!(
            manager.login_phase(Provider::Zoho, &action.state).unwrap(),
            AuthPhase::RedirectedToConsentPage
        );

        let outcome = manager
            .complete_log_in(
                Provider::Zoho,
                AuthResolution::Code {
                    state: action.state.clone(),
                    code: "code".to_string(),
                },
            )
            .await
            .unwrap();

        let account = match outcome {
            LoginOutcome::LoggedIn(account) => account,
            other => panic!("Expected LoggedIn, got {:?}", other),
        };
        assert_eq!(store.find(Provider::Zoho, &account.email).unwrap(), account);
        assert_eq!(
            manager.login_phase(Provider::Zoho, &action.state).unwrap(),
            AuthPhase::TokenExchanged
        );
    }

    #[tokio::test]
    async fn test_login_cancellation_is_an_outcome() {
        let adapter = Arc::new(MockAdapter::new(Provider::Zoho));
        let (store, manager) = manager_with(adapter.clone());

        let LoginOutcome::Pending(action) = manager.log_in(Provider::Zoho).await.unwrap() else {
            panic!("Expected Pending");
        };

        let outcome = manager
            .complete_log_in(
                Provider::Zoho,
                AuthResolution::Cancelled {
                    state: action.state.clone(),
                },
            )
            .await
            .unwrap();

        assert!(matches!(outcome, LoginOutcome::Cancelled));
        assert!(store.load_all(Provider::Zoho).is_empty());
        assert_eq!(
            manager.login_phase(Provider::Zoho, &action.state).unwrap(),
            AuthPhase::Failed(AuthFailure::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_relogin_keeps_refresh_token_when_grant_omits_it() {
        let adapter = Arc::new(MockAdapter::new(Provider::Google).without_login_refresh_token());
        let (store, manager) = manager_with(adapter.clone());
        let mut existing = account_expiring_in(Provider::Google, MockAdapter::LOGIN_EMAIL, -60);
        existing.refresh_token = Some("kept".to_string());
        store.add_or_replace(existing).unwrap();

        let LoginOutcome::Pending(action) = manager.log_in(Provider::Google).await.unwrap() else {
            panic!("Expected Pending");
        };
        manager
            .complete_log_in(
                Provider::Google,
                AuthResolution::Code {
                    state: action.state,
                    code: "code".to_string(),
                },
            )
            .await
            .unwrap();

        let accounts = store.load_all(Provider::Google);
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].refresh_token.as_deref(), Some("kept"));
    }

    #[tokio::test]
    async fn test_unconfigured_provider_and_logout() {
        let adapter = Arc::new(MockAdapter::new(Provider::Google));
        let (store, manager) = manager_with(adapter);

        assert!(matches!(
            manager.log_in(Provider::Zoho).await,
            Err(CalmergeError::ProviderNotConfigured(Provider::Zoho))
        ));

        store
            .add_or_replace(account_expiring_in(Provider::Google, "a@example.com", 3600))
            .unwrap();
        assert!(manager.log_out(Provider::Google, "a@example.com").unwrap());
        assert!(manager.accounts().is_empty());
        assert!(matches!(
            manager.account(Provider::Google, "a@example.com"),
            Err(CalmergeError::AccountNotFound { .. })
        ));
    }
}
