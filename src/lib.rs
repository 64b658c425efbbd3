//! calmerge: one merged calendar over every linked Google and Zoho account.
//!
//! `Calmerge` wires the credential store, the per-provider auth adapters and
//! gateways, the account manager and the aggregator from a `CalmergeConfig`.
//! Hosts talk to the returned `AccountManager` for logins and to the
//! `Aggregator` for refreshes, queries and edits.

pub mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use calmerge_core::account_manager::AccountManager;
use calmerge_core::aggregator::Aggregator;
use calmerge_core::credential_store::{CredentialStore, FileKeyValueStore, KeyValueStore};
use calmerge_core::gateway::EventGateway;
use calmerge_provider_google::{ConsentPageBroker, GoogleAuthAdapter, GoogleGateway};
use calmerge_provider_zoho::{ZohoAuthAdapter, ZohoGateway};

pub use calmerge_core::{
    Account, AccountKey, AuthFailure, CalmergeError, CalmergeResult, Event, EventTime, Provider,
};
pub use crate::config::CalmergeConfig;

pub struct Calmerge {
    store: Arc<CredentialStore>,
    manager: Arc<AccountManager>,
    aggregator: Arc<Aggregator>,
}

impl Calmerge {
    /// Load ~/.config/calmerge/config.toml and store accounts under the
    /// configured data directory.
    pub fn load() -> Result<Self> {
        Self::from_config(&CalmergeConfig::load()?)
    }

    pub fn from_config(config: &CalmergeConfig) -> Result<Self> {
        let data_dir = config.settings.data_dir()?;
        Self::with_store(config, Arc::new(FileKeyValueStore::new(data_dir)))
    }

    /// Build on an existing key-value store, e.g. one backed by the host's
    /// secure storage.
    pub fn with_store(config: &CalmergeConfig, kv: Arc<dyn KeyValueStore>) -> Result<Self> {
        config.validate()?;
        let settings = &config.settings;

        let store = Arc::new(CredentialStore::new(kv));
        let mut manager =
            AccountManager::new(store.clone()).with_safety_margin(settings.refresh_margin());
        let mut gateways: Vec<Arc<dyn EventGateway>> = Vec::new();

        if let Some(google) = &config.google {
            let broker = Arc::new(ConsentPageBroker::new(google.login_hint.clone()));
            manager = manager.with_adapter(Arc::new(
                GoogleAuthAdapter::new(google.clone(), broker)
                    .with_timeout(settings.network_timeout()),
            ));
            gateways.push(Arc::new(GoogleGateway::new(google.clone())));
        }

        if let Some(zoho) = &config.zoho {
            manager = manager.with_adapter(Arc::new(
                ZohoAuthAdapter::new(zoho.clone()).with_timeout(settings.network_timeout()),
            ));
            gateways.push(Arc::new(ZohoGateway::new(zoho.clone())));
        }

        let manager = Arc::new(manager);
        let mut aggregator = Aggregator::new(manager.clone())
            .with_week_start(settings.week_start()?)
            .with_timezone(settings.timezone()?)
            .with_fetch_timeout(settings.fetch_timeout())
            .with_sync_days(settings.sync_days);
        for gateway in gateways {
            aggregator = aggregator.with_gateway(gateway);
        }

        info!(
            google = config.google.is_some(),
            zoho = config.zoho.is_some(),
            accounts = store.load_every().len(),
            "calmerge ready"
        );

        Ok(Calmerge {
            store,
            manager,
            aggregator: Arc::new(aggregator),
        })
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn manager(&self) -> &Arc<AccountManager> {
        &self.manager
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }
}

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
/// Does nothing when the host already installed one.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log filter")?;

    // A host-installed subscriber wins
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use calmerge_core::account_manager::LoginOutcome;
    use calmerge_core::credential_store::MemoryKeyValueStore;
    use chrono::{Duration, SubsecRound, Utc};

    fn zoho_only() -> CalmergeConfig {
        CalmergeConfig::from_toml(
            r#"
[settings]
timezone = "UTC"

[zoho]
client_id = "1000.CLIENT"
client_secret = "s3cret"
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_only_configured_providers_can_log_in() {
        let calmerge =
            Calmerge::with_store(&zoho_only(), Arc::new(MemoryKeyValueStore::new())).unwrap();

        match calmerge.manager().log_in(Provider::Zoho).await.unwrap() {
            LoginOutcome::Pending(action) => {
                assert_eq!(action.provider, Provider::Zoho);
                assert!(action.url.contains("client_id=1000.CLIENT"));
            }
            other => panic!("expected a consent page, got {other:?}"),
        }

        assert!(matches!(
            calmerge.manager().log_in(Provider::Google).await,
            Err(CalmergeError::ProviderNotConfigured(Provider::Google))
        ));
    }

    #[tokio::test]
    async fn test_stored_accounts_survive_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = zoho_only();
        config.settings.data_dir = Some(dir.path().to_path_buf());

        let account = Account {
            provider: Provider::Zoho,
            email: "ana@zoho.eu".to_string(),
            display_name: "Ana".to_string(),
            access_token: "1000.tok".to_string(),
            refresh_token: Some("1000.refresh".to_string()),
            expires_at: (Utc::now() + Duration::hours(1)).trunc_subsecs(3),
        };
        Calmerge::from_config(&config)
            .unwrap()
            .store()
            .add_or_replace(account.clone())
            .unwrap();

        let rebuilt = Calmerge::from_config(&config).unwrap();
        assert_eq!(rebuilt.manager().accounts(), vec![account]);
        assert!(rebuilt.aggregator().snapshot().events.is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = zoho_only();
        config.settings.timezone = Some("Nowhere/Special".to_string());
        assert!(Calmerge::with_store(&config, Arc::new(MemoryKeyValueStore::new())).is_err());
    }
}
