//! Durable, provider-scoped account persistence.
//!
//! Accounts are stored as one JSON array per provider through a
//! `KeyValueStore`. The store deliberately works on whole lists: every write is
//! a read-modify-write of the provider's array under a single lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::account::Account;
use crate::error::{CalmergeError, CalmergeResult};
use crate::provider::Provider;

/// Secure key-value persistence supplied by the host platform.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> CalmergeResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> CalmergeResult<()>;
    fn remove(&self, key: &str) -> CalmergeResult<()>;
}

/// One file per key inside a directory, readable by the owner only.
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileKeyValueStore { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        let safe_key = key.replace(['/', '\\', ':'], "_");
        self.dir.join(format!("{safe_key}.json"))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> CalmergeResult<Option<String>> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(&path)?))
    }

    fn set(&self, key: &str, value: &str) -> CalmergeResult<()> {
        let path = self.path(key);

        std::fs::create_dir_all(&self.dir).map_err(|e| {
            CalmergeError::Storage(format!("Failed to create {}: {e}", self.dir.display()))
        })?;

        std::fs::write(&path, value).map_err(|e| {
            CalmergeError::Storage(format!("Failed to write {}: {e}", path.display()))
        })?;

        restrict_permissions(&path)
    }

    fn remove(&self, key: &str) -> CalmergeResult<()> {
        let path = self.path(key);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }
}

// Files contain OAuth tokens: owner-only (0600).
#[cfg(unix)]
fn restrict_permissions(path: &Path) -> CalmergeResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|e| {
        CalmergeError::Storage(format!("Failed to set permissions on {}: {e}", path.display()))
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> CalmergeResult<()> {
    Ok(())
}

/// In-process store for tests and hosts without durable storage.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> CalmergeResult<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> CalmergeResult<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> CalmergeResult<()> {
        self.entries().remove(key);
        Ok(())
    }
}

pub struct CredentialStore {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        CredentialStore {
            kv,
            write_lock: Mutex::new(()),
        }
    }

    /// All stored accounts for a provider. Missing or unreadable data loads
    /// as an empty list.
    pub fn load_all(&self, provider: Provider) -> Vec<Account> {
        let key = provider.storage_key();

        let raw = match self.kv.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(%provider, error = %e, "could not read stored accounts");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<Account>>(&raw) {
            Ok(accounts) => accounts
                .into_iter()
                .filter(|account| account.provider == provider)
                .collect(),
            Err(e) => {
                warn!(%provider, error = %e, "stored accounts are corrupt, ignoring them");
                Vec::new()
            }
        }
    }

    /// Accounts of every provider, in provider order.
    pub fn load_every(&self) -> Vec<Account> {
        Provider::ALL
            .iter()
            .flat_map(|provider| self.load_all(*provider))
            .collect()
    }

    pub fn find(&self, provider: Provider, email: &str) -> Option<Account> {
        self.load_all(provider)
            .into_iter()
            .find(|account| account.email == email)
    }

    /// Replace the provider's whole list. Later duplicates of an email win.
    pub fn save_all(&self, provider: Provider, accounts: &[Account]) -> CalmergeResult<()> {
        let _guard = self.lock();
        self.write(provider, accounts)
    }

    /// Insert an account, replacing any existing entry with the same email.
    pub fn add_or_replace(&self, account: Account) -> CalmergeResult<()> {
        let _guard = self.lock();
        let provider = account.provider;
        let mut accounts = self.load_all(provider);

        match accounts.iter_mut().find(|a| a.email == account.email) {
            Some(existing) => *existing = account,
            None => accounts.push(account),
        }

        self.write(provider, &accounts)
    }

    /// Overwrite an account that is still linked. Returns false, writing
    /// nothing, when it has been removed in the meantime.
    pub fn replace_existing(&self, account: Account) -> CalmergeResult<bool> {
        let _guard = self.lock();
        let provider = account.provider;
        let mut accounts = self.load_all(provider);

        let Some(existing) = accounts.iter_mut().find(|a| a.email == account.email) else {
            return Ok(false);
        };
        *existing = account;

        self.write(provider, &accounts)?;
        Ok(true)
    }

    /// Remove an account. Returns whether it existed.
    pub fn remove(&self, provider: Provider, email: &str) -> CalmergeResult<bool> {
        let _guard = self.lock();
        let mut accounts = self.load_all(provider);
        let before = accounts.len();
        accounts.retain(|a| a.email != email);

        if accounts.len() == before {
            return Ok(false);
        }

        self.write(provider, &accounts)?;
        Ok(true)
    }

    fn write(&self, provider: Provider, accounts: &[Account]) -> CalmergeResult<()> {
        let mut deduped: Vec<Account> = Vec::with_capacity(accounts.len());
        for account in accounts {
            match deduped.iter_mut().find(|a| a.email == account.email) {
                Some(existing) => *existing = account.clone(),
                None => deduped.push(account.clone()),
            }
        }

        let json = serde_json::to_string(&deduped)
            .map_err(|e| CalmergeError::Storage(format!("Failed to serialize accounts: {e}")))?;
        self.kv.set(&provider.storage_key(), &json)?;

        debug!(%provider, count = deduped.len(), "saved accounts");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}
