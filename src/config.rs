//! Configuration for the calmerge composition root.
//!
//! Read from ~/.config/calmerge/config.toml, then overridden by
//! `CALMERGE__*` environment variables (`CALMERGE__SETTINGS__WEEK_START=sunday`,
//! `CALMERGE__ZOHO__CLIENT_ID=...`). A provider is enabled by giving it a table:
//!
//! ```toml
//! [settings]
//! week_start = "monday"
//! timezone = "Europe/Berlin"
//!
//! [google]
//! client_id = "your-client-id.apps.googleusercontent.com"
//!
//! [zoho]
//! client_id = "1000.XXXX"
//! client_secret = "your-client-secret"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use calmerge_core::settings::{Settings, config_dir};
use calmerge_provider_google::GoogleConfig;
use calmerge_provider_zoho::ZohoConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalmergeConfig {
    #[serde(default)]
    pub settings: Settings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google: Option<GoogleConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zoho: Option<ZohoConfig>,
}

impl CalmergeConfig {
    pub fn config_path() -> Result<PathBuf> {
        Ok(config_dir()?.join("config.toml"))
    }

    /// Load from the default path. A missing file yields defaults with no
    /// providers enabled.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("CALMERGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(Config::try_deserialize)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    }

    /// Parse TOML text without consulting the environment.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config")
    }

    pub fn validate(&self) -> Result<()> {
        self.settings.week_start().context("[settings]")?;
        self.settings.timezone().context("[settings]")?;
        if let Some(google) = &self.google {
            google.validate().context("[google]")?;
        }
        if let Some(zoho) = &self.zoho {
            zoho.validate().context("[zoho]")?;
        }
        Ok(())
    }
}
