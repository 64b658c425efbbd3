//! Provider-independent settings.
//!
//! Loaded by the composition root from the `[settings]` table of
//! ~/.config/calmerge/config.toml.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Weekday;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_NETWORK_TIMEOUT_SECS, DEFAULT_REFRESH_MARGIN_SECS,
    DEFAULT_SYNC_DAYS,
};
use crate::error::{CalmergeError, CalmergeResult};
use crate::sync_range::SyncRange;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// First day of the week for week queries ("monday", "sunday", ...)
    pub week_start: String,

    /// IANA timezone used to place timed events on calendar days.
    /// Falls back to the system timezone, then UTC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    pub refresh_margin_secs: i64,
    pub network_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub sync_days: i64,

    /// Where account files are stored. Defaults to the platform data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            week_start: "monday".to_string(),
            timezone: None,
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
            network_timeout_secs: DEFAULT_NETWORK_TIMEOUT_SECS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            sync_days: DEFAULT_SYNC_DAYS,
            data_dir: None,
        }
    }
}

impl Settings {
    pub fn week_start(&self) -> CalmergeResult<Weekday> {
        self.week_start.trim().parse::<Weekday>().map_err(|_| {
            CalmergeError::Config(format!("Invalid week_start '{}'", self.week_start))
        })
    }

    pub fn timezone(&self) -> CalmergeResult<Tz> {
        match &self.timezone {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| CalmergeError::Config(format!("Unknown timezone '{name}'"))),
            None => Ok(iana_time_zone::get_timezone()
                .ok()
                .and_then(|name| name.parse::<Tz>().ok())
                .unwrap_or(Tz::UTC)),
        }
    }

    pub fn refresh_margin(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_margin_secs.max(0))
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn sync_range(&self) -> SyncRange {
        SyncRange::around(chrono::Utc::now(), self.sync_days)
    }

    pub fn data_dir(&self) -> CalmergeResult<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(dirs::data_dir()
                .ok_or_else(|| CalmergeError::Config("Could not determine data directory".into()))?
                .join("calmerge")),
        }
    }
}

/// Directory holding config.toml.
pub fn config_dir() -> CalmergeResult<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or_else(|| CalmergeError::Config("Could not determine config directory".into()))?
        .join("calmerge"))
}
