//! The calendar providers calmerge can link accounts from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CalmergeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Zoho,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Google, Provider::Zoho];

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Zoho => "zoho",
        }
    }

    /// Key under which this provider's accounts are persisted.
    pub fn storage_key(&self) -> String {
        format!("accounts.{}", self.name())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = CalmergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Provider::Google),
            "zoho" => Ok(Provider::Zoho),
            other => Err(CalmergeError::Config(format!("Unknown provider '{other}'"))),
        }
    }
}
