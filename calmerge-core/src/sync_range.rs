//! Time range requested from providers on each fetch.

use chrono::{DateTime, Duration, Utc};

use crate::constants::DEFAULT_SYNC_DAYS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Default for SyncRange {
    /// Default range: ±DEFAULT_SYNC_DAYS from now
    fn default() -> Self {
        SyncRange::around(Utc::now(), DEFAULT_SYNC_DAYS)
    }
}

impl SyncRange {
    pub fn around(now: DateTime<Utc>, days: i64) -> Self {
        SyncRange {
            from: now - Duration::days(days),
            to: now + Duration::days(days),
        }
    }

    pub fn from_rfc3339(&self) -> String {
        self.from.to_rfc3339()
    }

    pub fn to_rfc3339(&self) -> String {
        self.to.to_rfc3339()
    }
}
