//! Provider-neutral event types.
//!
//! Providers convert their API payloads into `Event`, and everything above the
//! gateways (the aggregator, the window queries, the host UI) works exclusively
//! with it. `start` and `end` keep the provider's form: `YYYY-MM-DD` for all-day
//! events, an RFC 3339 offset date-time otherwise.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::account::AccountKey;
use crate::provider::Provider;

/// A calendar event (provider-neutral)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Provider-assigned id. Empty for a local create-intent.
    pub id: String,
    pub summary: String,
    pub description: String,
    pub location: String,
    pub start: String,
    pub end: String,
    /// Email of the linked account the event was fetched from.
    pub calendar_email: String,
    /// Provider concurrency token (Google/Zoho etag)
    #[serde(default)]
    pub provider_event_tag: Option<String>,
    pub provider: Provider,
    /// Provider calendar the event lives in, when the provider needs it for writes.
    #[serde(default)]
    pub calendar_id: Option<String>,
}

impl Event {
    /// A blank create-intent owned by the given account.
    pub fn draft(provider: Provider, calendar_email: &str) -> Self {
        Event {
            id: String::new(),
            summary: String::new(),
            description: String::new(),
            location: String::new(),
            start: String::new(),
            end: String::new(),
            calendar_email: calendar_email.to_string(),
            provider_event_tag: None,
            provider,
            calendar_id: None,
        }
    }

    pub fn is_draft(&self) -> bool {
        self.id.trim().is_empty()
    }

    pub fn account_key(&self) -> AccountKey {
        AccountKey::new(self.provider, self.calendar_email.clone())
    }

    pub fn start_time(&self) -> Option<EventTime> {
        EventTime::parse(&self.start)
    }

    pub fn end_time(&self) -> Option<EventTime> {
        EventTime::parse(&self.end)
    }

    /// All-day events carry a date-only start.
    pub fn is_all_day(&self) -> bool {
        matches!(self.start_time(), Some(EventTime::Date(_)))
    }

    /// The same edit as a brand-new event in the account's default
    /// calendar: no id, no concurrency tag and no source calendar.
    pub fn as_new(&self) -> Self {
        Event {
            id: String::new(),
            provider_event_tag: None,
            calendar_id: None,
            ..self.clone()
        }
    }

    /// Equality that ignores volatile provider fields (the etag).
    pub fn same_content(&self, other: &Event) -> bool {
        Event {
            provider_event_tag: None,
            ..self.clone()
        } == Event {
            provider_event_tag: None,
            ..other.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
}

impl EventTime {
    /// Parse a canonical event date string. Empty or malformed input yields `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }

        if s.contains('T') {
            DateTime::parse_from_rfc3339(s).ok().map(EventTime::DateTime)
        } else {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(EventTime::Date)
        }
    }

    /// Canonical string form, the inverse of `parse`.
    pub fn to_canonical(&self) -> String {
        match self {
            EventTime::Date(d) => d.format("%Y-%m-%d").to_string(),
            EventTime::DateTime(dt) => dt.to_rfc3339(),
        }
    }

    /// Calendar date of this time as seen in `tz`.
    pub fn date_in(&self, tz: &Tz) -> NaiveDate {
        match self {
            EventTime::Date(d) => *d,
            EventTime::DateTime(dt) => dt.with_timezone(tz).date_naive(),
        }
    }

    /// Instant used to order events; all-day events sort at local midnight.
    pub fn sort_instant(&self, tz: &Tz) -> DateTime<Utc> {
        match self {
            EventTime::Date(d) => tz
                .from_local_datetime(&d.and_time(NaiveTime::MIN))
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| d.and_time(NaiveTime::MIN).and_utc()),
            EventTime::DateTime(dt) => dt.with_timezone(&Utc),
        }
    }
}
