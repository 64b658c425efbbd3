use serde::Deserialize;

use calmerge_core::gateway::RawEvent;
use calmerge_core::{CalmergeError, CalmergeResult, Event, EventTime, Provider};

pub trait FromGoogle {
    fn from_google(raw: &RawEvent, account_email: &str) -> CalmergeResult<Self>
    where
        Self: Sized;
}

/// The subset of a Calendar v3 event resource calmerge reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    start: Option<GoogleEventTime>,
    #[serde(default)]
    end: Option<GoogleEventTime>,
    #[serde(default)]
    etag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventTime {
    #[serde(default)]
    date_time: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

impl GoogleEventTime {
    /// `dateTime` verbatim when present, otherwise the all-day `date`.
    fn value(&self) -> Option<String> {
        self.date_time
            .clone()
            .or_else(|| self.date.clone())
            .filter(|s| !s.trim().is_empty())
    }
}

impl FromGoogle for Event {
    fn from_google(raw: &RawEvent, account_email: &str) -> CalmergeResult<Self> {
        let event: GoogleEvent = serde_json::from_value(raw.payload.clone())
            .map_err(|e| CalmergeError::MalformedData(format!("Google event: {e}")))?;

        if event.id.is_empty() {
            return Err(CalmergeError::MalformedData("Google event has no id".into()));
        }

        if event.status.as_deref() == Some("cancelled") {
            return Err(CalmergeError::MalformedData(format!(
                "Google event {} is cancelled",
                event.id
            )));
        }

        let start = event
            .start
            .as_ref()
            .and_then(GoogleEventTime::value)
            .ok_or_else(|| {
                CalmergeError::MalformedData(format!("Google event {} has no start time", event.id))
            })?;
        let end = event
            .end
            .as_ref()
            .and_then(GoogleEventTime::value)
            .unwrap_or_default();

        if EventTime::parse(&start).is_none() {
            return Err(CalmergeError::MalformedData(format!(
                "Google event {} has invalid start '{start}'",
                event.id
            )));
        }
        if !end.is_empty() && EventTime::parse(&end).is_none() {
            return Err(CalmergeError::MalformedData(format!(
                "Google event {} has invalid end '{end}'",
                event.id
            )));
        }

        Ok(Event {
            id: event.id,
            summary: event.summary.unwrap_or_default(),
            description: event.description.unwrap_or_default(),
            location: event.location.unwrap_or_default(),
            start,
            end,
            calendar_email: account_email.to_string(),
            provider_event_tag: event.etag,
            provider: Provider::Google,
            calendar_id: raw.calendar_id.clone(),
        })
    }
}
