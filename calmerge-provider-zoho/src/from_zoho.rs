//! Zoho event payloads to canonical events.
//!
//! Zoho writes dates compactly: `20251026` for all-day dates,
//! `20251026T090000Z` for UTC times, `20251026T090000+0100` with an offset,
//! and `20251026T090000` as wall time in the event's `dateandtime.timezone`.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::Deserialize;

use calmerge_core::gateway::RawEvent;
use calmerge_core::{CalmergeError, CalmergeResult, Event, EventTime, Provider};

pub trait FromZoho {
    fn from_zoho(raw: &RawEvent, account_email: &str) -> CalmergeResult<Self>
    where
        Self: Sized;
}

#[derive(Debug, Deserialize)]
struct ZohoEvent {
    #[serde(default)]
    uid: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    dateandtime: Option<ZohoDateAndTime>,
    #[serde(default)]
    etag: Option<serde_json::Value>,
    #[serde(default)]
    isallday: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ZohoDateAndTime {
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
}

impl FromZoho for Event {
    fn from_zoho(raw: &RawEvent, account_email: &str) -> CalmergeResult<Self> {
        let event: ZohoEvent = serde_json::from_value(raw.payload.clone())
            .map_err(|e| CalmergeError::MalformedData(format!("Zoho event: {e}")))?;

        if event.uid.is_empty() {
            return Err(CalmergeError::MalformedData("Zoho event has no uid".into()));
        }
        let malformed =
            |what: &str| CalmergeError::MalformedData(format!("Zoho event {}: {what}", event.uid));

        let when = event
            .dateandtime
            .as_ref()
            .ok_or_else(|| malformed("no dateandtime"))?;
        let tz = when
            .timezone
            .as_deref()
            .and_then(|name| name.parse::<Tz>().ok());

        let start_raw = when
            .start
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| malformed("no start"))?;
        let start = parse_zoho_time(start_raw, tz)
            .ok_or_else(|| malformed(&format!("invalid start '{start_raw}'")))?;

        let end = match when.end.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(end_raw) => Some(
                parse_zoho_time(end_raw, tz)
                    .ok_or_else(|| malformed(&format!("invalid end '{end_raw}'")))?,
            ),
            None => None,
        };

        let (start, end) = if event.isallday.unwrap_or(false) {
            all_day_span(start, end)
        } else {
            (start, end)
        };

        Ok(Event {
            summary: event.title.unwrap_or_default(),
            description: event.description.unwrap_or_default(),
            location: event.location.unwrap_or_default(),
            start: start.to_canonical(),
            end: end.map(|e| e.to_canonical()).unwrap_or_default(),
            calendar_email: account_email.to_string(),
            provider_event_tag: event.etag.as_ref().and_then(etag_string),
            provider: Provider::Zoho,
            calendar_id: raw.calendar_id.clone(),
            id: event.uid,
        })
    }
}

/// Parse any of Zoho's date forms. Wall times without a known zone are read
/// as UTC.
pub fn parse_zoho_time(s: &str, tz: Option<Tz>) -> Option<EventTime> {
    let s = s.trim();

    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(s, "%Y%m%d")
            .ok()
            .map(EventTime::Date);
    }

    if let Some(utc) = s.strip_suffix('Z') {
        return NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")
            .ok()
            .map(|dt| EventTime::DateTime(dt.and_utc().fixed_offset()));
    }

    if let Ok(dt) = DateTime::parse_from_str(s, "%Y%m%dT%H%M%S%z") {
        return Some(EventTime::DateTime(dt));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S") {
        let fixed = match tz {
            Some(tz) => tz.from_local_datetime(&naive).earliest()?.fixed_offset(),
            None => naive.and_utc().fixed_offset(),
        };
        return Some(EventTime::DateTime(fixed));
    }

    // Already canonical (YYYY-MM-DD or RFC 3339)
    EventTime::parse(s)
}

/// Coerce an all-day event to date-only bounds with an exclusive end.
fn all_day_span(start: EventTime, end: Option<EventTime>) -> (EventTime, Option<EventTime>) {
    let as_date = |t: EventTime| match t {
        EventTime::Date(d) => d,
        EventTime::DateTime(dt) => dt.date_naive(),
    };

    let start = as_date(start);
    let end = end.map(as_date).map(|end| {
        if end <= start {
            start + Duration::days(1)
        } else {
            end
        }
    });

    (EventTime::Date(start), end.map(EventTime::Date))
}

/// Zoho sends the etag as a number on some endpoints and as a string on others.
fn etag_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(payload: serde_json::Value) -> RawEvent {
        RawEvent::new(Provider::Zoho, Some("cal-1".to_string()), payload)
    }

    #[test]
    fn test_utc_event() {
        let event = Event::from_zoho(
            &raw(json!({
                "uid": "ev1@zoho.com",
                "title": "Sprint review",
                "dateandtime": {"start": "20251027T090000Z", "end": "20251027T100000Z", "timezone": "Europe/Berlin"},
                "etag": 1761555000000_i64,
                "isallday": false
            })),
            "ana@zoho.eu",
        )
        .unwrap();

        assert_eq!(event.id, "ev1@zoho.com");
        assert_eq!(event.start, "2025-10-27T09:00:00+00:00");
        assert_eq!(event.end, "2025-10-27T10:00:00+00:00");
        assert_eq!(event.provider_event_tag.as_deref(), Some("1761555000000"));
        assert_eq!(event.calendar_id.as_deref(), Some("cal-1"));
        assert_eq!(event.description, "");
    }

    #[test]
    fn test_wall_time_uses_event_timezone() {
        let event = Event::from_zoho(
            &raw(json!({
                "uid": "ev2",
                "title": "Lunch",
                "dateandtime": {"start": "20250715T123000", "end": "20250715T133000", "timezone": "Europe/Berlin"},
                "etag": "42"
            })),
            "ana@zoho.eu",
        )
        .unwrap();

        assert_eq!(event.start, "2025-07-15T12:30:00+02:00");
        assert_eq!(event.end, "2025-07-15T13:30:00+02:00");
        assert_eq!(event.provider_event_tag.as_deref(), Some("42"));
    }

    #[test]
    fn test_offset_time() {
        assert_eq!(
            parse_zoho_time("20250115T083000+0100", None).map(|t| t.to_canonical()),
            Some("2025-01-15T08:30:00+01:00".to_string())
        );
    }

    #[test]
    fn test_all_day_event_keeps_exclusive_end() {
        let event = Event::from_zoho(
            &raw(json!({
                "uid": "ev3",
                "title": "Holiday",
                "dateandtime": {"start": "20251026", "end": "20251027"},
                "isallday": true
            })),
            "ana@zoho.eu",
        )
        .unwrap();

        assert_eq!(event.start, "2025-10-26");
        assert_eq!(event.end, "2025-10-27");
        assert!(event.is_all_day());
    }

    #[test]
    fn test_degenerate_all_day_event_becomes_one_day() {
        let event = Event::from_zoho(
            &raw(json!({
                "uid": "ev4",
                "dateandtime": {"start": "20251026", "end": "20251026"},
                "isallday": true
            })),
            "ana@zoho.eu",
        )
        .unwrap();

        assert_eq!(event.start, "2025-10-26");
        assert_eq!(event.end, "2025-10-27");
        assert_eq!(event.summary, "");
    }

    #[test]
    fn test_malformed_payloads() {
        let no_uid = raw(json!({"dateandtime": {"start": "20251026"}}));
        assert!(matches!(
            Event::from_zoho(&no_uid, "a@zoho.eu"),
            Err(CalmergeError::MalformedData(_))
        ));

        let no_dates = raw(json!({"uid": "x", "title": "Floating"}));
        assert!(Event::from_zoho(&no_dates, "a@zoho.eu").is_err());

        let bad_end = raw(json!({
            "uid": "x",
            "dateandtime": {"start": "20251026T090000Z", "end": "tomorrow"}
        }));
        assert!(Event::from_zoho(&bad_end, "a@zoho.eu").is_err());
    }
}
