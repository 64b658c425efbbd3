use chrono::{Duration, Utc};
use serde_json::{Value, json};

use calmerge_core::{CalmergeError, CalmergeResult, Event, EventTime};

pub trait ToZoho {
    /// `eventdata` JSON for create and update calls. Timed events are sent in
    /// UTC; `timezone` is the zone Zoho displays them in.
    fn to_zoho(&self, timezone: &str) -> CalmergeResult<Value>;
}

impl ToZoho for Event {
    fn to_zoho(&self, timezone: &str) -> CalmergeResult<Value> {
        let start = self.start_time().ok_or_else(|| {
            CalmergeError::MalformedData(format!("invalid start '{}'", self.start))
        })?;

        let end = if self.end.trim().is_empty() {
            match start {
                EventTime::Date(d) => EventTime::Date(d + Duration::days(1)),
                EventTime::DateTime(dt) => EventTime::DateTime(dt),
            }
        } else {
            self.end_time().ok_or_else(|| {
                CalmergeError::MalformedData(format!("invalid end '{}'", self.end))
            })?
        };

        let all_day = matches!(start, EventTime::Date(_));
        if all_day != matches!(end, EventTime::Date(_)) {
            return Err(CalmergeError::MalformedData(
                "start and end must both be dates or both be date-times".into(),
            ));
        }

        let mut data = json!({
            "title": self.summary,
            "description": self.description,
            "location": self.location,
            "dateandtime": {
                "start": zoho_time(&start),
                "end": zoho_time(&end),
                "timezone": timezone,
            },
            "isallday": all_day,
        });

        if let Some(tag) = &self.provider_event_tag {
            data["etag"] = match tag.parse::<i64>() {
                Ok(n) => json!(n),
                Err(_) => json!(tag),
            };
        }

        Ok(data)
    }
}

fn zoho_time(time: &EventTime) -> String {
    match time {
        EventTime::Date(d) => d.format("%Y%m%d").to_string(),
        EventTime::DateTime(dt) => dt.with_timezone(&Utc).format("%Y%m%dT%H%M%SZ").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calmerge_core::Provider;

    fn event(start: &str, end: &str) -> Event {
        let mut event = Event::draft(Provider::Zoho, "ana@zoho.eu");
        event.summary = "Dentist".to_string();
        event.start = start.to_string();
        event.end = end.to_string();
        event
    }

    #[test]
    fn test_timed_event_is_sent_in_utc() {
        let data = event("2025-11-03T08:00:00+01:00", "2025-11-03T09:00:00+01:00")
            .to_zoho("Europe/Berlin")
            .unwrap();

        assert_eq!(data["title"], "Dentist");
        assert_eq!(data["dateandtime"]["start"], "20251103T070000Z");
        assert_eq!(data["dateandtime"]["end"], "20251103T080000Z");
        assert_eq!(data["dateandtime"]["timezone"], "Europe/Berlin");
        assert_eq!(data["isallday"], false);
        assert!(data.get("etag").is_none());
    }

    #[test]
    fn test_all_day_event_and_numeric_etag() {
        let mut all_day = event("2025-10-26", "2025-10-27");
        all_day.provider_event_tag = Some("1761555000000".to_string());

        let data = all_day.to_zoho("UTC").unwrap();
        assert_eq!(data["dateandtime"]["start"], "20251026");
        assert_eq!(data["dateandtime"]["end"], "20251027");
        assert_eq!(data["isallday"], true);
        assert_eq!(data["etag"], 1761555000000_i64);
    }

    #[test]
    fn test_mixed_forms_are_rejected() {
        assert!(
            event("2025-10-26", "2025-10-26T10:00:00Z")
                .to_zoho("UTC")
                .is_err()
        );
    }
}
