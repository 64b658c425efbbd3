use chrono::Duration;
use serde_json::{Value, json};

use calmerge_core::{CalmergeError, CalmergeResult, Event, EventTime};

pub trait ToGoogle {
    /// Request body for events.insert / events.update.
    fn to_google(&self) -> CalmergeResult<Value>;
}

impl ToGoogle for Event {
    fn to_google(&self) -> CalmergeResult<Value> {
        let start = self.start_time().ok_or_else(|| {
            CalmergeError::MalformedData(format!("invalid start '{}'", self.start))
        })?;

        // Google requires an end; a missing one means a single day or instant.
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

        Ok(json!({
            "summary": self.summary,
            "description": self.description,
            "location": self.location,
            "start": event_time_to_google(&start),
            "end": event_time_to_google(&end),
        }))
    }
}

fn event_time_to_google(time: &EventTime) -> Value {
    match time {
        EventTime::Date(_) => json!({ "date": time.to_canonical() }),
        EventTime::DateTime(_) => json!({ "dateTime": time.to_canonical() }),
    }
}
