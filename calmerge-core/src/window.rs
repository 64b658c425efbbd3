//! Day, week and month windows over canonical events.
//!
//! An event is reduced to the inclusive range of calendar days it touches in
//! the display timezone. Timed events end at the last instant before `end`;
//! all-day events use the exclusive end date convention, so an event
//! `2025-10-26 .. 2025-10-27` covers only the 26th.

use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};
use chrono_tz::Tz;

use crate::event::{Event, EventTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    Day(NaiveDate),
    /// The week containing `anchor`, beginning on `week_start`.
    Week { anchor: NaiveDate, week_start: Weekday },
    /// The month containing the date.
    Month(NaiveDate),
}

impl TimeWindow {
    /// First and last day of the window, both inclusive.
    pub fn bounds(&self) -> (NaiveDate, NaiveDate) {
        match *self {
            TimeWindow::Day(date) => (date, date),
            TimeWindow::Week { anchor, week_start } => {
                let first = week_start_of(anchor, week_start);
                (first, first + Duration::days(6))
            }
            TimeWindow::Month(date) => {
                let first = date - Duration::days(i64::from(date.day0()));
                let last = first
                    .checked_add_months(Months::new(1))
                    .and_then(|next| next.pred_opt())
                    .unwrap_or(NaiveDate::MAX);
                (first, last)
            }
        }
    }

    pub fn includes(&self, event: &Event, tz: &Tz) -> bool {
        let Some(span) = DaySpan::of(event, tz) else {
            return false;
        };

        match *self {
            TimeWindow::Day(date) if !span.all_day => span.first == date,
            _ => {
                let (first, last) = self.bounds();
                span.first <= last && span.last >= first
            }
        }
    }
}

/// First day of the week containing `date`.
pub fn week_start_of(date: NaiveDate, week_start: Weekday) -> NaiveDate {
    let offset = (date.weekday().num_days_from_monday() + 7 - week_start.num_days_from_monday()) % 7;
    date - Duration::days(i64::from(offset))
}

/// Inclusive calendar-day range of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DaySpan {
    first: NaiveDate,
    last: NaiveDate,
    all_day: bool,
}

impl DaySpan {
    /// `None` when the event cannot be placed: no parseable start, an end that
    /// is present but unparseable, or a start and end of different forms.
    fn of(event: &Event, tz: &Tz) -> Option<Self> {
        let start = EventTime::parse(&event.start)?;
        let end = if event.end.trim().is_empty() {
            None
        } else {
            Some(EventTime::parse(&event.end)?)
        };

        match (start, end) {
            (EventTime::Date(start), None) => Some(DaySpan {
                first: start,
                last: start,
                all_day: true,
            }),
            (EventTime::Date(start), Some(EventTime::Date(end))) => {
                let last = end.pred_opt().unwrap_or(end).max(start);
                Some(DaySpan {
                    first: start,
                    last,
                    all_day: true,
                })
            }
            (EventTime::DateTime(start), None) => {
                let day = start.with_timezone(tz).date_naive();
                Some(DaySpan {
                    first: day,
                    last: day,
                    all_day: false,
                })
            }
            (EventTime::DateTime(start), Some(EventTime::DateTime(end))) => {
                let first = start.with_timezone(tz).date_naive();
                let last = if end > start {
                    (end - Duration::nanoseconds(1))
                        .with_timezone(tz)
                        .date_naive()
                        .max(first)
                } else {
                    first
                };
                Some(DaySpan {
                    first,
                    last,
                    all_day: false,
                })
            }
            _ => None,
        }
    }
}
