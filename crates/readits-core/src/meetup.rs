//! Meetup scheduling: the requester's preferred window and the owner's chosen time.
//!
//! Windows are written the way clients display them, e.g. `"10:00 AM - 1:00 PM"`. The
//! owner picks a concrete time at approval, either as `HH:MM` (24-hour) or `HH:MM AM`.
//! Dates and times are local to the marketplace; [`local_instant`] maps them onto UTC
//! with a fixed offset.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, Result};

const TWELVE_HOUR: &str = "%I:%M %p";
const TWENTY_FOUR_HOUR: &str = "%H:%M";

/// Where and when the two parties hand the book over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meetup {
    /// Local meetup date.
    pub date: NaiveDate,
    /// Preferred window, e.g. `"10:00 AM - 1:00 PM"`.
    pub time_window: String,
    /// Time chosen by the owner at approval.
    pub time: Option<NaiveTime>,
    /// Free-form place description.
    pub location: String,
    /// Rentals only.
    pub latitude: Option<f64>,
    /// Rentals only.
    pub longitude: Option<f64>,
}

/// A parsed, inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// First acceptable time.
    pub start: NaiveTime,
    /// Last acceptable time.
    pub end: NaiveTime,
}

impl TimeWindow {
    /// Parse `"10:00 AM - 1:00 PM"`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the text is not two 12-hour times separated by `-`,
    /// or if the window ends before it starts.
    pub fn parse(text: &str) -> Result<Self> {
        let (start, end) = text
            .split_once('-')
            .ok_or_else(|| MarketError::validation(format!("invalid time window: {text}")))?;

        let start = NaiveTime::parse_from_str(start.trim(), TWELVE_HOUR)
            .map_err(|_| MarketError::validation(format!("invalid time window: {text}")))?;
        let end = NaiveTime::parse_from_str(end.trim(), TWELVE_HOUR)
            .map_err(|_| MarketError::validation(format!("invalid time window: {text}")))?;

        if end < start {
            return Err(MarketError::validation(format!(
                "time window ends before it starts: {text}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Whether `time` lies inside the window, bounds included.
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time <= self.end
    }
}

/// Parse an owner-supplied meetup time (`"14:30"` or `"2:30 PM"`).
///
/// # Errors
///
/// Returns a validation error if neither format matches.
pub fn parse_meetup_time(text: &str) -> Result<NaiveTime> {
    let text = text.trim();
    NaiveTime::parse_from_str(text, TWENTY_FOUR_HOUR)
        .or_else(|_| NaiveTime::parse_from_str(text, TWELVE_HOUR))
        .map_err(|_| MarketError::validation(format!("invalid meetup time: {text}")))
}

/// Render a time the way windows are written, e.g. `"2:30 PM"`.
#[must_use]
pub fn format_twelve_hour(time: NaiveTime) -> String {
    time.format("%-I:%M %p").to_string()
}

/// The UTC instant of a local `date` and `time` at `offset`.
#[must_use]
pub fn local_instant(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    date.and_time(time)
        .and_local_timezone(offset)
        .single()
        .map(|local| local.with_timezone(&Utc))
}

/// Whether `instant` falls within `[now, now + lead]`.
#[must_use]
pub fn within_lead(instant: DateTime<Utc>, now: DateTime<Utc>, lead: chrono::Duration) -> bool {
    now <= instant && instant <= now + lead
}
