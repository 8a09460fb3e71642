//! Timestamp formatting for case-management records

use chrono::{DateTime, FixedOffset, Local, TimeZone, Utc};

/// Downstream timestamp layout, e.g. `2024-03-01 09:15:00 AM`.
const RECORD_FORMAT: &str = "%Y-%m-%d %I:%M:%S %p";

/// Time zone used when rendering timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub enum TimestampZone {
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl TimestampZone {
    /// Build from a configured UTC offset in minutes. Out-of-range offsets
    /// fall back to local time.
    pub fn from_offset_minutes(minutes: Option<i32>) -> Self {
        match minutes
            .and_then(|m| m.checked_mul(60))
            .and_then(FixedOffset::east_opt) {
            Some(offset) => Self::Fixed(offset),
            None => Self::Local,
        }
    }

    /// Render an RFC 3339 provider timestamp. Absent or unparsable input
    /// yields an empty string.
    pub fn format(&self, ts: Option<&str>) -> String {
        let Some(parsed) = ts.and_then(parse_timestamp) else {
            return String::new();
        };
        match self {
            Self::Local => render(parsed, &Local),
            Self::Fixed(offset) => render(parsed, offset),
        }
    }
}

pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn render<Tz: TimeZone>(dt: DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    dt.with_timezone(tz).format(RECORD_FORMAT).to_string()
}
