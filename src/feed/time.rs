use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

/// No known layout matched a publish-date string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no matching layout for {0:?}")]
pub struct TimeParseError(pub String);

/// Layouts tried in order. The first successful parse wins.
#[derive(Debug, Clone, Copy)]
enum Layout {
    /// `2024-01-15T10:00:00Z`, `2024-01-15T10:00:00+02:00`
    Rfc3339,
    /// `Mon, 15 Jan 2024 10:00:00 +0200` and the zone names RFC 2822 knows (`GMT`, `EST`, ...)
    Rfc1123,
    /// `Mon, 15 Jan 2024 10:00:00 CET`: any other zone abbreviation, read as UTC
    Rfc1123NamedZone,
    /// `2024-01-15 10:00:00`
    SqlDateTime,
    /// `2024-01-15`
    Date,
    /// `15 Jan 2024 10:00`
    DayMonthYearMinutes,
}

const LAYOUTS: [Layout; 6] = [
    Layout::Rfc3339,
    Layout::Rfc1123,
    Layout::Rfc1123NamedZone,
    Layout::SqlDateTime,
    Layout::Date,
    Layout::DayMonthYearMinutes,
];

impl Layout {
    fn parse(self, s: &str) -> Option<DateTime<Utc>> {
        match self {
            Layout::Rfc3339 => DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc)),
            Layout::Rfc1123 => DateTime::parse_from_rfc2822(strip_weekday(s)?)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Layout::Rfc1123NamedZone => {
                let (rest, zone) = strip_weekday(s)?.rsplit_once(' ')?;
                if zone.is_empty() || !zone.chars().all(|c| c.is_ascii_alphabetic()) {
                    return None;
                }
                naive_utc(rest, "%d %b %Y %H:%M:%S")
            }
            Layout::SqlDateTime => naive_utc(s, "%Y-%m-%d %H:%M:%S"),
            Layout::Date => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc()),
            Layout::DayMonthYearMinutes => naive_utc(s, "%d %b %Y %H:%M"),
        }
    }
}

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Drop the leading `"Mon, "`. Only its spelling is checked: feeds often name
/// the wrong day, and the calendar date wins.
fn strip_weekday(s: &str) -> Option<&str> {
    let (day, rest) = s.split_once(", ")?;
    WEEKDAYS.contains(&day).then(|| rest.trim_start())
}

fn naive_utc(s: &str, fmt: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, fmt)
        .ok()
        .map(|dt| dt.and_utc())
}

/// Parse a publish date of unknown format from a third-party feed.
///
/// Pure and stateless. Leading and trailing whitespace is ignored. Failure
/// is reported rather than guessed at; the caller picks the fallback.
pub fn parse_unknown_time(raw: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let s = raw.trim();
    LAYOUTS
        .iter()
        .find_map(|layout| layout.parse(s))
        .ok_or_else(|| TimeParseError(raw.to_string()))
}
