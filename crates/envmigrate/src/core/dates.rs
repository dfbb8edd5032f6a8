//! Date attribute normalization.
//!
//! Source environments hold dates typed in by hand (`3/5/24`, `03-05-2024`,
//! `2024-3-5`). Declared date attributes are rewritten to UTC ISO-8601 on
//! migration. Values without a zone are taken as US Pacific wall-clock time.
//!
//! The Pacific offset is computed from the US daylight-saving rules rather
//! than a tz database: PDT (UTC-7) between the switch-over Sundays, PST
//! (UTC-8) otherwise.

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc, Weekday,
};
use thiserror::Error;

/// Two-digit years up to this value land in the 2000s, the rest in the 1900s.
const TWO_DIGIT_YEAR_PIVOT: i32 = 30;

const PST_OFFSET_SECS: i32 = -8 * 3600;
const PDT_OFFSET_SECS: i32 = -7 * 3600;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("'{value}' is not a recognized date")]
pub struct DateParseError {
    pub value: String,
}

/// Normalize one date string.
///
/// Returns `Ok(None)` when the value is already in UTC ISO-8601 form and
/// must be left untouched.
pub fn normalize_date(raw: &str) -> Result<Option<String>, DateParseError> {
    let value = raw.trim();
    if value.contains('T') && value.ends_with('Z') {
        return match DateTime::parse_from_rfc3339(value) {
            Ok(_) => Ok(None),
            Err(_) => Err(parse_error(raw)),
        };
    }

    if let Some(date) = parse_calendar_date(value) {
        return Ok(Some(format_utc(pacific_to_utc(date.and_time(NaiveTime::MIN)))));
    }
    if let Ok(zoned) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(format_utc(zoned.with_timezone(&Utc))));
    }
    for layout in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, layout) {
            return Ok(Some(format_utc(pacific_to_utc(naive))));
        }
    }
    Err(parse_error(raw))
}

/// `M/D/YY`, `M/D/YYYY`, `M-D-YY`, `M-D-YYYY` and `YYYY-M-D`.
fn parse_calendar_date(value: &str) -> Option<NaiveDate> {
    let separator = if value.contains('/') { '/' } else { '-' };
    let parts: Vec<&str> = value.split(separator).collect();
    let [a, b, c] = parts.as_slice() else {
        return None;
    };
    if !parts.iter().all(|p| !p.is_empty() && p.bytes().all(|ch| ch.is_ascii_digit())) {
        return None;
    }

    let (year, month, day) = match (a.len(), b.len(), c.len()) {
        (4, 1..=2, 1..=2) if separator == '-' => {
            (a.parse().ok()?, b.parse().ok()?, c.parse().ok()?)
        }
        (1..=2, 1..=2, 2) => (
            expand_year(c.parse().ok()?),
            a.parse().ok()?,
            b.parse().ok()?,
        ),
        (1..=2, 1..=2, 3..=4) => (c.parse().ok()?, a.parse().ok()?, b.parse().ok()?),
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

fn expand_year(two_digit: i32) -> i32 {
    if two_digit <= TWO_DIGIT_YEAR_PIVOT {
        2000 + two_digit
    } else {
        1900 + two_digit
    }
}

/// Interpret a wall-clock time in US Pacific and convert it to UTC.
///
/// The skipped spring hour and the repeated autumn hour both resolve to
/// standard time.
pub fn pacific_to_utc(local: NaiveDateTime) -> DateTime<Utc> {
    let offset_secs = if is_daylight_time(local) {
        PDT_OFFSET_SECS
    } else {
        PST_OFFSET_SECS
    };
    (local - Duration::seconds(i64::from(offset_secs))).and_utc()
}

fn is_daylight_time(local: NaiveDateTime) -> bool {
    let Some((start, end)) = daylight_window(local.year()) else {
        return false;
    };
    let begins = start.and_hms_opt(3, 0, 0);
    let ends = end.and_hms_opt(1, 0, 0);
    match (begins, ends) {
        (Some(begins), Some(ends)) => local >= begins && local < ends,
        _ => false,
    }
}

/// First and last day of daylight saving time for a year.
fn daylight_window(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    match year {
        2007..=i32::MAX => Some((
            NaiveDate::from_weekday_of_month_opt(year, 3, Weekday::Sun, 2)?,
            NaiveDate::from_weekday_of_month_opt(year, 11, Weekday::Sun, 1)?,
        )),
        1987..=2006 => Some((
            NaiveDate::from_weekday_of_month_opt(year, 4, Weekday::Sun, 1)?,
            last_sunday(year, 10)?,
        )),
        1967..=1986 => Some((last_sunday(year, 4)?, last_sunday(year, 10)?)),
        _ => None,
    }
}

fn last_sunday(year: i32, month: u32) -> Option<NaiveDate> {
    NaiveDate::from_weekday_of_month_opt(year, month, Weekday::Sun, 5)
        .or_else(|| NaiveDate::from_weekday_of_month_opt(year, month, Weekday::Sun, 4))
}

fn format_utc(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_error(raw: &str) -> DateParseError {
    DateParseError {
        value: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(raw: &str) -> String {
        normalize_date(raw).unwrap().unwrap()
    }

    #[test]
    fn test_two_digit_years_pivot_at_30() {
        assert_eq!(normalized("3/5/24"), "2024-03-05T08:00:00Z");
        assert_eq!(normalized("1/15/30"), "2030-01-15T08:00:00Z");
        assert_eq!(normalized("12/31/31"), "1931-12-31T08:00:00Z");
        assert_eq!(normalized("6/1/99"), "1999-06-01T07:00:00Z");
    }

    #[test]
    fn test_slash_and_dash_layouts() {
        assert_eq!(normalized("03/05/2024"), "2024-03-05T08:00:00Z");
        assert_eq!(normalized("7/4/2023"), "2023-07-04T07:00:00Z");
        assert_eq!(normalized("07-04-23"), "2023-07-04T07:00:00Z");
        assert_eq!(normalized("7-4-2023"), "2023-07-04T07:00:00Z");
        assert_eq!(normalized(" 12/25/2023 "), "2023-12-25T08:00:00Z");
    }

    #[test]
    fn test_unpadded_iso_dates() {
        assert_eq!(normalized("2024-3-5"), "2024-03-05T08:00:00Z");
        assert_eq!(normalized("2024-08-15"), "2024-08-15T07:00:00Z");
    }

    #[test]
    fn test_daylight_saving_boundaries() {
        // 2024: DST from Sunday March 10 to Sunday November 3.
        assert_eq!(normalized("3/9/2024"), "2024-03-09T08:00:00Z");
        assert_eq!(normalized("3/11/2024"), "2024-03-11T07:00:00Z");
        assert_eq!(normalized("11/2/2024"), "2024-11-02T07:00:00Z");
        assert_eq!(normalized("11/4/2024"), "2024-11-04T08:00:00Z");
        // 2005 used the April to October rule.
        assert_eq!(normalized("3/20/2005"), "2005-03-20T08:00:00Z");
        assert_eq!(normalized("4/4/2005"), "2005-04-04T07:00:00Z");
    }

    #[test]
    fn test_utc_values_are_left_alone() {
        assert_eq!(normalize_date("2024-03-05T08:00:00Z"), Ok(None));
        assert_eq!(normalize_date("2024-03-05T08:00:00.123Z"), Ok(None));
    }

    #[test]
    fn test_zoned_and_naive_timestamps() {
        assert_eq!(normalized("2024-03-05T10:30:00-05:00"), "2024-03-05T15:30:00Z");
        assert_eq!(normalized("2024-07-01T09:15:00"), "2024-07-01T16:15:00Z");
        assert_eq!(normalized("2024-01-01 09:15:00"), "2024-01-01T17:15:00Z");
    }

    #[test]
    fn test_unrecognized_values_fail() {
        for raw in ["", "soon", "13/45/2024", "2/30/24", "1/2/3/4", "05/2024", "T-1Z"] {
            assert!(normalize_date(raw).is_err(), "{raw:?} should not parse");
        }
    }
}
