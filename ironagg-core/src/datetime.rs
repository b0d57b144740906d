// src/datetime.rs
//! Date/instant values used by the date expressions
//!
//! A `Moment` is a timezone-naive wall-clock instant. Epoch conversions treat
//! the wall clock as UTC. An invalid moment (failed parse, NaN offset) is a
//! value, not an error: its getters yield NaN and it formats as
//! `"Invalid date"`.

use crate::error::{EngineError, Result};
use crate::value::Value;
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, Timelike, Utc};
use std::cmp::Ordering;

/// Pattern used by `$format` when no pattern operand is given
pub const DEFAULT_FORMAT: &str = "YYYY-MM-DDTHH:mm:ssZ";

const INVALID_DATE: &str = "Invalid date";

/// Offsets beyond this are outside any representable date anyway
const MAX_OFFSET_MILLIS: f64 = 1e17;

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Text layouts accepted by `Moment::parse` after RFC 3339
const PARSE_LAYOUTS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Moment(Option<NaiveDateTime>);

/// Units accepted by `Moment::diff`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Quarters,
    Years,
}

impl DiffUnit {
    /// Parse a unit name, accepting plural, singular and short aliases
    pub fn from_name(name: &str) -> Option<DiffUnit> {
        match name {
            "milliseconds" | "millisecond" | "ms" => Some(DiffUnit::Milliseconds),
            "seconds" | "second" | "s" => Some(DiffUnit::Seconds),
            "minutes" | "minute" | "m" => Some(DiffUnit::Minutes),
            "hours" | "hour" | "h" => Some(DiffUnit::Hours),
            "days" | "day" | "d" => Some(DiffUnit::Days),
            "weeks" | "week" | "w" => Some(DiffUnit::Weeks),
            "months" | "month" | "M" => Some(DiffUnit::Months),
            "quarters" | "quarter" | "Q" => Some(DiffUnit::Quarters),
            "years" | "year" | "y" => Some(DiffUnit::Years),
            _ => None,
        }
    }

    fn millis(self) -> Option<f64> {
        match self {
            DiffUnit::Milliseconds => Some(1.0),
            DiffUnit::Seconds => Some(1_000.0),
            DiffUnit::Minutes => Some(60_000.0),
            DiffUnit::Hours => Some(3_600_000.0),
            DiffUnit::Days => Some(86_400_000.0),
            DiffUnit::Weeks => Some(604_800_000.0),
            DiffUnit::Months | DiffUnit::Quarters | DiffUnit::Years => None,
        }
    }
}

impl Moment {
    pub fn new(datetime: NaiveDateTime) -> Self {
        Moment(Some(datetime))
    }

    pub fn invalid() -> Self {
        Moment(None)
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_some()
    }

    pub fn datetime(&self) -> Option<NaiveDateTime> {
        self.0
    }

    /// Build from epoch milliseconds (invalid for NaN or out-of-range input)
    pub fn from_millis(millis: f64) -> Self {
        if !millis.is_finite() {
            return Moment::invalid();
        }
        Moment(
            DateTime::<Utc>::from_timestamp_millis(millis.trunc() as i64).map(|dt| dt.naive_utc()),
        )
    }

    /// Default `$parse` backend
    ///
    /// Strings are tried as RFC 3339, then `YYYY-MM-DD[( |T)HH:mm[:ss[.fff]]]`,
    /// then a bare `YYYY-MM-DD`. Numbers are epoch milliseconds. Dates pass
    /// through. Anything else is an invalid moment.
    pub fn parse(value: &Value) -> Moment {
        match value {
            Value::Date(m) => *m,
            Value::Number(n) => Moment::from_millis(*n),
            Value::String(s) => Moment::parse_str(s),
            _ => Moment::invalid(),
        }
    }

    pub fn parse_str(text: &str) -> Moment {
        let text = text.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Moment::new(dt.naive_utc());
        }
        for layout in PARSE_LAYOUTS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, layout) {
                return Moment::new(dt);
            }
        }
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(Moment::new)
            .unwrap_or_else(Moment::invalid)
    }

    /// Epoch milliseconds, NaN when invalid
    pub fn value_of(&self) -> f64 {
        self.0
            .map(|dt| dt.and_utc().timestamp_millis() as f64)
            .unwrap_or(f64::NAN)
    }

    fn part(&self, getter: impl Fn(&NaiveDateTime) -> u32) -> f64 {
        self.0.as_ref().map(|dt| getter(dt) as f64).unwrap_or(f64::NAN)
    }

    pub fn day_of_month(&self) -> f64 {
        self.part(|dt| dt.day())
    }

    /// Sunday = 0
    pub fn day_of_week(&self) -> f64 {
        self.part(|dt| dt.weekday().num_days_from_sunday())
    }

    pub fn day_of_year(&self) -> f64 {
        self.part(|dt| dt.ordinal())
    }

    pub fn hour(&self) -> f64 {
        self.part(|dt| dt.hour())
    }

    pub fn minute(&self) -> f64 {
        self.part(|dt| dt.minute())
    }

    pub fn second(&self) -> f64 {
        self.part(|dt| dt.second())
    }

    pub fn millisecond(&self) -> f64 {
        self.part(|dt| dt.nanosecond() / 1_000_000 % 1_000)
    }

    /// Zero-based month
    pub fn month(&self) -> f64 {
        self.part(|dt| dt.month0())
    }

    pub fn year(&self) -> f64 {
        self.0.map(|dt| dt.year() as f64).unwrap_or(f64::NAN)
    }

    /// Locale week of year: weeks start on Sunday and week 1 holds January 1
    pub fn week(&self) -> f64 {
        self.0.map(|dt| locale_week(dt.date()) as f64).unwrap_or(f64::NAN)
    }

    /// Shift by a (possibly negative or fractional) number of milliseconds
    pub fn add_millis(&self, millis: f64) -> Moment {
        match self.0 {
            Some(dt) if millis.is_finite() && millis.abs() < MAX_OFFSET_MILLIS => Moment(
                dt.checked_add_signed(Duration::milliseconds(millis.trunc() as i64)),
            ),
            _ => Moment::invalid(),
        }
    }

    /// `self - other` in the given unit, truncated toward zero
    pub fn diff(&self, other: &Moment, unit: DiffUnit) -> f64 {
        let (Some(a), Some(b)) = (self.0, other.0) else {
            return f64::NAN;
        };
        let value = match unit.millis() {
            Some(per_unit) => {
                let delta = (a - b).num_milliseconds() as f64;
                delta / per_unit
            }
            None => {
                let months = whole_months(b, a) as f64;
                match unit {
                    DiffUnit::Quarters => months / 3.0,
                    DiffUnit::Years => months / 12.0,
                    _ => months,
                }
            }
        };
        // normalize -0 so the result prints as 0
        value.trunc() + 0.0
    }

    /// Render with a moment-style pattern
    pub fn format(&self, pattern: &str) -> String {
        match self.0 {
            Some(dt) => format_pattern(&dt, pattern),
            None => INVALID_DATE.to_string(),
        }
    }

    /// ISO form used when a date is rendered as JSON or stringified
    pub fn to_iso_string(&self) -> Option<String> {
        self.0
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
    }

    /// Ordering by instant; invalid moments are incomparable
    pub fn compare(&self, other: &Moment) -> Option<Ordering> {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }
}

impl From<NaiveDateTime> for Moment {
    fn from(datetime: NaiveDateTime) -> Self {
        Moment::new(datetime)
    }
}

impl std::fmt::Display for Moment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_iso_string() {
            Some(s) => f.write_str(&s),
            None => f.write_str(INVALID_DATE),
        }
    }
}

fn locale_week(date: NaiveDate) -> u32 {
    // The week belongs to the year holding its Saturday; that Saturday falls
    // within the first seven days of that year for week 1.
    let to_saturday = 6 - date.weekday().num_days_from_sunday();
    let saturday = date
        .checked_add_signed(Duration::days(to_saturday as i64))
        .unwrap_or(date);
    saturday.ordinal0() / 7 + 1
}

fn shift_months(dt: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        dt.checked_add_months(magnitude)
    } else {
        dt.checked_sub_months(magnitude)
    }
}

/// Whole calendar months from `from` to `to`, truncated toward zero
fn whole_months(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    let whole = (to.year() as i64 - from.year() as i64) * 12
        + (to.month0() as i64 - from.month0() as i64);
    let Some(anchor) = shift_months(from, whole) else {
        return whole;
    };
    match to.cmp(&anchor) {
        // true span lies strictly between whole - 1 and whole
        Ordering::Less if whole >= 1 => whole - 1,
        Ordering::Less => whole,
        Ordering::Equal => whole,
        // true span lies strictly between whole and whole + 1
        Ordering::Greater if whole < 0 => whole + 1,
        Ordering::Greater => whole,
    }
}

// ============================================================================
// PATTERN FORMATTING
// ============================================================================

/// Recognized tokens, longest first so prefixes never shadow longer tokens
const TOKENS: [&str; 43] = [
    "LLLL", "YYYY", "MMMM", "DDDD", "dddd", "LLL", "LTS", "MMM", "DDD", "ddd", "SSS", "LL", "LT",
    "YY", "MM", "DD", "Do", "dd", "HH", "hh", "kk", "mm", "ss", "SS", "ZZ", "L", "Q", "M", "D",
    "d", "E", "H", "h", "k", "m", "s", "S", "A", "a", "X", "x", "Z", "W",
];

fn format_pattern(dt: &NaiveDateTime, pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut rest = pattern;

    while let Some(c) = rest.chars().next() {
        if c == '[' {
            if let Some(end) = rest.find(']') {
                out.push_str(&rest[1..end]);
                rest = &rest[end + 1..];
                continue;
            }
        }
        match TOKENS.iter().find(|t| rest.starts_with(**t)) {
            Some(token) => {
                out.push_str(&render_token(dt, token));
                rest = &rest[token.len()..];
            }
            None => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    out
}

fn ordinal_suffix(n: u32) -> &'static str {
    match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    }
}

fn render_token(dt: &NaiveDateTime, token: &str) -> String {
    let hour12 = match dt.hour() % 12 {
        0 => 12,
        h => h,
    };
    let weekday = dt.weekday().num_days_from_sunday() as usize;
    let millis = dt.nanosecond() / 1_000_000 % 1_000;
    match token {
        "LT" => format_pattern(dt, "h:mm A"),
        "LTS" => format_pattern(dt, "h:mm:ss A"),
        "L" => format_pattern(dt, "MM/DD/YYYY"),
        "LL" => format_pattern(dt, "MMMM D, YYYY"),
        "LLL" => format_pattern(dt, "MMMM D, YYYY h:mm A"),
        "LLLL" => format_pattern(dt, "dddd, MMMM D, YYYY h:mm A"),
        "YYYY" => format!("{:04}", dt.year()),
        "YY" => format!("{:02}", dt.year().rem_euclid(100)),
        "Q" => (dt.month0() / 3 + 1).to_string(),
        "MMMM" => MONTH_NAMES[dt.month0() as usize].to_string(),
        "MMM" => MONTH_NAMES[dt.month0() as usize][..3].to_string(),
        "MM" => format!("{:02}", dt.month()),
        "M" => dt.month().to_string(),
        "DDDD" => format!("{:03}", dt.ordinal()),
        "DDD" => dt.ordinal().to_string(),
        "DD" => format!("{:02}", dt.day()),
        "Do" => format!("{}{}", dt.day(), ordinal_suffix(dt.day())),
        "D" => dt.day().to_string(),
        "dddd" => WEEKDAY_NAMES[weekday].to_string(),
        "ddd" => WEEKDAY_NAMES[weekday][..3].to_string(),
        "dd" => WEEKDAY_NAMES[weekday][..2].to_string(),
        "d" => weekday.to_string(),
        "E" => dt.weekday().number_from_monday().to_string(),
        "W" => dt.iso_week().week().to_string(),
        "HH" => format!("{:02}", dt.hour()),
        "H" => dt.hour().to_string(),
        "hh" => format!("{:02}", hour12),
        "h" => hour12.to_string(),
        "kk" => format!("{:02}", if dt.hour() == 0 { 24 } else { dt.hour() }),
        "k" => (if dt.hour() == 0 { 24 } else { dt.hour() }).to_string(),
        "mm" => format!("{:02}", dt.minute()),
        "m" => dt.minute().to_string(),
        "ss" => format!("{:02}", dt.second()),
        "s" => dt.second().to_string(),
        "SSS" => format!("{:03}", millis),
        "SS" => format!("{:02}", millis / 10),
        "S" => (millis / 100).to_string(),
        "A" => (if dt.hour() < 12 { "AM" } else { "PM" }).to_string(),
        "a" => (if dt.hour() < 12 { "am" } else { "pm" }).to_string(),
        "X" => dt.and_utc().timestamp().to_string(),
        "x" => dt.and_utc().timestamp_millis().to_string(),
        "Z" => "+00:00".to_string(),
        "ZZ" => "+0000".to_string(),
        other => other.to_string(),
    }
}

/// Resolve a `$diff` unit operand (absent/undefined means milliseconds)
pub fn diff_unit(value: Option<&Value>) -> Result<DiffUnit> {
    match value {
        None | Some(Value::Undefined) | Some(Value::Null) => Ok(DiffUnit::Milliseconds),
        Some(Value::String(name)) => DiffUnit::from_name(name)
            .ok_or_else(|| EngineError::TypeError(format!("Unsupported $diff unit: {}", name))),
        Some(other) => Err(EngineError::TypeError(format!(
            "$diff unit must be a string, got {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moment(text: &str) -> Moment {
        let m = Moment::parse_str(text);
        assert!(m.is_valid(), "failed to parse {}", text);
        m
    }

    #[test]
    fn test_parse_layouts() {
        assert!(Moment::parse_str("1987-04-30 12:15:14.666").is_valid());
        assert!(Moment::parse_str("2000-01-01T00:00:01").is_valid());
        assert!(Moment::parse_str("2000-01-01 00:00").is_valid());
        assert!(Moment::parse_str("2000-01-01").is_valid());
        assert!(Moment::parse_str("2024-03-15T10:30:45Z").is_valid());
        assert!(!Moment::parse_str("not a date").is_valid());
        assert!(!Moment::parse_str("2014-02-30").is_valid());
    }

    #[test]
    fn test_parse_values() {
        assert_eq!(Moment::parse(&Value::Number(0.0)).value_of(), 0.0);
        assert!(!Moment::parse(&Value::Bool(true)).is_valid());
        assert!(!Moment::parse(&Value::Number(f64::NAN)).is_valid());
        let m = moment("2000-01-01");
        assert_eq!(Moment::parse(&Value::Date(m)), m);
    }

    #[test]
    fn test_getters() {
        let m = moment("1987-04-30 12:15:14.666");
        assert_eq!(m.day_of_month(), 30.0);
        assert_eq!(m.day_of_week(), 4.0);
        assert_eq!(m.day_of_year(), 120.0);
        assert_eq!(m.hour(), 12.0);
        assert_eq!(m.minute(), 15.0);
        assert_eq!(m.second(), 14.0);
        assert_eq!(m.millisecond(), 666.0);
        assert_eq!(m.month(), 3.0);
        assert_eq!(m.week(), 18.0);
        assert_eq!(m.year(), 1987.0);
    }

    #[test]
    fn test_invalid_getters_are_nan() {
        let m = Moment::invalid();
        assert!(m.year().is_nan());
        assert!(m.value_of().is_nan());
        assert_eq!(m.format("YYYY"), "Invalid date");
    }

    #[test]
    fn test_week_boundaries() {
        // 1987-01-01 was a Thursday
        assert_eq!(moment("1987-01-01").week(), 1.0);
        assert_eq!(moment("1987-01-03").week(), 1.0);
        assert_eq!(moment("1987-01-04").week(), 2.0);
        // Thursday 1987-12-31 shares its week with 1988-01-01
        assert_eq!(moment("1987-12-31").week(), 1.0);
        assert_eq!(moment("1987-12-26").week(), 52.0);
    }

    #[test]
    fn test_value_of_and_from_millis() {
        let m = moment("1970-01-02");
        assert_eq!(m.value_of(), 86_400_000.0);
        assert_eq!(Moment::from_millis(86_400_000.0), m);
    }

    #[test]
    fn test_add_millis() {
        let m = moment("2000-01-01 00:00");
        assert_eq!(m.add_millis(3_600_000.0), moment("2000-01-01 01:00"));
        assert_eq!(m.add_millis(-60_000.0), moment("1999-12-31 23:59"));
        assert!(!m.add_millis(f64::NAN).is_valid());
    }

    #[test]
    fn test_diff_units() {
        let a = moment("1987-04-30 12:15:14.666");
        let b = moment("2014-05-01 12:15:14.666");
        assert_eq!(b.diff(&a, DiffUnit::Days), 9863.0);
        assert_eq!(b.diff(&a, DiffUnit::Seconds), 852_163_200.0);
        assert_eq!(b.diff(&a, DiffUnit::Milliseconds), 852_163_200_000.0);
        assert_eq!(b.diff(&a, DiffUnit::Years), 27.0);
        assert_eq!(a.diff(&b, DiffUnit::Years), -27.0);
        assert_eq!(b.diff(&a, DiffUnit::Months), 324.0);
    }

    #[test]
    fn test_diff_months_truncates_toward_zero() {
        let jan31 = moment("2001-01-31");
        let feb28 = moment("2001-02-28");
        let mar01 = moment("2001-03-01");
        // Jan 31 + 1 month clamps to Feb 28
        assert_eq!(feb28.diff(&jan31, DiffUnit::Months), 1.0);
        assert_eq!(mar01.diff(&jan31, DiffUnit::Months), 1.0);
        assert_eq!(jan31.diff(&mar01, DiffUnit::Months), -1.0);
        assert_eq!(moment("2001-02-15").diff(&jan31, DiffUnit::Months), 0.0);
        assert_eq!(moment("2001-04-30").diff(&jan31, DiffUnit::Quarters), 0.0);
    }

    #[test]
    fn test_diff_unit_names() {
        assert_eq!(diff_unit(None).unwrap(), DiffUnit::Milliseconds);
        assert_eq!(
            diff_unit(Some(&Value::String("days".to_string()))).unwrap(),
            DiffUnit::Days
        );
        assert_eq!(
            diff_unit(Some(&Value::String("M".to_string()))).unwrap(),
            DiffUnit::Months
        );
        assert!(diff_unit(Some(&Value::String("fortnights".to_string()))).is_err());
        assert!(diff_unit(Some(&Value::Number(1.0))).is_err());
    }

    #[test]
    fn test_format_tokens() {
        let m = moment("1987-04-30 12:15:14.666");
        assert_eq!(m.format("YYYY-MM-DD"), "1987-04-30");
        assert_eq!(m.format("LT"), "12:15 PM");
        assert_eq!(m.format("dddd, MMMM Do YYYY"), "Thursday, April 30th 1987");
        assert_eq!(m.format("HH:mm:ss.SSS"), "12:15:14.666");
        assert_eq!(m.format("[Week] w"), "Week w");
        assert_eq!(m.format(DEFAULT_FORMAT), "1987-04-30T12:15:14+00:00");
        assert_eq!(moment("2000-01-01 00:05").format("h:mm a"), "12:05 am");
        assert_eq!(moment("2000-01-02").format("Do"), "2nd");
        assert_eq!(moment("2000-01-11").format("Do"), "11th");
    }

    #[test]
    fn test_iso_string() {
        let m = moment("1987-04-30 12:15:14.666");
        assert_eq!(m.to_iso_string().unwrap(), "1987-04-30T12:15:14.666Z");
        assert_eq!(Moment::invalid().to_string(), "Invalid date");
    }

    #[test]
    fn test_compare() {
        let a = moment("2000-01-01");
        let b = moment("2000-01-02");
        assert_eq!(a.compare(&b), Some(Ordering::Less));
        assert_eq!(a.compare(&Moment::invalid()), None);
    }
}
