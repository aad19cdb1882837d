//! Conversion between DICOM date, date-time and time strings and [`chrono`] values.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

static DATE_TIME_SHAPE_REGEX: OnceLock<Regex> = OnceLock::new();
static TIME_REGEX: OnceLock<Regex> = OnceLock::new();

const DATE_FORMAT: &str = "%Y%m%d";
const DATE_TIME_FORMAT: &str = "%Y%m%d%H%M%S%.f";
const DATE_TIME_OFFSET_FORMAT: &str = "%Y%m%d%H%M%S%.f%z";

const MICROSECONDS_PER_DAY: i64 = 24 * 60 * 60 * 1_000_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid DICOM date/time string: '{0}'")]
    Format(String),

    #[error("Duration out of range for a DICOM time: {0}")]
    DurationOutOfRange(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A parsed DICOM date or date-time, with or without a UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DicomDateTime {
    Naive(NaiveDateTime),
    Zoned(DateTime<FixedOffset>),
}

impl DicomDateTime {
    /// The local date and time, ignoring any UTC offset.
    pub fn naive_local(&self) -> NaiveDateTime {
        match self {
            DicomDateTime::Naive(dt) => *dt,
            DicomDateTime::Zoned(dt) => dt.naive_local(),
        }
    }

    pub fn offset(&self) -> Option<FixedOffset> {
        match self {
            DicomDateTime::Naive(_) => None,
            DicomDateTime::Zoned(dt) => Some(*dt.offset()),
        }
    }

    fn is_midnight(&self) -> bool {
        let time = self.naive_local().time();
        time.hour() == 0 && time.minute() == 0 && time.second() == 0 && time.nanosecond() == 0
    }
}

impl From<NaiveDate> for DicomDateTime {
    fn from(date: NaiveDate) -> Self {
        DicomDateTime::Naive(date.and_time(NaiveTime::MIN))
    }
}

impl From<NaiveDateTime> for DicomDateTime {
    fn from(dt: NaiveDateTime) -> Self {
        DicomDateTime::Naive(dt)
    }
}

impl From<DateTime<FixedOffset>> for DicomDateTime {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        DicomDateTime::Zoned(dt)
    }
}

impl fmt::Display for DicomDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_datetime(self, false))
    }
}

fn date_time_shape_regex() -> &'static Regex {
    DATE_TIME_SHAPE_REGEX.get_or_init(|| {
        Regex::new(r"^[0-9]{8}(?:[0-9]{6}\.[0-9]{1,6}(?:[+-][0-9]{4})?)?$")
            .expect("static date-time regex is valid")
    })
}

fn time_regex() -> &'static Regex {
    TIME_REGEX.get_or_init(|| {
        Regex::new(r"^([0-9]{2})(?:([0-9]{2})(?:([0-9]{2})(?:\.([0-9]{1,6}))?)?)?$")
            .expect("static time regex is valid")
    })
}

fn parse_with_format(value: &str, format: &str) -> Option<DicomDateTime> {
    match format {
        DATE_FORMAT => NaiveDate::parse_from_str(value, format)
            .ok()
            .map(DicomDateTime::from),
        DATE_TIME_FORMAT => NaiveDateTime::parse_from_str(value, format)
            .ok()
            .map(DicomDateTime::Naive),
        _ => DateTime::parse_from_str(value, format)
            .ok()
            .map(DicomDateTime::Zoned),
    }
}

/// Parses a DICOM date (`YYYYMMDD`) or date-time (`YYYYMMDDHHMMSS.FFFFFF[&ZZXX]`).
///
/// The formats are tried in that order and the first one matching the whole input wins.
///
/// # Example
///
/// ```
/// use dcmstore::datetime::{format_datetime, parse_date};
///
/// let date = parse_date("20010102").unwrap();
/// assert_eq!(format_datetime(&date, false), "20010102");
/// ```
pub fn parse_date(value: &str) -> Result<DicomDateTime> {
    if !date_time_shape_regex().is_match(value) {
        return Err(Error::Format(value.into()));
    }

    [DATE_FORMAT, DATE_TIME_FORMAT, DATE_TIME_OFFSET_FORMAT]
        .iter()
        .find_map(|&format| parse_with_format(value, format))
        .ok_or_else(|| Error::Format(value.into()))
}

/// Same as [`parse_date`]; reads better where a time component is expected.
pub fn parse_datetime(value: &str) -> Result<DicomDateTime> {
    parse_date(value)
}

/// Parses a DICOM time string (`HH[MM[SS[.F{1,6}]]]`) into a [`Duration`] since midnight.
///
/// Only the hour component is mandatory. Fractional seconds are right-padded to six
/// digits and read as microseconds.
pub fn parse_time(value: &str) -> Result<Duration> {
    let captures = time_regex()
        .captures(value)
        .ok_or_else(|| Error::Format(value.into()))?;

    let component = |index: usize| -> Result<i64> {
        match captures.get(index) {
            Some(m) => m.as_str().parse().map_err(|_| Error::Format(value.into())),
            None => Ok(0),
        }
    };

    let micros = match captures.get(4) {
        Some(m) => format!("{:0<6}", m.as_str())
            .parse()
            .map_err(|_| Error::Format(value.into()))?,
        None => 0,
    };

    Ok(Duration::hours(component(1)?)
        + Duration::minutes(component(2)?)
        + Duration::seconds(component(3)?)
        + Duration::microseconds(micros))
}

/// Formats a date or date-time as a DICOM string.
///
/// A value at exactly midnight is written as a bare `YYYYMMDD` date unless
/// `use_time_component` is set. Zoned values get their UTC offset appended.
pub fn format_datetime(value: &DicomDateTime, use_time_component: bool) -> String {
    if !use_time_component && value.is_midnight() {
        return value.naive_local().format(DATE_FORMAT).to_string();
    }

    match value {
        DicomDateTime::Naive(dt) => dt.format("%Y%m%d%H%M%S%.6f").to_string(),
        DicomDateTime::Zoned(dt) => dt.format("%Y%m%d%H%M%S%.6f%z").to_string(),
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Formats a duration since midnight as a DICOM time string (`HHMMSS.FFFFFF`).
///
/// Durations must lie within `[0, 24h)`. Precision below one microsecond is dropped.
pub fn format_duration(value: Duration) -> Result<String> {
    let micros = value
        .num_microseconds()
        .ok_or_else(|| Error::DurationOutOfRange(format!("{value}")))?;
    if !(0..MICROSECONDS_PER_DAY).contains(&micros) {
        return Err(Error::DurationOutOfRange(format!("{value}")));
    }

    let (secs, fraction) = (micros / 1_000_000, micros % 1_000_000);
    Ok(format!(
        "{:02}{:02}{:02}.{:06}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60,
        fraction
    ))
}
