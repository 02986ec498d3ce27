use crate::errors::{ArchiveError, ArchiveResult};
use chrono::{DateTime, Duration, Local, NaiveDateTime};

const NAIVE_FORMATS: &[&str] = &[
    "%Y%m%d %H:%M:%S%.f",
    "%Y%m%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.fZ",
];

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

/// Parses a producer timestamp. Offset-carrying forms are normalized to UTC.
pub fn parse_timestamp(raw: &str) -> ArchiveResult<NaiveDateTime> {
    let raw = raw.trim();
    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(raw, format) {
            return Ok(parsed.naive_utc());
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(parsed);
        }
    }
    Err(ArchiveError::Timestamp(format!(
        "timestamp '{raw}' is in an unsupported format"
    )))
}

pub fn elapsed_ms(start: &str, end: &str) -> ArchiveResult<i64> {
    Ok((parse_timestamp(end)? - parse_timestamp(start)?).num_milliseconds())
}

/// Applies `adjust_secs` and renders ISO-8601 with milliseconds. Unadjusted stamps are
/// returned verbatim.
pub fn adjusted_timestamp(raw: &str, adjust_secs: i64) -> ArchiveResult<String> {
    if adjust_secs == 0 {
        return Ok(raw.to_string());
    }
    let adjusted = parse_timestamp(raw)? + Duration::seconds(adjust_secs);
    Ok(adjusted.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
}

/// Fixed shift applied to stored timestamps, optionally converting local time to UTC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeAdjust {
    pub secs: i64,
    pub with_system_timezone: bool,
}

impl TimeAdjust {
    pub fn new(secs: i64, with_system_timezone: bool) -> Self {
        Self {
            secs,
            with_system_timezone,
        }
    }

    /// Total shift in seconds. The system timezone option subtracts the local UTC offset.
    pub fn total_secs(&self) -> i64 {
        if self.with_system_timezone {
            self.secs - i64::from(Local::now().offset().local_minus_utc())
        } else {
            self.secs
        }
    }
}
