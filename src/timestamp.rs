//! Timestamp extraction for merge keys.
//!
//! Every log line starts with a date-time followed by the field separator.
//! The date-time becomes the key under which the line is ordered. By default
//! the key is the local date-time as written: an offset or zone id is checked
//! and then dropped. With UTC keys enabled, offsets are applied instead.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use thiserror::Error;

/// Ordering key of a log line
pub type LineTimestamp = NaiveDateTime;

/// ISO local date-time shapes, most specific first
const ISO_LOCAL_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("missing timestamp field")]
    Empty,
    #[error("invalid timestamp '{field}'")]
    Invalid { field: String },
    #[error("invalid offset '{offset}' in timestamp '{field}'")]
    InvalidOffset { field: String, offset: String },
    #[error("unknown zone id '{zone}' in timestamp '{field}'")]
    UnknownZone { field: String, zone: String },
    #[error("zone id '{zone}' without an offset in timestamp '{field}'")]
    ZoneWithoutOffset { field: String, zone: String },
}

/// Extracts and parses the leading timestamp field of a line
#[derive(Debug, Clone)]
pub struct TimestampParser {
    separator: char,
    custom_format: Option<String>,
    utc: bool,
}

impl TimestampParser {
    pub fn new(separator: char, custom_format: Option<String>) -> Self {
        Self {
            separator,
            custom_format,
            utc: false,
        }
    }

    /// Key offset timestamps by their UTC instant instead of their local time
    pub fn with_utc(mut self, utc: bool) -> Self {
        self.utc = utc;
        self
    }

    /// Text before the first separator, or the whole line without one
    pub fn leading_field<'a>(&self, line: &'a str) -> &'a str {
        line.split(self.separator).next().unwrap_or(line)
    }

    pub fn parse_line(&self, line: &str) -> Result<LineTimestamp, TimestampError> {
        let field = self.leading_field(line);
        match &self.custom_format {
            Some(format) => parse_with_format(field, format, self.utc),
            None => parse_iso_date_time(field, self.utc),
        }
    }
}

impl Default for TimestampParser {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SEPARATOR, None)
    }
}

/// Parse an ISO-8601 date-time with optional fraction, offset and zone id.
///
/// Accepts `2024-03-01T10:15`, `2024-03-01T10:15:30.250`,
/// `2024-03-01T10:15:30Z`, `2024-03-01T10:15:30+01:00` and
/// `2024-03-01T10:15:30+01:00[Europe/Paris]`. The offset is always
/// validated; it only shifts the result when `utc` is set.
pub fn parse_iso_date_time(field: &str, utc: bool) -> Result<LineTimestamp, TimestampError> {
    if field.is_empty() {
        return Err(TimestampError::Empty);
    }

    let (body, zone) = match field.strip_suffix(']').and_then(|s| s.rsplit_once('[')) {
        Some((body, zone)) => (body, Some(zone)),
        None => (field, None),
    };

    let (local, offset) = split_offset(body);

    if let Some(zone) = zone {
        if zone.parse::<Tz>().is_err() {
            return Err(TimestampError::UnknownZone {
                field: field.to_string(),
                zone: zone.to_string(),
            });
        }
        if offset.is_none() {
            return Err(TimestampError::ZoneWithoutOffset {
                field: field.to_string(),
                zone: zone.to_string(),
            });
        }
    }

    let naive = ISO_LOCAL_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(local, format).ok())
        .ok_or_else(|| TimestampError::Invalid {
            field: field.to_string(),
        })?;

    match offset {
        None => Ok(naive),
        Some(offset) => {
            let seconds = parse_offset_seconds(offset).ok_or_else(|| {
                TimestampError::InvalidOffset {
                    field: field.to_string(),
                    offset: offset.to_string(),
                }
            })?;
            if !utc {
                return Ok(naive);
            }
            naive
                .checked_sub_signed(chrono::Duration::seconds(i64::from(seconds)))
                .ok_or_else(|| TimestampError::Invalid {
                    field: field.to_string(),
                })
        }
    }
}

/// Split `2024-03-01T10:15:30+01:00` into the local part and the offset
fn split_offset(body: &str) -> (&str, Option<&str>) {
    let Some(time_start) = body.find('T') else {
        return (body, None);
    };

    match body[time_start..].find(['Z', 'z', '+', '-']) {
        Some(pos) => {
            let split = time_start + pos;
            (&body[..split], Some(&body[split..]))
        }
        None => (body, None),
    }
}

/// Offset east of UTC in seconds: `Z`, `+HH:MM` or `+HH:MM:SS`
fn parse_offset_seconds(offset: &str) -> Option<i32> {
    if offset.eq_ignore_ascii_case("z") {
        return Some(0);
    }

    let (sign, rest) = match offset.as_bytes().first()? {
        b'+' => (1, &offset[1..]),
        b'-' => (-1, &offset[1..]),
        _ => return None,
    };

    let parts: Vec<&str> = rest.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 || parts.iter().any(|p| p.len() != 2) {
        return None;
    }

    let mut values = [0i32; 3];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part.parse().ok()?;
    }
    let [hours, minutes, seconds] = values;
    if hours > 18 || minutes > 59 || seconds > 59 {
        return None;
    }

    let total = sign * (hours * 3600 + minutes * 60 + seconds);
    chrono::FixedOffset::east_opt(total).map(|_| total)
}

/// Parse with a user-supplied chrono format
pub fn parse_with_format(
    field: &str,
    format: &str,
    utc: bool,
) -> Result<LineTimestamp, TimestampError> {
    if field.is_empty() {
        return Err(TimestampError::Empty);
    }

    if let Ok(dt) = DateTime::parse_from_str(field, format) {
        return Ok(if utc { dt.naive_utc() } else { dt.naive_local() });
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(field, format) {
        return Ok(naive);
    }

    NaiveDate::parse_from_str(field, format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| TimestampError::Invalid {
            field: field.to_string(),
        })
}
