//! ==============================================================================
//! coerce.rs - lenient field parsing and timestamp display
//! ==============================================================================
//!
//! purpose:
//!     the remote feed stores every field as text (or null). these helpers turn
//!     that text into numbers and display strings WITHOUT ever failing a request:
//!     - try_parse_float / try_parse_int: value or None
//!     - format_local_time: converted string, or the input unchanged
//!
//! relationships:
//!     - used by: domain.rs (FeedEntry -> LatestReading / HistoryPoint)
//!     - used by: config.rs (DisplayZone is read from [display] timezone)
//!
//! ==============================================================================

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// timestamp layout used by the remote service (always UTC)
const REMOTE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// layout shown on the dashboard
const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ==============================================================================
// numeric coercion
// ==============================================================================

/// parse a feed value as a real number
///
/// accepts json strings (surrounding whitespace ignored) and json numbers.
/// anything else, including nan/inf which json cannot carry, is None.
pub fn try_parse_float(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// parse a feed value as an integer, tolerating "512.0" style text
///
/// fractional values are truncated toward zero.
pub fn try_parse_int(value: &Value) -> Option<i64> {
    if let Value::Number(n) = value {
        if let Some(i) = n.as_i64() {
            return Some(i);
        }
    }

    let v = try_parse_float(value)?.trunc();
    if v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

// ==============================================================================
// display timezone
// ==============================================================================

/// zone used to render feed timestamps
///
/// config values:
///     "local"            -> host timezone
///     "UTC", "Asia/..."  -> IANA zone name
///     "+08:00", "-0530"  -> fixed offset
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum DisplayZone {
    #[default]
    Local,
    Named(Tz),
    Fixed(FixedOffset),
}

impl fmt::Display for DisplayZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayZone::Local => write!(f, "local"),
            DisplayZone::Named(tz) => write!(f, "{}", tz.name()),
            DisplayZone::Fixed(offset) => write!(f, "{}", offset),
        }
    }
}

impl FromStr for DisplayZone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("local") {
            return Ok(DisplayZone::Local);
        }
        if s.starts_with('+') || s.starts_with('-') {
            return parse_fixed_offset(s)
                .map(DisplayZone::Fixed)
                .ok_or_else(|| format!("invalid utc offset: {}", s));
        }
        s.parse::<Tz>()
            .map(DisplayZone::Named)
            .map_err(|e| format!("unknown timezone {}: {}", s, e))
    }
}

impl TryFrom<String> for DisplayZone {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// "+08:00", "+0800" or "+8" -> FixedOffset
fn parse_fixed_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.split_at(1) {
        ("+", rest) => (1, rest),
        ("-", rest) => (-1, rest),
        _ => return None,
    };

    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };

    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

// ==============================================================================
// timestamp conversion
// ==============================================================================

/// convert "2025-12-11T05:42:33Z" into "2025-12-11 13:42:33" in `zone`
///
/// never fails: input that does not match the remote layout is returned as-is.
pub fn format_local_time(iso_utc: &str, zone: &DisplayZone) -> String {
    let naive = match NaiveDateTime::parse_from_str(iso_utc, REMOTE_TIME_FORMAT) {
        Ok(naive) => naive,
        Err(_) => return iso_utc.to_string(),
    };
    let utc: DateTime<Utc> = Utc.from_utc_datetime(&naive);

    match zone {
        DisplayZone::Local => utc.with_timezone(&Local).format(DISPLAY_TIME_FORMAT).to_string(),
        DisplayZone::Named(tz) => utc.with_timezone(tz).format(DISPLAY_TIME_FORMAT).to_string(),
        DisplayZone::Fixed(offset) => utc.with_timezone(offset).format(DISPLAY_TIME_FORMAT).to_string(),
    }
}
