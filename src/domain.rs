use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::coerce::{format_local_time, try_parse_float, try_parse_int, DisplayZone};

// ==============================================================================
// remote feed shapes
// ==============================================================================

/// body of GET /channels/{id}/feeds.json
///
/// the `channel` metadata block is ignored. a missing `feeds` key reads as
/// an empty feed.
#[derive(Debug, Deserialize)]
pub struct FeedResponse {
    #[serde(default)]
    pub feeds: Vec<FeedEntry>,
}

/// one recorded sample
///
/// fields are kept as raw json values: the remote service sends text, but a
/// stray number or null must not fail deserialization of the whole feed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedEntry {
    #[serde(default)]
    pub created_at: Option<Value>,
    /// temperature in celsius
    #[serde(default)]
    pub field1: Option<Value>,
    /// relative humidity
    #[serde(default)]
    pub field2: Option<Value>,
    /// raw ldr (light) reading
    #[serde(default)]
    pub field3: Option<Value>,
}

impl FeedEntry {
    /// creation time in the display zone; unparseable text passes through
    pub fn display_time(&self, zone: &DisplayZone) -> Option<String> {
        match self.created_at.as_ref()? {
            Value::String(s) => Some(format_local_time(s, zone)),
            other => Some(other.to_string()),
        }
    }

    /// field values exactly as the remote service stored them
    pub fn to_latest(&self, zone: &DisplayZone) -> LatestReading {
        LatestReading {
            temperature: self.field1.clone().unwrap_or(Value::Null),
            humidity: self.field2.clone().unwrap_or(Value::Null),
            ldr: self.field3.clone().unwrap_or(Value::Null),
            time: self.display_time(zone),
        }
    }

    /// numeric chart point; each field is coerced on its own
    pub fn to_history_point(&self, zone: &DisplayZone) -> HistoryPoint {
        HistoryPoint {
            t: self.display_time(zone),
            temp: self.field1.as_ref().and_then(try_parse_float),
            hum: self.field2.as_ref().and_then(try_parse_float),
            ldr: self.field3.as_ref().and_then(try_parse_int),
        }
    }
}

// ==============================================================================
// api shapes
// ==============================================================================

/// GET /api/latest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestReading {
    pub temperature: Value,
    pub humidity: Value,
    pub ldr: Value,
    pub time: Option<String>,
}

/// GET /api/latest answers 200 either way
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LatestResponse {
    Reading(LatestReading),
    NoData { error: &'static str },
}

impl LatestResponse {
    pub fn no_data() -> Self {
        LatestResponse::NoData { error: "no_data" }
    }
}

/// one element of GET /api/history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub t: Option<String>,
    pub temp: Option<f64>,
    pub hum: Option<f64>,
    pub ldr: Option<i64>,
}

// ==============================================================================
// commands
// ==============================================================================

/// directive written to the control field (field4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    Open,
    Close,
    Auto,
}

impl Command {
    /// trim + uppercase, then match; anything else is None
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "OPEN" => Some(Command::Open),
            "CLOSE" => Some(Command::Close),
            "AUTO" => Some(Command::Auto),
            _ => None,
        }
    }

    /// pull `cmd` out of a POST body; non-json or non-string `cmd` is None
    pub fn from_body(body: &[u8]) -> Option<Self> {
        let payload: Value = serde_json::from_slice(body).ok()?;
        payload.get("cmd")?.as_str().and_then(Command::parse)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Open => "OPEN",
            Command::Close => "CLOSE",
            Command::Auto => "AUTO",
        }
    }
}

/// POST /api/command result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub ok: bool,
    /// raw (trimmed) response body, kept even when the write was rejected
    pub entry_id: String,
}

impl CommandOutcome {
    /// the update endpoint answers with the new entry id, or "0" on rejection
    pub fn from_write(status_ok: bool, body: &str) -> Self {
        let entry_id = body.trim().to_string();
        let positive_id = !entry_id.is_empty()
            && entry_id.bytes().all(|b| b.is_ascii_digit())
            && entry_id.bytes().any(|b| b != b'0');

        CommandOutcome {
            ok: status_ok && positive_id,
            entry_id,
        }
    }
}

/// GET /api/command: what the device will read from field4 next
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandState {
    pub cmd: Option<Command>,
    pub raw: String,
}

impl CommandState {
    pub fn from_body(body: &str) -> Self {
        let raw = body.trim().to_string();
        CommandState {
            cmd: Command::parse(&raw),
            raw,
        }
    }
}
