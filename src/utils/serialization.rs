// src/utils/serialization.rs
//! Serialization utilities shared by the codec and the ledger adapters.
//!
//! Provides:
//! - Canonicalisation of transaction notes (base64 text or raw bytes)
//! - Lenient timestamp parsing for ISO-8601 and epoch-second values

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A transaction note as delivered by a ledger backend.
///
/// Some backends ship the note base64-encoded inside JSON, others hand over
/// the raw byte array. Adapters convert to [`NoteField::into_bytes`] before
/// any decode logic sees it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum NoteField {
    Encoded(String),
    Raw(Vec<u8>),
}

impl NoteField {
    /// Canonical byte form of the note.
    ///
    /// # Returns
    /// - `Some(bytes)` for raw notes and valid base64 text
    /// - `None` if the text is not valid base64
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            NoteField::Raw(bytes) => Some(bytes),
            NoteField::Encoded(text) => base64::decode(text.trim()).ok(),
        }
    }
}

/// A point in time given either as epoch seconds or as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    Epoch(u64),
    Text(String),
}

impl TimeValue {
    /// Resolves to epoch seconds, `None` if the text is not a timestamp.
    pub fn to_epoch(&self) -> Option<u64> {
        match self {
            TimeValue::Epoch(secs) => Some(*secs),
            TimeValue::Text(text) => parse_timestamp(text),
        }
    }
}

/// Parses ISO-8601 / RFC 3339 text, a naive `YYYY-MM-DDTHH:MM[:SS]`
/// (read as UTC), or a decimal epoch-second string.
pub fn parse_timestamp(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<u64>() {
        return Some(secs);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return u64::try_from(dt.timestamp()).ok();
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return u64::try_from(Utc.from_utc_datetime(&naive).timestamp()).ok();
        }
    }
    None
}

/// Formats epoch seconds as RFC 3339 UTC text.
pub fn format_timestamp(epoch_secs: u64) -> String {
    i64::try_from(epoch_secs)
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| epoch_secs.to_string())
}

/// Current wall-clock time in epoch seconds.
pub fn now_epoch() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_normalisation_accepts_both_shapes() {
        let encoded: NoteField = serde_json::from_str("\"eyJhIjoxfQ==\"").unwrap();
        let raw: NoteField = serde_json::from_str("[123,34,97,34,58,49,125]").unwrap();
        assert_eq!(encoded.into_bytes().unwrap(), b"{\"a\":1}");
        assert_eq!(raw.into_bytes().unwrap(), b"{\"a\":1}");
        assert_eq!(NoteField::Encoded("%%%".into()).into_bytes(), None);
    }

    #[test]
    fn timestamps_in_all_supported_forms() {
        assert_eq!(parse_timestamp("1700000000"), Some(1_700_000_000));
        assert_eq!(parse_timestamp("2023-11-14T22:13:20Z"), Some(1_700_000_000));
        assert_eq!(parse_timestamp("2023-11-14T23:13:20+01:00"), Some(1_700_000_000));
        assert_eq!(parse_timestamp("2023-11-14T22:13:20.000"), Some(1_700_000_000));
        assert_eq!(parse_timestamp("2023-11-14T22:13"), Some(1_699_999_980));
        assert_eq!(parse_timestamp("next tuesday"), None);
    }

    #[test]
    fn format_is_rfc3339_utc() {
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14T22:13:20Z");
        assert_eq!(parse_timestamp(&format_timestamp(1_234_567)), Some(1_234_567));
    }
}
