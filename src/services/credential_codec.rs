// src/services/credential_codec.rs
//! Credential codec.
//!
//! Converts guest credentials to and from the compact JSON text carried in
//! QR codes or pasted by hand. Decoding classifies failures as
//! `MalformedPayload` (not a JSON object) or `UnknownSchema` (a JSON object
//! of an unrecognised version or shape).

use crate::error::DecodeError;
use crate::models::credential::{AppId, Credential, CredentialRecord, KeyId};
use crate::utils::serialization::{format_timestamp, TimeValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Schema version written by this codec.
pub const SCHEMA_VERSION: &str = "1";

const ACCEPTED_VERSIONS: &[&str] = &["1", "1.0"];

/// Placeholder shown when a payload carries no display name.
pub const UNNAMED_KEY: &str = "Unknown Guest";

/// Issuer-side metadata that is not part of the ledger record.
#[derive(Debug, Clone)]
pub struct CredentialMeta {
    pub app_id: AppId,
    pub key_name: String,
    /// Embed recipient and validity window as fast-path hints.
    pub include_hints: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOut<'a> {
    schema_version: &'a str,
    app_id: &'a str,
    key_id: &'a str,
    key_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipient_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    valid_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    valid_until: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIn {
    #[serde(alias = "version")]
    schema_version: Option<Value>,
    app_id: Value,
    key_id: String,
    #[serde(default)]
    key_name: Option<String>,
    #[serde(default, alias = "recipient")]
    recipient_address: Option<String>,
    #[serde(default)]
    valid_from: Option<TimeValue>,
    #[serde(default)]
    valid_until: Option<TimeValue>,
}

/// Encodes a credential for `record` into transport text.
pub fn encode(
    record: &CredentialRecord,
    meta: &CredentialMeta,
) -> Result<String, serde_json::Error> {
    let wire = WireOut {
        schema_version: SCHEMA_VERSION,
        app_id: meta.app_id.as_str(),
        key_id: record.key_id.as_str(),
        key_name: &meta.key_name,
        recipient_address: meta.include_hints.then(|| record.recipient.to_string()),
        valid_from: meta.include_hints.then(|| format_timestamp(record.valid_from)),
        valid_until: meta.include_hints.then(|| format_timestamp(record.valid_until)),
    };
    serde_json::to_string(&wire)
}

/// Decodes transport text into a [`Credential`].
///
/// # Errors
/// - `MalformedPayload` if the text is not a JSON object
/// - `UnknownSchema` if the version is missing or unsupported, required
///   fields are missing or mistyped, or a time hint is not a timestamp
pub fn decode(payload: &str) -> Result<Credential, DecodeError> {
    let value: Value = serde_json::from_str(payload.trim())
        .map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;
    if !value.is_object() {
        return Err(DecodeError::MalformedPayload("payload is not a JSON object".into()));
    }
    let wire: WireIn =
        serde_json::from_value(value).map_err(|e| DecodeError::UnknownSchema(e.to_string()))?;

    let schema_version = match &wire.schema_version {
        Some(Value::String(v)) => v.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => return Err(DecodeError::UnknownSchema(format!("schema version {}", other))),
        None => return Err(DecodeError::UnknownSchema("missing schemaVersion".into())),
    };
    if !ACCEPTED_VERSIONS.contains(&schema_version.as_str()) {
        return Err(DecodeError::UnknownSchema(format!(
            "unsupported schema version {}",
            schema_version
        )));
    }

    let app_id = AppId::from_json(&wire.app_id)
        .ok_or_else(|| DecodeError::UnknownSchema("appId must be a string or number".into()))?;
    if wire.key_id.trim().is_empty() {
        return Err(DecodeError::UnknownSchema("empty keyId".into()));
    }

    Ok(Credential {
        schema_version,
        app_id,
        key_id: KeyId::new(wire.key_id),
        key_name: wire.key_name.unwrap_or_else(|| UNNAMED_KEY.to_string()),
        recipient_hint: wire.recipient_address,
        valid_from_hint: time_hint(wire.valid_from, "validFrom")?,
        valid_until_hint: time_hint(wire.valid_until, "validUntil")?,
    })
}

fn time_hint(value: Option<TimeValue>, field: &str) -> Result<Option<u64>, DecodeError> {
    match value {
        None => Ok(None),
        Some(v) => v
            .to_epoch()
            .map(Some)
            .ok_or_else(|| DecodeError::UnknownSchema(format!("{} is not a timestamp", field))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::credential::KeyStatus;
    use crate::utils::address::Address;

    fn record() -> CredentialRecord {
        CredentialRecord {
            key_id: KeyId::new("4YQ7LQX6B2PZ"),
            recipient: Address::from_bytes([8u8; 32]),
            issuer: None,
            valid_from: 1_700_000_000,
            valid_until: 1_700_003_600,
            status: KeyStatus::Active,
        }
    }

    fn meta(include_hints: bool) -> CredentialMeta {
        CredentialMeta {
            app_id: AppId::new("1234"),
            key_name: "Dog walker".into(),
            include_hints,
        }
    }

    #[test]
    fn round_trip_preserves_pointer_and_namespace() {
        for hints in [false, true] {
            let text = encode(&record(), &meta(hints)).unwrap();
            let credential = decode(&text).unwrap();
            assert_eq!(credential.app_id, AppId::new("1234"));
            assert_eq!(credential.key_id, KeyId::new("4YQ7LQX6B2PZ"));
            assert_eq!(credential.key_name, "Dog walker");
        }
    }

    #[test]
    fn hints_are_carried_when_requested() {
        let credential = decode(&encode(&record(), &meta(true)).unwrap()).unwrap();
        assert_eq!(credential.valid_from_hint, Some(1_700_000_000));
        assert_eq!(credential.valid_until_hint, Some(1_700_003_600));
        assert_eq!(credential.recipient_hint, Some(record().recipient.to_string()));

        let bare = decode(&encode(&record(), &meta(false)).unwrap()).unwrap();
        assert_eq!(bare.valid_from_hint, None);
        assert_eq!(bare.recipient_hint, None);
    }

    #[test]
    fn accepts_dashboard_style_payloads() {
        let text = r#"{"version":"1.0","keyId":"TX1","recipient":"R","validFrom":"2025-03-02T09:00",
                       "validUntil":1740934800,"keyName":"Cleaner","appId":1234,"createdAt":"x"}"#;
        let credential = decode(text).unwrap();
        assert_eq!(credential.app_id, AppId::new("1234"));
        assert_eq!(credential.valid_from_hint, Some(1_740_906_000));
        assert_eq!(credential.valid_until_hint, Some(1_740_934_800));
        assert_eq!(credential.recipient_hint.as_deref(), Some("R"));
    }

    #[test]
    fn malformed_payloads() {
        for text in ["", "not json", "{\"keyId\":", "[1,2,3]", "\"keyId\""] {
            assert!(matches!(decode(text), Err(DecodeError::MalformedPayload(_))), "{}", text);
        }
    }

    #[test]
    fn unknown_schemas() {
        let cases = [
            r#"{"appId":"1","keyId":"K"}"#,
            r#"{"schemaVersion":"2","appId":"1","keyId":"K"}"#,
            r#"{"schemaVersion":true,"appId":"1","keyId":"K"}"#,
            r#"{"schemaVersion":1,"keyId":"K"}"#,
            r#"{"schemaVersion":1,"appId":"1"}"#,
            r#"{"schemaVersion":1,"appId":{"x":1},"keyId":"K"}"#,
            r#"{"schemaVersion":1,"appId":"1","keyId":"  "}"#,
            r#"{"schemaVersion":1,"appId":"1","keyId":"K","validFrom":"soon"}"#,
        ];
        for text in cases {
            assert!(matches!(decode(text), Err(DecodeError::UnknownSchema(_))), "{}", text);
        }
    }

    #[test]
    fn missing_name_gets_placeholder() {
        let credential = decode(r#"{"schemaVersion":1,"appId":"1","keyId":"K"}"#).unwrap();
        assert_eq!(credential.key_name, UNNAMED_KEY);
        assert_eq!(credential.schema_version, "1");
    }
}
