// src/models/credential.rs
//! Guest-key data model.
//!
//! Two views of the same key exist:
//! - [`Credential`]: the transport claim a guest presents (QR or pasted text).
//!   It carries no authority of its own.
//! - [`CredentialRecord`]: the authoritative, ledger-resident record the
//!   verifier re-derives every decision-relevant field from.

use crate::utils::address::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier linking a credential to its ledger record.
///
/// Either a transaction id (transaction-note strategy) or a key-value
/// object name (object-store strategy).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Application namespace tag binding credentials to one deployment.
///
/// Ledger annotations and payloads may carry it as text or as a number;
/// both normalise to the decimal/text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Normalises a JSON string or number into an `AppId`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(Self(s.clone())),
            serde_json::Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a ledger record. `Revoked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyStatus {
    Active,
    Revoked,
}

/// A guest credential as carried in the transport payload.
///
/// Only `app_id` and `key_id` are trusted, and only as a namespace tag and a
/// pointer. Everything else is a display or fast-path hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub schema_version: String,
    pub app_id: AppId,
    pub key_id: KeyId,
    pub key_name: String,
    pub recipient_hint: Option<String>,
    pub valid_from_hint: Option<u64>,
    pub valid_until_hint: Option<u64>,
}

/// The authoritative ledger record behind a key id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialRecord {
    pub key_id: KeyId,
    /// Who the key was issued to, as written by the owner.
    pub recipient: Address,
    /// Account that authored the record, when the backend exposes it.
    pub issuer: Option<Address>,
    /// Inclusive lower bound, epoch seconds.
    pub valid_from: u64,
    /// Inclusive upper bound, epoch seconds.
    pub valid_until: u64,
    pub status: KeyStatus,
}

impl CredentialRecord {
    /// Whether the validity window is well formed (`valid_from < valid_until`).
    pub fn has_valid_window(&self) -> bool {
        self.valid_from < self.valid_until
    }
}
