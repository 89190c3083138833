// src/models/annotation.rs
//! Transaction-note annotation schema.
//!
//! Owner and device actions are recorded as JSON notes on signed zero-value
//! transfers: `{ app_id, action, revokes?, details?, timestamp }`.

use crate::models::credential::{AppId, KeyId};
use crate::utils::serialization::{format_timestamp, parse_timestamp, TimeValue};
use serde::{Deserialize, Serialize};

/// Tag describing what a note records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteAction {
    CreateGuestKey,
    RevokeGuestKey,
    Lock,
    Unlock,
    GuestLock,
    GuestUnlock,
    GuestAccess,
    GuestAccessDenied,
    /// Any tag this crate does not interpret.
    #[serde(other)]
    Other,
}

impl NoteAction {
    /// Lock-state effect of this action, if it is an actuation event.
    pub fn lock_effect(self) -> Option<bool> {
        match self {
            NoteAction::Lock | NoteAction::GuestLock => Some(true),
            NoteAction::Unlock | NoteAction::GuestUnlock => Some(false),
            _ => None,
        }
    }
}

/// A decoded transaction note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(deserialize_with = "deserialize_app_id")]
    pub app_id: AppId,
    pub action: NoteAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revokes: Option<KeyId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

fn deserialize_app_id<'de, D>(deserializer: D) -> Result<AppId, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    AppId::from_json(&value)
        .ok_or_else(|| serde::de::Error::custom("app_id must be a string or number"))
}

impl Annotation {
    pub fn new(app_id: AppId, action: NoteAction, at: u64) -> Self {
        Self {
            app_id,
            action,
            revokes: None,
            details: None,
            timestamp: Some(format_timestamp(at)),
        }
    }

    pub fn with_revokes(mut self, key_id: KeyId) -> Self {
        self.revokes = Some(key_id);
        self
    }

    pub fn with_details<T: Serialize>(mut self, details: &T) -> Result<Self, serde_json::Error> {
        self.details = Some(serde_json::to_value(details)?);
        Ok(self)
    }

    /// Decodes a canonical note byte sequence. `None` when the note is not
    /// an annotation at all (foreign notes are common in account history).
    pub fn decode(note: &[u8]) -> Option<Self> {
        if note.is_empty() {
            return None;
        }
        serde_json::from_slice(note).ok()
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn timestamp_epoch(&self) -> Option<u64> {
        self.timestamp.as_deref().and_then(parse_timestamp)
    }

    /// Typed view of `details` for key-creation notes.
    pub fn key_details(&self) -> Option<KeyDetails> {
        self.details
            .as_ref()
            .and_then(|d| serde_json::from_value(d.clone()).ok())
    }
}

/// Body of a `create_guest_key` note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDetails {
    pub name: String,
    /// Absent in notes that grant the sending account itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub valid_from: TimeValue,
    pub valid_until: TimeValue,
}

/// Body of `guest_access` / `guest_access_denied` notes written by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDetails {
    pub key_id: Option<KeyId>,
    pub key_name: Option<String>,
    pub reason: String,
}
