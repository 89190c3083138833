// src/error.rs
//! Error types shared across the access-control crate.
//!
//! Decision paths never surface these to the guest: the verification engine
//! folds them into a `VerificationOutcome`. They reach callers only on the
//! owner side (issuance, revocation) and at the adapter seams.

use crate::models::credential::KeyId;
use thiserror::Error;

/// Failures talking to the ledger service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Connection refused, DNS failure, reset, ...
    #[error("ledger transport failure: {0}")]
    Transport(String),

    /// The request exceeded the configured timeout.
    #[error("ledger request timed out")]
    Timeout,

    /// The ledger answered with an unexpected HTTP status.
    #[error("ledger returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("undecodable ledger response: {0}")]
    Decode(String),

    /// The ledger refused a submitted transaction.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// A submitted transaction was not confirmed within the allowed rounds.
    #[error("transaction {id} not confirmed after {rounds} rounds")]
    ConfirmationTimeout { id: String, rounds: u64 },
}

impl LedgerError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Transport(_)
            | LedgerError::Timeout
            | LedgerError::ConfirmationTimeout { .. } => true,
            LedgerError::Status { status, .. } => *status >= 500 || *status == 429,
            LedgerError::Decode(_) | LedgerError::Rejected(_) => false,
        }
    }
}

/// Failures decoding a transport credential.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed credential payload: {0}")]
    MalformedPayload(String),

    #[error("unknown credential schema: {0}")]
    UnknownSchema(String),
}

/// Failures resolving the authoritative record behind a key id.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("no ledger record for key {0}")]
    NotFound(KeyId),

    #[error("invalid ledger record: {0}")]
    InvalidRecord(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Failures producing a signature.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("signer unavailable: {0}")]
    Unavailable(String),

    #[error("invalid key material: {0}")]
    Key(String),
}

/// Failures parsing a textual ledger address.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must be {expected} characters, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("invalid base32 character {0:?}")]
    Alphabet(char),

    #[error("address checksum mismatch")]
    Checksum,
}

/// Owner-side issuance and revocation failures.
#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("invalid recipient address {address:?}: {source}")]
    InvalidRecipient {
        address: String,
        #[source]
        source: AddressError,
    },

    #[error("invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("failed to encode ledger payload: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_transient() {
        assert!(LedgerError::Timeout.is_transient());
        assert!(LedgerError::Transport("reset".into()).is_transient());
        assert!(LedgerError::Status { status: 503, body: String::new() }.is_transient());
        assert!(!LedgerError::Status { status: 400, body: String::new() }.is_transient());
        assert!(!LedgerError::Rejected("overspend".into()).is_transient());
    }
}
