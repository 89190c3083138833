// src/models/outcome.rs
//! Verification outcome returned to the caller of the verification engine.

use crate::models::credential::KeyId;
use crate::utils::address::Address;
use serde::Serialize;
use std::fmt;

/// Final decision of one verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Granted,
    Denied,
}

/// Why a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReasonCode {
    AccessGranted,
    MalformedCredential,
    WrongApplication,
    RecordNotFound,
    Revoked,
    NotYetValid,
    Expired,
    /// The ledger could not be reached; the attempt may be retried.
    TransientLedgerError,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ReasonCode::AccessGranted => "ACCESS_GRANTED",
            ReasonCode::MalformedCredential => "MALFORMED_CREDENTIAL",
            ReasonCode::WrongApplication => "WRONG_APPLICATION",
            ReasonCode::RecordNotFound => "RECORD_NOT_FOUND",
            ReasonCode::Revoked => "REVOKED",
            ReasonCode::NotYetValid => "NOT_YET_VALID",
            ReasonCode::Expired => "EXPIRED",
            ReasonCode::TransientLedgerError => "TRANSIENT_LEDGER_ERROR",
        };
        f.write_str(code)
    }
}

/// Stages of the verification state machine, in order.
///
/// `Granted` and `Denied` are terminal; every other stage either advances
/// to the next one or drops straight to `Denied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStage {
    Received,
    Parsed,
    Authenticated,
    RevocationChecked,
    TimeChecked,
    Granted,
    Denied,
}

impl VerificationStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, VerificationStage::Granted | VerificationStage::Denied)
    }
}

/// Result of a single verification attempt. Transient; never persisted by
/// the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationOutcome {
    pub decision: Decision,
    pub reason: ReasonCode,
    pub detail: String,
    /// Last non-terminal stage reached before the decision.
    pub stage: VerificationStage,
    pub key_id: Option<KeyId>,
    /// Display-only name taken from the transport payload.
    pub key_name: Option<String>,
    /// Recipient as recorded on the ledger; set only on `Granted`.
    pub verified_recipient: Option<Address>,
    /// Seconds remaining (granted), until start (not yet valid) or since
    /// expiry (expired).
    pub seconds: Option<u64>,
    pub retryable: bool,
}

impl VerificationOutcome {
    pub fn is_granted(&self) -> bool {
        self.decision == Decision::Granted
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.decision {
            Decision::Granted => "ACCESS GRANTED",
            Decision::Denied => "ACCESS DENIED",
        };
        write!(f, "{} [{}]: {}", status, self.reason, self.detail)
    }
}

/// Human-readable rendering of a duration in whole minutes/hours.
pub fn describe_minutes(minutes: u64) -> String {
    match minutes {
        1 => "1 minute".to_string(),
        m if m < 60 => format!("{} minutes", m),
        m if m % 60 == 0 => format!("{}h", m / 60),
        m => format!("{}h {}m", m / 60, m % 60),
    }
}
