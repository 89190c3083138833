// src/services/verifier.rs
//! Guest-key verification engine.
//!
//! Runs the verification state machine for one presented credential:
//!
//! ```text
//! RECEIVED -> PARSED -> AUTHENTICATED -> REVOCATION_CHECKED -> TIME_CHECKED -> GRANTED
//!     \__________\____________\_________________\___________________\______> DENIED
//! ```
//!
//! The transport credential only contributes a pointer (`keyId`), a
//! namespace tag (`appId`) and a display name. Recipient, validity window
//! and status are always re-derived from the ledger record. Each attempt is
//! independent, so concurrent verifications share no mutable state.

use crate::blockchain::ledger::LedgerReader;
use crate::error::{LedgerError, RecordError};
use crate::models::credential::{AppId, Credential, CredentialRecord, KeyId, KeyStatus};
use crate::models::outcome::{
    describe_minutes, Decision, ReasonCode, VerificationOutcome, VerificationStage,
};
use crate::services::credential_codec;
use crate::services::record_reader::{LedgerStrategy, RecordReader};
use crate::services::revocation::{RevocationScanner, ScanFailurePolicy, DEFAULT_SCAN_LIMIT};
use crate::utils::address::Address;
use crate::utils::serialization::now_epoch;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;

/// Tunables for [`VerificationEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Transactions inspected per revocation scan.
    pub scan_limit: usize,
    pub scan_failure_policy: ScanFailurePolicy,
    /// Seconds the validity window is widened by on both ends.
    pub clock_skew_tolerance: u64,
    /// Required author of transaction-note records.
    pub owner: Option<Address>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            scan_limit: DEFAULT_SCAN_LIMIT,
            scan_failure_policy: ScanFailurePolicy::FailClosed,
            clock_skew_tolerance: 0,
            owner: None,
        }
    }
}

/// Verifier for guest credentials of one application.
pub struct VerificationEngine {
    app_id: AppId,
    reader: RecordReader,
    scanner: RevocationScanner,
    clock_skew_tolerance: u64,
}

/// Book-keeping for a single attempt.
struct Attempt {
    started: Instant,
    stage: VerificationStage,
    key_id: Option<KeyId>,
    key_name: Option<String>,
}

impl Attempt {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            stage: VerificationStage::Received,
            key_id: None,
            key_name: None,
        }
    }

    fn advance(&mut self, stage: VerificationStage) {
        debug_assert!(!stage.is_terminal(), "terminal stages are set by finish");
        debug!("{:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    fn finish(
        self,
        decision: Decision,
        reason: ReasonCode,
        detail: String,
        verified_recipient: Option<Address>,
        seconds: Option<u64>,
        retryable: bool,
    ) -> VerificationOutcome {
        let terminal = match decision {
            Decision::Granted => VerificationStage::Granted,
            Decision::Denied => VerificationStage::Denied,
        };
        let elapsed = self.started.elapsed();
        let key = self.key_id.as_ref().map_or("-", KeyId::as_str);
        match decision {
            Decision::Granted => info!(
                "{:?} key={} reason={} after {:?} in {:?}: {}",
                terminal, key, reason, self.stage, elapsed, detail
            ),
            Decision::Denied => warn!(
                "{:?} key={} reason={} after {:?} in {:?}: {}",
                terminal, key, reason, self.stage, elapsed, detail
            ),
        }
        VerificationOutcome {
            decision,
            reason,
            detail,
            stage: self.stage,
            key_id: self.key_id,
            key_name: self.key_name,
            verified_recipient,
            seconds,
            retryable,
        }
    }

    fn deny(self, reason: ReasonCode, detail: impl Into<String>) -> VerificationOutcome {
        self.finish(Decision::Denied, reason, detail.into(), None, None, false)
    }

    fn deny_for(self, reason: ReasonCode, detail: String, seconds: u64) -> VerificationOutcome {
        self.finish(Decision::Denied, reason, detail, None, Some(seconds), false)
    }

    fn deny_transient(self, error: &LedgerError) -> VerificationOutcome {
        self.finish(
            Decision::Denied,
            ReasonCode::TransientLedgerError,
            format!("Ledger unavailable, try again: {}", error),
            None,
            None,
            true,
        )
    }
}

impl VerificationEngine {
    /// Creates an engine reading records for `app_id` through `ledger`.
    pub fn new(
        ledger: Arc<dyn LedgerReader>,
        app_id: AppId,
        strategy: LedgerStrategy,
        options: EngineOptions,
    ) -> Self {
        let reader =
            RecordReader::new(ledger.clone(), strategy, app_id.clone()).with_owner(options.owner);
        let scanner = RevocationScanner::new(ledger, app_id.clone())
            .with_scan_limit(options.scan_limit)
            .with_policy(options.scan_failure_policy);
        Self {
            app_id,
            reader,
            scanner,
            clock_skew_tolerance: options.clock_skew_tolerance,
        }
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// Verifies `payload` against the wall clock.
    pub async fn verify_now(&self, payload: &str) -> VerificationOutcome {
        self.verify(payload, now_epoch()).await
    }

    /// Verifies a transport credential at time `now` (epoch seconds).
    ///
    /// Never fails: every path, including ledger outages, ends in an
    /// outcome. Ledger read failures are denied as
    /// [`ReasonCode::TransientLedgerError`] with `retryable` set.
    pub async fn verify(&self, payload: &str, now: u64) -> VerificationOutcome {
        let mut attempt = Attempt::new();

        // PARSE
        let credential: Credential = match credential_codec::decode(payload) {
            Ok(credential) => credential,
            Err(e) => {
                let detail = format!("Invalid key format: {}", e);
                return attempt.deny(ReasonCode::MalformedCredential, detail);
            }
        };
        attempt.key_id = Some(credential.key_id.clone());
        attempt.key_name = Some(credential.key_name.clone());
        attempt.advance(VerificationStage::Parsed);

        // NAMESPACE CHECK
        if credential.app_id != self.app_id {
            return attempt.deny(
                ReasonCode::WrongApplication,
                format!("Key belongs to application {}, not {}", credential.app_id, self.app_id),
            );
        }

        // AUTHENTICATE
        let record = match self.reader.fetch_record(&credential.key_id).await {
            Ok(record) => record,
            Err(RecordError::Ledger(e)) => return attempt.deny_transient(&e),
            Err(e @ RecordError::NotFound(_)) | Err(e @ RecordError::InvalidRecord(_)) => {
                let detail = format!("Key not found on the ledger: {}", e);
                return attempt.deny(ReasonCode::RecordNotFound, detail);
            }
        };
        attempt.advance(VerificationStage::Authenticated);

        // REVOCATION
        match self.check_revocation(&record).await {
            Ok(()) => {}
            Err(Denial::Final(reason, detail)) => return attempt.deny(reason, detail),
            Err(Denial::Transient(e)) => return attempt.deny_transient(&e),
        }
        attempt.advance(VerificationStage::RevocationChecked);

        // TIME CHECK
        let starts = record.valid_from.saturating_sub(self.clock_skew_tolerance);
        let ends = record.valid_until.saturating_add(self.clock_skew_tolerance);
        if now < starts {
            let seconds = starts - now;
            return attempt.deny_for(
                ReasonCode::NotYetValid,
                format!("Key not valid yet. Starts in {}", describe_minutes(ceil_minutes(seconds))),
                seconds,
            );
        }
        if now > ends {
            let seconds = now - ends;
            return attempt.deny_for(
                ReasonCode::Expired,
                format!("Key expired {} ago", describe_minutes(seconds / 60)),
                seconds,
            );
        }
        attempt.advance(VerificationStage::TimeChecked);

        let remaining = ends - now;
        attempt.finish(
            Decision::Granted,
            ReasonCode::AccessGranted,
            format!("Access granted. Valid for {} more", describe_minutes(remaining / 60)),
            Some(record.recipient),
            Some(remaining),
            false,
        )
    }

    /// Establishes that the record has not been revoked.
    async fn check_revocation(&self, record: &CredentialRecord) -> Result<(), Denial> {
        if record.status == KeyStatus::Revoked {
            return Err(Denial::Final(ReasonCode::Revoked, REVOKED_DETAIL));
        }
        if self.reader.strategy().has_inline_status() {
            return Ok(());
        }
        let owner = record
            .issuer
            .ok_or(Denial::Final(ReasonCode::RecordNotFound, "Record has no issuing account"))?;
        match self.scanner.is_revoked(&record.key_id, &owner).await {
            Ok(false) => Ok(()),
            Ok(true) => Err(Denial::Final(ReasonCode::Revoked, REVOKED_DETAIL)),
            Err(e) => Err(Denial::Transient(e)),
        }
    }
}

const REVOKED_DETAIL: &str = "Key has been revoked by the owner";

enum Denial {
    Final(ReasonCode, &'static str),
    Transient(LedgerError),
}

fn ceil_minutes(seconds: u64) -> u64 {
    (seconds + 59) / 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::memory_ledger::MemoryLedger;
    use crate::models::layout::ObjectRecord;

    const APP: u64 = 31;
    const T: u64 = 1_700_000_000;

    fn fixture(status: KeyStatus) -> (Arc<MemoryLedger>, VerificationEngine) {
        let ledger = Arc::new(MemoryLedger::new(T));
        ledger.deploy_application(APP, Address::from_bytes([1u8; 32]));
        let record = ObjectRecord {
            recipient: Address::from_bytes([2u8; 32]),
            valid_from: T,
            valid_until: T + 3600,
            status,
        };
        ledger.put_object(APP, b"key-1", record.encode().to_vec());
        let engine = VerificationEngine::new(
            ledger.clone(),
            AppId::new("31"),
            LedgerStrategy::ObjectStore { application_id: APP },
            EngineOptions::default(),
        );
        (ledger, engine)
    }

    fn payload(app: &str, key: &str) -> String {
        format!(r#"{{"schemaVersion":"1","appId":"{}","keyId":"{}","keyName":"Walker"}}"#, app, key)
    }

    #[tokio::test]
    async fn grants_inside_the_window_with_ledger_recipient() {
        let (_, engine) = fixture(KeyStatus::Active);
        let outcome = engine.verify(&payload("31", "key-1"), T + 1800).await;
        assert_eq!(outcome.decision, Decision::Granted);
        assert_eq!(outcome.stage, VerificationStage::TimeChecked);
        assert_eq!(outcome.seconds, Some(1800));
        assert_eq!(outcome.detail, "Access granted. Valid for 30 minutes more");
        assert_eq!(outcome.verified_recipient, Some(Address::from_bytes([2u8; 32])));
        assert_eq!(outcome.key_name.as_deref(), Some("Walker"));
    }

    #[tokio::test]
    async fn hints_in_the_payload_are_ignored() {
        let (_, engine) = fixture(KeyStatus::Active);
        let forged = format!(
            r#"{{"schemaVersion":1,"appId":"31","keyId":"key-1","validFrom":0,"validUntil":99999999999,"recipientAddress":"{}"}}"#,
            Address::from_bytes([7u8; 32])
        );
        let outcome = engine.verify(&forged, T + 7200).await;
        assert_eq!(outcome.reason, ReasonCode::Expired);
    }

    #[tokio::test]
    async fn time_denials_report_rounded_minutes() {
        let (_, engine) = fixture(KeyStatus::Active);
        let early = engine.verify(&payload("31", "key-1"), T - 60).await;
        assert_eq!(early.reason, ReasonCode::NotYetValid);
        assert_eq!(early.detail, "Key not valid yet. Starts in 1 minute");
        assert_eq!(early.stage, VerificationStage::RevocationChecked);

        let late = engine.verify(&payload("31", "key-1"), T + 3700).await;
        assert_eq!(late.reason, ReasonCode::Expired);
        assert_eq!(late.detail, "Key expired 1 minute ago");
        assert_eq!(late.seconds, Some(100));
    }

    #[tokio::test]
    async fn each_failure_has_its_reason() {
        let (ledger, engine) = fixture(KeyStatus::Revoked);
        let cases = [
            ("not json", ReasonCode::MalformedCredential, VerificationStage::Received),
            (
                r#"{"appId":"31","keyId":"key-1"}"#,
                ReasonCode::MalformedCredential,
                VerificationStage::Received,
            ),
            (&payload("32", "key-1")[..], ReasonCode::WrongApplication, VerificationStage::Parsed),
            (&payload("31", "missing")[..], ReasonCode::RecordNotFound, VerificationStage::Parsed),
            (&payload("31", "key-1")[..], ReasonCode::Revoked, VerificationStage::Authenticated),
        ];
        for (text, reason, stage) in cases {
            let outcome = engine.verify(text, T + 10).await;
            assert_eq!(outcome.decision, Decision::Denied, "{}", text);
            assert_eq!(outcome.reason, reason, "{}", text);
            assert_eq!(outcome.stage, stage, "{}", text);
            assert!(!outcome.retryable);
        }

        ledger.fail_reads(true);
        let outcome = engine.verify(&payload("31", "key-1"), T + 10).await;
        assert_eq!(outcome.reason, ReasonCode::TransientLedgerError);
        assert!(outcome.retryable);
    }

    #[tokio::test]
    async fn skew_tolerance_widens_the_window() {
        let ledger = Arc::new(MemoryLedger::new(T));
        ledger.deploy_application(APP, Address::from_bytes([1u8; 32]));
        let record = ObjectRecord {
            recipient: Address::from_bytes([2u8; 32]),
            valid_from: T,
            valid_until: T + 3600,
            status: KeyStatus::Active,
        };
        ledger.put_object(APP, b"key-1", record.encode().to_vec());
        let engine = VerificationEngine::new(
            ledger,
            AppId::new("31"),
            LedgerStrategy::ObjectStore { application_id: APP },
            EngineOptions {
                clock_skew_tolerance: 30,
                ..EngineOptions::default()
            },
        );
        assert!(engine.verify(&payload("31", "key-1"), T - 30).await.is_granted());
        assert!(engine.verify(&payload("31", "key-1"), T + 3630).await.is_granted());
        assert!(!engine.verify(&payload("31", "key-1"), T + 3631).await.is_granted());
    }

    #[test]
    fn minutes_round_towards_the_boundary() {
        assert_eq!(ceil_minutes(1), 1);
        assert_eq!(ceil_minutes(60), 1);
        assert_eq!(ceil_minutes(61), 2);
    }
}
