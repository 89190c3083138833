// src/services/revocation.rs
//! Revocation scanner for the transaction-note strategy.
//!
//! Revocation is a set-membership test: any owner-authored
//! `revoke_guest_key` annotation naming the key inside the scanned window
//! counts, regardless of its position in the history.

use crate::blockchain::ledger::{LedgerReader, TransactionFilter};
use crate::error::LedgerError;
use crate::models::annotation::{Annotation, NoteAction};
use crate::models::credential::{AppId, KeyId};
use crate::utils::address::Address;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default number of most recent transactions inspected per scan.
pub const DEFAULT_SCAN_LIMIT: usize = 1000;

/// What a failed history scan means for the key under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanFailurePolicy {
    /// The error propagates and verification is denied.
    #[default]
    FailClosed,
    /// The key is reported as not revoked. Legacy behaviour; a ledger
    /// outage can let a revoked key through.
    FailOpen,
}

pub struct RevocationScanner {
    ledger: Arc<dyn LedgerReader>,
    app_id: AppId,
    scan_limit: usize,
    policy: ScanFailurePolicy,
}

impl RevocationScanner {
    pub fn new(ledger: Arc<dyn LedgerReader>, app_id: AppId) -> Self {
        Self {
            ledger,
            app_id,
            scan_limit: DEFAULT_SCAN_LIMIT,
            policy: ScanFailurePolicy::default(),
        }
    }

    pub fn with_scan_limit(mut self, limit: usize) -> Self {
        self.scan_limit = limit.max(1);
        self
    }

    pub fn with_policy(mut self, policy: ScanFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ScanFailurePolicy {
        self.policy
    }

    /// Whether `owner` has revoked `key_id` within the scan window.
    ///
    /// # Errors
    /// Returns the ledger error under [`ScanFailurePolicy::FailClosed`];
    /// under `FailOpen` errors are logged and reported as not revoked.
    pub async fn is_revoked(&self, key_id: &KeyId, owner: &Address) -> Result<bool, LedgerError> {
        let history = match self
            .ledger
            .search_by_address(owner, TransactionFilter::sent_by(), self.scan_limit)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                return match self.policy {
                    ScanFailurePolicy::FailClosed => Err(e),
                    ScanFailurePolicy::FailOpen => {
                        warn!(
                            "Revocation scan for {} failed ({}); treating as not revoked",
                            key_id, e
                        );
                        Ok(false)
                    }
                };
            }
        };

        let revoked = history.iter().any(|tx| {
            tx.sender == *owner
                && Annotation::decode(&tx.note).map_or(false, |note| {
                    note.app_id == self.app_id
                        && note.action == NoteAction::RevokeGuestKey
                        && note.revokes.as_ref() == Some(key_id)
                })
        });
        debug!(
            "Scanned {} transactions of {} for {}: revoked={}",
            history.len(),
            owner,
            key_id,
            revoked
        );
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::ledger::LedgerTransaction;
    use crate::blockchain::memory_ledger::MemoryLedger;

    fn owner() -> Address {
        Address::from_bytes([1u8; 32])
    }

    fn push(ledger: &MemoryLedger, id: &str, sender: Address, annotation: Annotation) {
        ledger.insert_transaction(LedgerTransaction {
            id: id.into(),
            sender,
            receiver: Some(owner()),
            note: annotation.encode().unwrap(),
            round_time: 0,
            confirmed_round: Some(1),
        });
    }

    fn revoke(app: &str, key: &str) -> Annotation {
        Annotation::new(AppId::new(app), NoteAction::RevokeGuestKey, 0)
            .with_revokes(KeyId::new(key))
    }

    #[tokio::test]
    async fn matching_revocation_anywhere_in_window_counts() {
        let ledger = Arc::new(MemoryLedger::new(0));
        push(&ledger, "R1", owner(), revoke("gate", "K1"));
        for i in 0..5 {
            let lock = Annotation::new(AppId::new("gate"), NoteAction::Lock, 0);
            push(&ledger, &format!("L{}", i), owner(), lock);
        }
        let scanner = RevocationScanner::new(ledger, AppId::new("gate"));
        assert!(scanner.is_revoked(&KeyId::new("K1"), &owner()).await.unwrap());
        assert!(!scanner.is_revoked(&KeyId::new("K2"), &owner()).await.unwrap());
    }

    #[tokio::test]
    async fn foreign_app_and_third_party_revocations_are_ignored() {
        let ledger = Arc::new(MemoryLedger::new(0));
        push(&ledger, "R1", owner(), revoke("other", "K1"));
        push(&ledger, "R2", Address::from_bytes([9u8; 32]), revoke("gate", "K1"));
        let scanner = RevocationScanner::new(ledger, AppId::new("gate"));
        assert!(!scanner.is_revoked(&KeyId::new("K1"), &owner()).await.unwrap());
    }

    #[tokio::test]
    async fn revocations_beyond_the_limit_are_not_seen() {
        let ledger = Arc::new(MemoryLedger::new(0));
        push(&ledger, "R1", owner(), revoke("gate", "K1"));
        push(&ledger, "L1", owner(), Annotation::new(AppId::new("gate"), NoteAction::Unlock, 0));
        let scanner = RevocationScanner::new(ledger, AppId::new("gate")).with_scan_limit(1);
        assert!(!scanner.is_revoked(&KeyId::new("K1"), &owner()).await.unwrap());
    }

    #[tokio::test]
    async fn scan_failure_follows_policy() {
        let ledger = Arc::new(MemoryLedger::new(0));
        ledger.fail_searches(true);
        let closed = RevocationScanner::new(ledger.clone(), AppId::new("gate"));
        assert_eq!(closed.policy(), ScanFailurePolicy::FailClosed);
        assert!(closed.is_revoked(&KeyId::new("K1"), &owner()).await.is_err());

        let open =
            RevocationScanner::new(ledger, AppId::new("gate"))
                .with_policy(ScanFailurePolicy::FailOpen);
        assert_eq!(open.is_revoked(&KeyId::new("K1"), &owner()).await, Ok(false));
    }
}
