// src/services/credential_issuer.rs
//! Credential Issuer Service
//!
//! Owner-side writers for guest keys:
//! - Issuance: validates the request, writes the record and returns the key
//!   id plus the transport payload to hand to the guest
//! - Revocation: writes a revocation marker or flips the inline status
//! - Lock actions: records owner `lock` / `unlock` events
//!
//! All writes go through an [`OwnerSession`], which serialises them per
//! account and waits for confirmation.

use crate::blockchain::ledger::{LedgerWriter, TransactionKind};
use crate::error::IssuanceError;
use crate::models::annotation::{Annotation, KeyDetails, NoteAction};
use crate::models::credential::{AppId, CredentialRecord, KeyId, KeyStatus};
use crate::models::layout::{METHOD_CREATE_KEY, METHOD_REVOKE_KEY};
use crate::services::credential_codec::{self, CredentialMeta};
use crate::services::record_reader::LedgerStrategy;
use crate::utils::address::Address;
use crate::utils::crypto::hash_parts;
use crate::utils::serialization::{format_timestamp, TimeValue};
use crate::wallet::session::OwnerSession;
use log::info;
use serde::Serialize;
use std::sync::Arc;

/// Owner lock command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockCommand {
    Lock,
    Unlock,
}

/// Result of a successful issuance.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCredential {
    pub key_id: KeyId,
    /// Transaction that created the record.
    pub tx_id: String,
    pub record: CredentialRecord,
    /// Transport text for the QR code.
    pub payload: String,
}

/// Service for issuing and revoking guest keys of one application.
pub struct CredentialIssuer {
    /// Write half of the ledger
    ledger: Arc<dyn LedgerWriter>,

    /// Owner account used to sign every write
    session: Arc<OwnerSession>,

    /// Namespace tag written into annotations and payloads
    app_id: AppId,

    strategy: LedgerStrategy,
}

impl CredentialIssuer {
    /// Creates a new CredentialIssuer instance
    ///
    /// # Arguments
    /// * `ledger` - Ledger write path
    /// * `session` - Owner session holding the signer
    /// * `app_id` - Application namespace tag
    /// * `strategy` - Record layout used by this deployment
    pub fn new(
        ledger: Arc<dyn LedgerWriter>,
        session: Arc<OwnerSession>,
        app_id: AppId,
        strategy: LedgerStrategy,
    ) -> Self {
        Self {
            ledger,
            session,
            app_id,
            strategy,
        }
    }

    /// Address of the owner account.
    pub fn owner(&self) -> Address {
        self.session.address()
    }

    /// Issues a guest key.
    ///
    /// # Arguments
    /// * `name` - Display name for the guest
    /// * `recipient` - Textual address of the guest
    /// * `valid_from` / `valid_until` - Inclusive window, epoch seconds
    /// * `now` - Current time, epoch seconds
    ///
    /// # Errors
    /// - `InvalidRecipient` if `recipient` is not a well-formed address
    /// - `InvalidTimeRange` unless `now <= valid_from < valid_until`
    /// - `Signer` / `Ledger` if the write fails
    pub async fn issue_credential(
        &self,
        name: &str,
        recipient: &str,
        valid_from: u64,
        valid_until: u64,
        now: u64,
    ) -> Result<IssuedCredential, IssuanceError> {
        let recipient: Address = recipient
            .trim()
            .parse()
            .map_err(|source| IssuanceError::InvalidRecipient {
                address: recipient.to_string(),
                source,
            })?;
        if valid_until <= valid_from {
            return Err(IssuanceError::InvalidTimeRange(format!(
                "valid_until ({}) must be after valid_from ({})",
                format_timestamp(valid_until),
                format_timestamp(valid_from)
            )));
        }
        if valid_from < now {
            return Err(IssuanceError::InvalidTimeRange(format!(
                "valid_from ({}) is in the past",
                format_timestamp(valid_from)
            )));
        }

        let (key_id, tx_id) = match self.strategy {
            LedgerStrategy::TransactionNote => {
                let details = KeyDetails {
                    name: name.to_string(),
                    recipient: Some(recipient.to_string()),
                    valid_from: TimeValue::Text(format_timestamp(valid_from)),
                    valid_until: TimeValue::Text(format_timestamp(valid_until)),
                };
                let note = Annotation::new(self.app_id.clone(), NoteAction::CreateGuestKey, now)
                    .with_details(&details)?;
                let confirmation = self.session.annotate(self.ledger.as_ref(), &note).await?;
                // The creating transaction's id is the key id.
                (KeyId::new(confirmation.id.clone()), confirmation.id)
            }
            LedgerStrategy::ObjectStore { application_id } => {
                let key_id = derive_object_key_id(name, &recipient, now);
                let kind = TransactionKind::AppCall {
                    application_id,
                    method: METHOD_CREATE_KEY.to_string(),
                    args: vec![
                        key_id.as_bytes().to_vec(),
                        recipient.as_bytes().to_vec(),
                        valid_from.to_be_bytes().to_vec(),
                        valid_until.to_be_bytes().to_vec(),
                    ],
                    boxes: vec![key_id.as_bytes().to_vec()],
                };
                let confirmation = self
                    .session
                    .submit_and_confirm(self.ledger.as_ref(), kind)
                    .await?;
                (key_id, confirmation.id)
            }
        };

        let record = CredentialRecord {
            key_id: key_id.clone(),
            recipient,
            issuer: Some(self.owner()),
            valid_from,
            valid_until,
            status: KeyStatus::Active,
        };
        let payload = credential_codec::encode(
            &record,
            &CredentialMeta {
                app_id: self.app_id.clone(),
                key_name: name.to_string(),
                include_hints: true,
            },
        )?;
        info!("Issued guest key {} for {} ({})", key_id, recipient, name);
        Ok(IssuedCredential {
            key_id,
            tx_id,
            record,
            payload,
        })
    }

    /// Revokes a guest key, returning the revoking transaction id.
    ///
    /// Revoking an already revoked key writes another marker under the
    /// transaction-note strategy; verification is unaffected. Under the
    /// object-store strategy the application rejects unknown keys.
    pub async fn revoke_credential(
        &self,
        key_id: &KeyId,
        now: u64,
    ) -> Result<String, IssuanceError> {
        let confirmation = match self.strategy {
            LedgerStrategy::TransactionNote => {
                let note = Annotation::new(self.app_id.clone(), NoteAction::RevokeGuestKey, now)
                    .with_revokes(key_id.clone());
                self.session.annotate(self.ledger.as_ref(), &note).await?
            }
            LedgerStrategy::ObjectStore { application_id } => {
                let kind = TransactionKind::AppCall {
                    application_id,
                    method: METHOD_REVOKE_KEY.to_string(),
                    args: vec![key_id.as_bytes().to_vec()],
                    boxes: vec![key_id.as_bytes().to_vec()],
                };
                self.session.submit_and_confirm(self.ledger.as_ref(), kind).await?
            }
        };
        info!("Revoked guest key {} in {}", key_id, confirmation.id);
        Ok(confirmation.id)
    }

    /// Records an owner lock or unlock event.
    pub async fn record_lock_action(
        &self,
        command: LockCommand,
        now: u64,
    ) -> Result<String, IssuanceError> {
        let action = match command {
            LockCommand::Lock => NoteAction::Lock,
            LockCommand::Unlock => NoteAction::Unlock,
        };
        let note = Annotation::new(self.app_id.clone(), action, now);
        let confirmation = self.session.annotate(self.ledger.as_ref(), &note).await?;
        info!("Recorded {:?} in {}", command, confirmation.id);
        Ok(confirmation.id)
    }
}

/// Object name for a new key: hex of the first 16 bytes of the hash of
/// `name | recipient | issued_at`.
pub fn derive_object_key_id(name: &str, recipient: &Address, issued_at: u64) -> KeyId {
    let digest = hash_parts(&[name.as_bytes(), recipient.as_bytes(), &issued_at.to_be_bytes()]);
    KeyId::new(hex::encode(&digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::ledger::LedgerReader;
    use crate::blockchain::memory_ledger::MemoryLedger;
    use crate::wallet::key_management::LocalSigner;

    const NOW: u64 = 1_700_000_000;

    fn issuer(ledger: Arc<MemoryLedger>, strategy: LedgerStrategy) -> CredentialIssuer {
        let session = OwnerSession::new(Arc::new(LocalSigner::from_seed([4u8; 32]).unwrap()));
        if let LedgerStrategy::ObjectStore { application_id } = strategy {
            ledger.deploy_application(application_id, session.address());
        }
        CredentialIssuer::new(ledger, Arc::new(session), AppId::new("gate"), strategy)
    }

    fn guest() -> String {
        Address::from_bytes([6u8; 32]).to_string()
    }

    #[tokio::test]
    async fn validation_happens_before_signing() {
        let ledger = Arc::new(MemoryLedger::new(NOW));
        let issuer = issuer(ledger.clone(), LedgerStrategy::TransactionNote);

        let bad_address = issuer.issue_credential("A", "not-an-address", NOW, NOW + 60, NOW).await;
        assert!(matches!(bad_address, Err(IssuanceError::InvalidRecipient { .. })));
        let inverted = issuer.issue_credential("A", &guest(), NOW + 60, NOW + 60, NOW).await;
        assert!(matches!(inverted, Err(IssuanceError::InvalidTimeRange(_))));
        let past = issuer.issue_credential("A", &guest(), NOW - 1, NOW + 60, NOW).await;
        assert!(matches!(past, Err(IssuanceError::InvalidTimeRange(_))));

        assert_eq!(ledger.transaction_count(), 0);
    }

    #[tokio::test]
    async fn note_issuance_uses_the_transaction_id() {
        let ledger = Arc::new(MemoryLedger::new(NOW));
        let issuer = issuer(ledger.clone(), LedgerStrategy::TransactionNote);
        let issued = issuer
            .issue_credential("Cleaner", &guest(), NOW, NOW + 3600, NOW)
            .await
            .unwrap();

        assert_eq!(issued.key_id.as_str(), issued.tx_id);
        let tx = ledger.lookup_transaction(&issued.tx_id).await.unwrap().unwrap();
        let note = Annotation::decode(&tx.note).unwrap();
        assert_eq!(note.action, NoteAction::CreateGuestKey);
        assert_eq!(note.key_details().unwrap().recipient, Some(guest()));

        let credential = credential_codec::decode(&issued.payload).unwrap();
        assert_eq!(credential.key_id, issued.key_id);
        assert_eq!(credential.valid_until_hint, Some(NOW + 3600));
    }

    #[tokio::test]
    async fn object_issuance_and_revocation_go_through_the_application() {
        let ledger = Arc::new(MemoryLedger::new(NOW));
        let issuer = issuer(ledger.clone(), LedgerStrategy::ObjectStore { application_id: 5 });
        let issued = issuer
            .issue_credential("Cleaner", &guest(), NOW, NOW + 3600, NOW)
            .await
            .unwrap();
        assert_eq!(issued.key_id.as_str().len(), 32);
        assert!(ledger.lookup_object(5, issued.key_id.as_bytes()).await.unwrap().is_some());

        issuer.revoke_credential(&issued.key_id, NOW).await.unwrap();
        let unknown = issuer.revoke_credential(&KeyId::new("nope"), NOW).await;
        assert!(matches!(unknown, Err(IssuanceError::Ledger(_))));
    }

    #[tokio::test]
    async fn ledger_failures_propagate() {
        let ledger = Arc::new(MemoryLedger::new(NOW));
        let issuer = issuer(ledger.clone(), LedgerStrategy::TransactionNote);
        ledger.fail_writes(true);
        let result = issuer.record_lock_action(LockCommand::Lock, NOW).await;
        assert!(matches!(result, Err(IssuanceError::Ledger(e)) if e.is_transient()));
    }

    #[test]
    fn object_key_ids_depend_on_every_part() {
        let recipient = Address::from_bytes([6u8; 32]);
        let id = derive_object_key_id("Cleaner", &recipient, NOW);
        assert_eq!(id, derive_object_key_id("Cleaner", &recipient, NOW));
        assert_ne!(id, derive_object_key_id("Cleaner", &recipient, NOW + 1));
        assert_ne!(id, derive_object_key_id("Walker", &recipient, NOW));
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
