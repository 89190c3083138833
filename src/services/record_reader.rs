// src/services/record_reader.rs
//! Ledger record reader.
//!
//! Resolves a key id to the authoritative [`CredentialRecord`] using the
//! ledger strategy chosen at configuration time. Every call goes to the
//! ledger; nothing is cached between verifications.

use crate::blockchain::ledger::LedgerReader;
use crate::error::RecordError;
use crate::models::annotation::{Annotation, NoteAction};
use crate::models::credential::{AppId, CredentialRecord, KeyId, KeyStatus};
use crate::models::layout::ObjectRecord;
use crate::utils::address::Address;
use log::debug;
use std::sync::Arc;

/// How guest-key records are laid out on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStrategy {
    /// Legacy: JSON annotation on a zero-value self-transfer. Revocations
    /// are separate annotations found by scanning the owner's history.
    TransactionNote,
    /// Fixed-layout 56-byte object per key inside an application, with the
    /// status field embedded.
    ObjectStore { application_id: u64 },
}

impl LedgerStrategy {
    /// Whether revocation is a field read rather than a history scan.
    pub fn has_inline_status(&self) -> bool {
        matches!(self, LedgerStrategy::ObjectStore { .. })
    }
}

/// Fetches and normalises ledger records for one application.
pub struct RecordReader {
    ledger: Arc<dyn LedgerReader>,
    strategy: LedgerStrategy,
    app_id: AppId,
    /// Required author of transaction-note records; without one no note
    /// authenticates.
    owner: Option<Address>,
}

impl RecordReader {
    pub fn new(ledger: Arc<dyn LedgerReader>, strategy: LedgerStrategy, app_id: AppId) -> Self {
        Self {
            ledger,
            strategy,
            app_id,
            owner: None,
        }
    }

    pub fn with_owner(mut self, owner: Option<Address>) -> Self {
        self.owner = owner;
        self
    }

    pub fn strategy(&self) -> LedgerStrategy {
        self.strategy
    }

    /// Resolves `key_id` to its ledger record.
    ///
    /// # Errors
    /// - `NotFound` if the ledger has nothing under `key_id`
    /// - `InvalidRecord` if what it has is not a well-formed guest-key record
    ///   of this application
    /// - `Ledger` if the ledger could not be read
    pub async fn fetch_record(&self, key_id: &KeyId) -> Result<CredentialRecord, RecordError> {
        let record = match self.strategy {
            LedgerStrategy::TransactionNote => self.fetch_from_note(key_id).await?,
            LedgerStrategy::ObjectStore { application_id } => {
                self.fetch_object(application_id, key_id).await?
            }
        };
        if !record.has_valid_window() {
            return Err(RecordError::InvalidRecord(format!(
                "window {}..{} is empty",
                record.valid_from, record.valid_until
            )));
        }
        debug!("Resolved record {} ({:?})", key_id, record.status);
        Ok(record)
    }

    async fn fetch_from_note(&self, key_id: &KeyId) -> Result<CredentialRecord, RecordError> {
        let tx = self
            .ledger
            .lookup_transaction(key_id.as_str())
            .await?
            .ok_or_else(|| RecordError::NotFound(key_id.clone()))?;
        if tx.id != key_id.as_str() {
            return Err(RecordError::InvalidRecord(format!(
                "lookup of {:?} returned transaction {}",
                key_id.as_str(),
                tx.id
            )));
        }

        let annotation = Annotation::decode(&tx.note)
            .ok_or_else(|| {
                RecordError::InvalidRecord(format!("transaction {} carries no annotation", tx.id))
            })?;
        if annotation.app_id != self.app_id {
            return Err(RecordError::InvalidRecord(format!(
                "annotation belongs to application {}",
                annotation.app_id
            )));
        }
        if annotation.action != NoteAction::CreateGuestKey {
            return Err(RecordError::InvalidRecord(format!(
                "annotation action {:?} is not a key creation",
                annotation.action
            )));
        }
        // Anyone can post a note; only the owner's count.
        let owner = self
            .owner
            .ok_or_else(|| {
                RecordError::InvalidRecord("no owner account to authenticate notes against".into())
            })?;
        if tx.sender != owner {
            return Err(RecordError::InvalidRecord(format!(
                "record authored by {}, not the owner",
                tx.sender
            )));
        }

        let details = annotation
            .key_details()
            .ok_or_else(|| RecordError::InvalidRecord("key details missing or mistyped".into()))?;
        let recipient: Address = match &details.recipient {
            Some(text) => text
                .parse()
                .map_err(|e| RecordError::InvalidRecord(format!("recipient: {}", e)))?,
            None => tx.sender,
        };
        let valid_from = details
            .valid_from
            .to_epoch()
            .ok_or_else(|| RecordError::InvalidRecord("validFrom is not a timestamp".into()))?;
        let valid_until = details
            .valid_until
            .to_epoch()
            .ok_or_else(|| RecordError::InvalidRecord("validUntil is not a timestamp".into()))?;

        Ok(CredentialRecord {
            key_id: KeyId::new(tx.id),
            recipient,
            issuer: Some(tx.sender),
            valid_from,
            valid_until,
            // Revocations live in separate annotations.
            status: KeyStatus::Active,
        })
    }

    async fn fetch_object(
        &self,
        application_id: u64,
        key_id: &KeyId,
    ) -> Result<CredentialRecord, RecordError> {
        let bytes = self
            .ledger
            .lookup_object(application_id, key_id.as_bytes())
            .await?
            .ok_or_else(|| RecordError::NotFound(key_id.clone()))?;
        let object = ObjectRecord::decode(&bytes).map_err(RecordError::InvalidRecord)?;
        Ok(CredentialRecord {
            key_id: key_id.clone(),
            recipient: object.recipient,
            issuer: None,
            valid_from: object.valid_from,
            valid_until: object.valid_until,
            status: object.status,
        })
    }
}
