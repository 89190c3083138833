// src/wallet/session.rs
//! Owner session context.
//!
//! Holds the signer and write policy for one account and is passed
//! explicitly into owner-side operations. An account can only have one
//! unconfirmed write in flight, so writes through a session are serialised:
//! each waits for the previous one to confirm.

use crate::blockchain::ledger::{Confirmation, LedgerWriter, TransactionKind, UnsignedTransaction};
use crate::error::{IssuanceError, SignerError};
use crate::models::annotation::Annotation;
use crate::utils::address::Address;
use crate::wallet::key_management::{LocalSigner, Signer};
use log::{debug, info};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default number of rounds to wait for a write to confirm.
pub const DEFAULT_CONFIRMATION_ROUNDS: u64 = 10;

/// Signing context for one owner (or device) account.
pub struct OwnerSession {
    signer: Arc<dyn Signer>,
    confirmation_rounds: u64,
    nonce: AtomicU64,
    write_lock: Mutex<()>,
}

impl OwnerSession {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self {
            signer,
            confirmation_rounds: DEFAULT_CONFIRMATION_ROUNDS,
            nonce: AtomicU64::new(initial_nonce()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_confirmation_rounds(mut self, rounds: u64) -> Self {
        self.confirmation_rounds = rounds.max(1);
        self
    }

    /// Loads the persisted seed at `path`, creating and persisting a new
    /// one on first use.
    ///
    /// # Errors
    /// Returns `SignerError` if the file exists but does not hold a valid
    /// seed, or if a new seed cannot be written.
    pub fn load_or_create(path: &Path) -> Result<Self, SignerError> {
        let signer = if path.exists() {
            let seed_hex = std::fs::read_to_string(path)
                .map_err(|e| SignerError::Unavailable(format!("{}: {}", path.display(), e)))?;
            let signer = LocalSigner::from_seed_hex(&seed_hex)?;
            info!("Loaded owner session for {}", signer.address());
            signer
        } else {
            let signer = LocalSigner::generate()?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SignerError::Unavailable(format!("{}: {}", parent.display(), e)))?;
            }
            std::fs::write(path, signer.seed_hex())
                .map_err(|e| SignerError::Unavailable(format!("{}: {}", path.display(), e)))?;
            info!("Created owner session {} at {}", signer.address(), path.display());
            signer
        };
        Ok(Self::new(Arc::new(signer)))
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Builds an unsigned transaction from this account with a fresh nonce.
    pub fn transaction(&self, kind: TransactionKind) -> UnsignedTransaction {
        UnsignedTransaction {
            sender: self.address(),
            nonce: self.nonce.fetch_add(1, Ordering::Relaxed),
            kind,
        }
    }

    /// Signs, submits and waits for confirmation of `kind`.
    ///
    /// Holds the session's write lock for the whole round trip.
    pub async fn submit_and_confirm(
        &self,
        ledger: &dyn LedgerWriter,
        kind: TransactionKind,
    ) -> Result<Confirmation, IssuanceError> {
        let _guard = self.write_lock.lock().await;
        let transaction = self.transaction(kind);
        let signed = self.signer.sign(&transaction).await?;
        let id = ledger.submit(&signed).await?;
        debug!("Submitted {} from {}, awaiting confirmation", id, self.address());
        let confirmation = ledger.await_confirmation(&id, self.confirmation_rounds).await?;
        debug!("{} confirmed in round {}", id, confirmation.confirmed_round);
        Ok(confirmation)
    }

    /// Records `annotation` as the note of a zero-value self-transfer.
    pub async fn annotate(
        &self,
        ledger: &dyn LedgerWriter,
        annotation: &Annotation,
    ) -> Result<Confirmation, IssuanceError> {
        let kind = TransactionKind::Payment {
            receiver: self.address(),
            amount: 0,
            note: annotation.encode()?,
        };
        self.submit_and_confirm(ledger, kind).await
    }
}

fn initial_nonce() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("gatekey-{}-{}", name, std::process::id()))
    }

    #[test]
    fn load_or_create_persists_the_seed() {
        let path = temp_path("session-seed");
        let _ = std::fs::remove_file(&path);

        let created = OwnerSession::load_or_create(&path).unwrap();
        let loaded = OwnerSession::load_or_create(&path).unwrap();
        assert_eq!(created.address(), loaded.address());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn corrupt_seed_files_are_rejected() {
        let path = temp_path("corrupt-seed");
        std::fs::write(&path, "not hex").unwrap();
        assert!(OwnerSession::load_or_create(&path).is_err());
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn annotations_are_self_transfers() {
        use crate::blockchain::ledger::LedgerReader;
        use crate::blockchain::memory_ledger::MemoryLedger;
        use crate::models::annotation::NoteAction;
        use crate::models::credential::AppId;

        let ledger = MemoryLedger::new(50);
        let session = OwnerSession::new(Arc::new(LocalSigner::from_seed([3u8; 32]).unwrap()));
        let note = Annotation::new(AppId::new("gate"), NoteAction::Lock, 50);
        let confirmation = session.annotate(&ledger, &note).await.unwrap();

        let tx = ledger.lookup_transaction(&confirmation.id).await.unwrap().unwrap();
        assert_eq!(tx.sender, session.address());
        assert_eq!(tx.receiver, Some(session.address()));
        assert_eq!(Annotation::decode(&tx.note), Some(note));
    }

    #[test]
    fn nonces_are_unique_per_session() {
        let session = OwnerSession::new(Arc::new(LocalSigner::from_seed([1u8; 32]).unwrap()));
        let kind = TransactionKind::Payment {
            receiver: session.address(),
            amount: 0,
            note: Vec::new(),
        };
        let a = session.transaction(kind.clone());
        let b = session.transaction(kind);
        assert_ne!(a.nonce, b.nonce);
    }
}
