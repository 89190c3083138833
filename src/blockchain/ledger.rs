// src/blockchain/ledger.rs
//! Ledger service seams.
//!
//! The access-control core treats the ledger as a trusted oracle. It only
//! needs three reads (record by id, key-value object by name, account
//! history) and two writes (submit, await confirmation). Backends implement
//! [`LedgerReader`] and [`LedgerWriter`]; the HTTP adapter and the
//! in-memory ledger are the two shipped implementations.

use crate::error::LedgerError;
use crate::utils::address::{base32_encode, Address};
use crate::utils::crypto::hash_data;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Domain separator prefixed to transaction bytes before hashing/signing.
const TX_DOMAIN: &[u8] = b"TX";

/// A confirmed transaction as seen by the core.
///
/// `note` is always the canonical byte sequence; adapters decode any
/// transport encoding before constructing this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub id: String,
    pub sender: Address,
    pub receiver: Option<Address>,
    pub note: Vec<u8>,
    /// Block timestamp, epoch seconds.
    pub round_time: u64,
    pub confirmed_round: Option<u64>,
}

/// Narrowing of an account-history search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionFilter {
    /// Only transactions the address sent, not ones it received.
    pub sent_only: bool,
}

impl TransactionFilter {
    pub fn sent_by() -> Self {
        Self { sent_only: true }
    }

    pub fn matches(&self, address: &Address, tx: &LedgerTransaction) -> bool {
        tx.sender == *address || (!self.sent_only && tx.receiver == Some(*address))
    }
}

/// Proof that a submitted transaction made it into a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub id: String,
    pub confirmed_round: u64,
}

/// What a transaction does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionKind {
    /// Value transfer; zero-value self-transfers carry annotations.
    Payment {
        receiver: Address,
        amount: u64,
        note: Vec<u8>,
    },
    /// Call into a deployed application (the guest-key contract).
    AppCall {
        application_id: u64,
        method: String,
        args: Vec<Vec<u8>>,
        boxes: Vec<Vec<u8>>,
    },
}

/// A transaction awaiting a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub sender: Address,
    /// Distinguishes otherwise identical transactions.
    pub nonce: u64,
    #[serde(flatten)]
    pub kind: TransactionKind,
}

impl UnsignedTransaction {
    /// Bytes covered by the signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = TX_DOMAIN.to_vec();
        bytes.extend(serde_json::to_vec(self)?);
        Ok(bytes)
    }

    /// Ledger identifier of this transaction.
    pub fn id(&self) -> Result<String, serde_json::Error> {
        Ok(base32_encode(&hash_data(&self.signing_bytes()?)))
    }
}

/// A transaction with the sender's signature attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: UnsignedTransaction,
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    /// Wire form submitted to the ledger.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Read access to the ledger.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Looks up a confirmed transaction by id.
    async fn lookup_transaction(&self, id: &str) -> Result<Option<LedgerTransaction>, LedgerError>;

    /// Reads a key-value object ("box") of an application by name.
    async fn lookup_object(
        &self,
        application_id: u64,
        name: &[u8],
    ) -> Result<Option<Vec<u8>>, LedgerError>;

    /// Lists transactions sent or received by `address`, newest first.
    async fn search_by_address(
        &self,
        address: &Address,
        filter: TransactionFilter,
        limit: usize,
    ) -> Result<Vec<LedgerTransaction>, LedgerError>;
}

/// Write access to the ledger.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Submits a signed transaction, returning its id.
    async fn submit(&self, signed: &SignedTransaction) -> Result<String, LedgerError>;

    /// Waits for a submitted transaction to be confirmed.
    async fn await_confirmation(
        &self,
        id: &str,
        max_rounds: u64,
    ) -> Result<Confirmation, LedgerError>;
}
