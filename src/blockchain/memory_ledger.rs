// src/blockchain/memory_ledger.rs
//! In-process ledger.
//!
//! Implements both ledger traits over a mutex-guarded state with a settable
//! clock. Submitted transactions are signature-checked and application
//! calls run the guest-key contract rules, so owner-side and verifier-side
//! code can be exercised end to end without a network. Used by the sandbox
//! mode of the binary and by tests.

use crate::blockchain::ledger::{
    Confirmation, LedgerReader, LedgerTransaction, LedgerWriter, SignedTransaction,
    TransactionFilter, TransactionKind,
};
use crate::error::LedgerError;
use crate::models::credential::KeyStatus;
use crate::models::layout::{ObjectRecord, METHOD_CREATE_KEY, METHOD_REVOKE_KEY};
use crate::utils::address::Address;
use crate::wallet::key_management::verify_signature;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

struct Application {
    creator: Address,
    objects: HashMap<Vec<u8>, Vec<u8>>,
}

#[derive(Default)]
struct State {
    now: u64,
    round: u64,
    transactions: Vec<LedgerTransaction>,
    by_id: HashMap<String, usize>,
    applications: HashMap<u64, Application>,
    fail_reads: bool,
    fail_searches: bool,
    fail_writes: bool,
}

/// In-memory ledger with guest-key application semantics.
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    /// Creates an empty ledger whose clock reads `now` (epoch seconds).
    pub fn new(now: u64) -> Self {
        Self {
            state: Mutex::new(State {
                now,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, LedgerError> {
        self.state
            .lock()
            .map_err(|e| LedgerError::Transport(format!("ledger state poisoned: {}", e)))
    }

    /// Sets the ledger clock.
    pub fn set_time(&self, now: u64) {
        if let Ok(mut state) = self.lock() {
            state.now = now;
        }
    }

    pub fn now(&self) -> u64 {
        self.lock().map(|s| s.now).unwrap_or(0)
    }

    /// Registers an application owned by `creator`.
    pub fn deploy_application(&self, application_id: u64, creator: Address) {
        if let Ok(mut state) = self.lock() {
            state.applications.insert(
                application_id,
                Application {
                    creator,
                    objects: HashMap::new(),
                },
            );
        }
    }

    /// Writes raw object bytes, bypassing the application rules.
    pub fn put_object(&self, application_id: u64, name: &[u8], value: Vec<u8>) {
        if let Ok(mut state) = self.lock() {
            if let Some(app) = state.applications.get_mut(&application_id) {
                app.objects.insert(name.to_vec(), value);
            }
        }
    }

    /// Appends an already-confirmed transaction, bypassing signature checks.
    pub fn insert_transaction(&self, transaction: LedgerTransaction) {
        if let Ok(mut state) = self.lock() {
            let index = state.transactions.len();
            state.by_id.insert(transaction.id.clone(), index);
            state.transactions.push(transaction);
        }
    }

    /// Makes record and object lookups fail with a timeout.
    pub fn fail_reads(&self, fail: bool) {
        if let Ok(mut state) = self.lock() {
            state.fail_reads = fail;
        }
    }

    /// Makes account-history searches fail with a transport error.
    pub fn fail_searches(&self, fail: bool) {
        if let Ok(mut state) = self.lock() {
            state.fail_searches = fail;
        }
    }

    /// Makes submissions fail with a transport error.
    pub fn fail_writes(&self, fail: bool) {
        if let Ok(mut state) = self.lock() {
            state.fail_writes = fail;
        }
    }

    pub fn transaction_count(&self) -> usize {
        self.lock().map(|s| s.transactions.len()).unwrap_or(0)
    }
}

impl State {
    fn call_application(
        &mut self,
        sender: Address,
        application_id: u64,
        method: &str,
        args: &[Vec<u8>],
    ) -> Result<(), LedgerError> {
        let now = self.now;
        let app = self
            .applications
            .get_mut(&application_id)
            .ok_or_else(|| {
                LedgerError::Rejected(format!("application {} does not exist", application_id))
            })?;
        if sender != app.creator {
            return Err(LedgerError::Rejected(
                "only the application creator may call this method".into(),
            ));
        }
        match (method, args) {
            (METHOD_CREATE_KEY, [key_id, recipient, valid_from, valid_until]) => {
                if app.objects.contains_key(key_id) {
                    return Err(LedgerError::Rejected("key already exists".into()));
                }
                let recipient: [u8; 32] = recipient
                    .as_slice()
                    .try_into()
                    .map_err(|_| LedgerError::Rejected("recipient must be 32 bytes".into()))?;
                let valid_from = be_u64(valid_from)?;
                let valid_until = be_u64(valid_until)?;
                if valid_from >= valid_until {
                    return Err(LedgerError::Rejected("valid_from must precede valid_until".into()));
                }
                if valid_until <= now {
                    return Err(LedgerError::Rejected("cannot create an expired key".into()));
                }
                let record = ObjectRecord {
                    recipient: Address::from_bytes(recipient),
                    valid_from,
                    valid_until,
                    status: KeyStatus::Active,
                };
                app.objects.insert(key_id.clone(), record.encode().to_vec());
                Ok(())
            }
            (METHOD_REVOKE_KEY, [key_id]) => {
                let object = app
                    .objects
                    .get_mut(key_id)
                    .ok_or_else(|| LedgerError::Rejected("key does not exist".into()))?;
                ObjectRecord::mark_revoked(object).map_err(LedgerError::Rejected)
            }
            _ => Err(LedgerError::Rejected(format!(
                "unknown method {} with {} args",
                method,
                args.len()
            ))),
        }
    }
}

fn be_u64(bytes: &[u8]) -> Result<u64, LedgerError> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| LedgerError::Rejected("expected an 8-byte integer".into()))?;
    Ok(u64::from_be_bytes(array))
}

#[async_trait]
impl LedgerReader for MemoryLedger {
    async fn lookup_transaction(&self, id: &str) -> Result<Option<LedgerTransaction>, LedgerError> {
        let state = self.lock()?;
        if state.fail_reads {
            return Err(LedgerError::Timeout);
        }
        Ok(state.by_id.get(id).map(|&i| state.transactions[i].clone()))
    }

    async fn lookup_object(
        &self,
        application_id: u64,
        name: &[u8],
    ) -> Result<Option<Vec<u8>>, LedgerError> {
        let state = self.lock()?;
        if state.fail_reads {
            return Err(LedgerError::Timeout);
        }
        Ok(state
            .applications
            .get(&application_id)
            .and_then(|app| app.objects.get(name).cloned()))
    }

    async fn search_by_address(
        &self,
        address: &Address,
        filter: TransactionFilter,
        limit: usize,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let state = self.lock()?;
        if state.fail_searches {
            return Err(LedgerError::Transport("indexer unreachable".into()));
        }
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|tx| filter.matches(address, tx))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LedgerWriter for MemoryLedger {
    async fn submit(&self, signed: &SignedTransaction) -> Result<String, LedgerError> {
        let mut state = self.lock()?;
        if state.fail_writes {
            return Err(LedgerError::Transport("algod unreachable".into()));
        }
        if !verify_signature(signed) {
            return Err(LedgerError::Rejected("invalid signature".into()));
        }
        let tx = &signed.transaction;
        let id = tx.id().map_err(|e| LedgerError::Rejected(e.to_string()))?;
        if state.by_id.contains_key(&id) {
            return Err(LedgerError::Rejected(format!("transaction {} already in ledger", id)));
        }

        let (receiver, note) = match &tx.kind {
            TransactionKind::Payment { receiver, note, .. } => (Some(*receiver), note.clone()),
            TransactionKind::AppCall {
                application_id,
                method,
                args,
                ..
            } => {
                state.call_application(tx.sender, *application_id, method, args)?;
                (None, Vec::new())
            }
        };

        state.round += 1;
        let confirmed = LedgerTransaction {
            id: id.clone(),
            sender: tx.sender,
            receiver,
            note,
            round_time: state.now,
            confirmed_round: Some(state.round),
        };
        let index = state.transactions.len();
        state.by_id.insert(id.clone(), index);
        state.transactions.push(confirmed);
        Ok(id)
    }

    async fn await_confirmation(
        &self,
        id: &str,
        max_rounds: u64,
    ) -> Result<Confirmation, LedgerError> {
        let state = self.lock()?;
        state
            .by_id
            .get(id)
            .and_then(|&i| state.transactions[i].confirmed_round)
            .map(|round| Confirmation {
                id: id.to_string(),
                confirmed_round: round,
            })
            .ok_or_else(|| LedgerError::ConfirmationTimeout {
                id: id.to_string(),
                rounds: max_rounds,
            })
    }
}
