// src/services/lock_state.rs
//! Door state reconstruction from the actuation log.
//!
//! Unlike revocation, this is a last-write-wins reduction: the most recent
//! `lock` / `unlock` / `guest_lock` / `guest_unlock` annotation decides.

use crate::blockchain::ledger::{LedgerReader, LedgerTransaction, TransactionFilter};
use crate::error::LedgerError;
use crate::models::annotation::{Annotation, NoteAction};
use crate::models::credential::AppId;
use crate::utils::address::Address;
use crate::utils::serialization::format_timestamp;
use serde::Serialize;

/// Current door state as derived from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockState {
    pub locked: bool,
    pub action: NoteAction,
    /// Epoch seconds of the deciding event.
    pub changed_at: u64,
    pub changed_at_iso: String,
    pub tx_id: String,
}

/// Reduces the `limit` most recent transactions of `address` to the current
/// lock state; `None` if no actuation event is found.
///
/// Events are ordered by annotation timestamp, falling back to the ledger
/// round time; ties go to the event the ledger lists as newer.
pub async fn reconstruct_lock_state(
    ledger: &dyn LedgerReader,
    address: &Address,
    app_id: &AppId,
    limit: usize,
) -> Result<Option<LockState>, LedgerError> {
    let history = ledger
        .search_by_address(address, TransactionFilter::default(), limit)
        .await?;
    Ok(latest_lock_event(&history, address, app_id))
}

fn latest_lock_event(
    history: &[LedgerTransaction],
    address: &Address,
    app_id: &AppId,
) -> Option<LockState> {
    history
        .iter()
        .rev()
        .filter(|tx| tx.sender == *address)
        .filter_map(|tx| {
            let note = Annotation::decode(&tx.note)?;
            if note.app_id != *app_id {
                return None;
            }
            let locked = note.action.lock_effect()?;
            let at = note.timestamp_epoch().unwrap_or(tx.round_time);
            Some(LockState {
                locked,
                action: note.action,
                changed_at: at,
                changed_at_iso: format_timestamp(at),
                tx_id: tx.id.clone(),
            })
        })
        // max_by_key keeps the last maximum, i.e. the newest on ties.
        .max_by_key(|state| state.changed_at)
}
