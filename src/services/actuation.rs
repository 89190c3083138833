// src/services/actuation.rs
//! Actuation notifier.
//!
//! Turns verification outcomes into a lock signal and an audit entry. A
//! grant releases the lock and schedules re-engagement; every outcome is
//! recorded in a bounded in-memory trail and, when a device session is
//! configured, optionally published to the ledger as a `guest_access` /
//! `guest_access_denied` annotation.

use crate::blockchain::ledger::LedgerWriter;
use crate::models::annotation::{AccessDetails, Annotation, NoteAction};
use crate::models::credential::{AppId, KeyId};
use crate::models::outcome::{Decision, ReasonCode, VerificationOutcome};
use crate::utils::serialization::format_timestamp;
use crate::wallet::session::OwnerSession;
use log::{error, info};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_LOCK_PIN: u8 = 4;
pub const DEFAULT_UNLOCK_DURATION: Duration = Duration::from_secs(10);
pub const DEFAULT_AUDIT_CAPACITY: usize = 100;

/// A two-state lock signal.
pub trait LockActuator: Send + Sync {
    /// Drives the lock closed.
    fn engage(&self);
    /// Drives the lock open.
    fn release(&self);
    fn is_locked(&self) -> bool;
}

/// Actuator that only logs the signal it would drive on `pin`.
pub struct SimulatedLock {
    pin: u8,
    locked: AtomicBool,
}

impl SimulatedLock {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            locked: AtomicBool::new(true),
        }
    }
}

impl LockActuator for SimulatedLock {
    fn engage(&self) {
        self.locked.store(true, Ordering::SeqCst);
        info!("GPIO {} -> LOW (locked)", self.pin);
    }

    fn release(&self) {
        self.locked.store(false, Ordering::SeqCst);
        info!("GPIO {} -> HIGH (unlocked)", self.pin);
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

/// One recorded verification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub at: u64,
    pub timestamp: String,
    pub decision: Decision,
    pub reason: ReasonCode,
    pub key_id: Option<KeyId>,
    pub key_name: Option<String>,
    pub detail: String,
}

/// Bounded audit log, newest first.
pub struct AuditTrail {
    capacity: usize,
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl AuditTrail {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, entry: AuditEntry) {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.push_front(entry);
                entries.truncate(self.capacity);
            }
            Err(e) => error!("Audit trail unavailable: {}", e),
        }
    }

    /// Up to `limit` most recent entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ledger publication of access events from the device account.
pub struct AccessPublisher {
    pub session: Arc<OwnerSession>,
    pub ledger: Arc<dyn LedgerWriter>,
    pub app_id: AppId,
}

pub struct ActuationNotifier {
    actuator: Arc<dyn LockActuator>,
    audit: Arc<AuditTrail>,
    unlock_duration: Duration,
    publisher: Option<Arc<AccessPublisher>>,
    /// Bumped on every release so only the latest relock timer fires.
    releases: Arc<AtomicU64>,
}

impl ActuationNotifier {
    pub fn new(
        actuator: Arc<dyn LockActuator>,
        audit: Arc<AuditTrail>,
        unlock_duration: Duration,
    ) -> Self {
        Self {
            actuator,
            audit,
            unlock_duration,
            publisher: None,
            releases: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_publisher(mut self, publisher: AccessPublisher) -> Self {
        self.publisher = Some(Arc::new(publisher));
        self
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn is_locked(&self) -> bool {
        self.actuator.is_locked()
    }

    /// Acts on a verification outcome observed at `now`.
    ///
    /// Must be called from within a tokio runtime. Returns the handle of
    /// the ledger publication task, if one was started; its failure is
    /// logged and does not affect the decision already taken.
    pub fn handle(&self, outcome: &VerificationOutcome, now: u64) -> Option<JoinHandle<()>> {
        if outcome.is_granted() {
            self.release_temporarily();
        }

        self.audit.record(AuditEntry {
            at: now,
            timestamp: format_timestamp(now),
            decision: outcome.decision,
            reason: outcome.reason,
            key_id: outcome.key_id.clone(),
            key_name: outcome.key_name.clone(),
            detail: outcome.detail.clone(),
        });

        let publisher = self.publisher.clone()?;
        let action = if outcome.is_granted() {
            NoteAction::GuestAccess
        } else {
            NoteAction::GuestAccessDenied
        };
        let details = AccessDetails {
            key_id: outcome.key_id.clone(),
            key_name: outcome.key_name.clone(),
            reason: outcome.reason.to_string(),
        };
        Some(tokio::spawn(async move {
            let note = Annotation::new(publisher.app_id.clone(), action, now);
            let note = match note.with_details(&details) {
                Ok(note) => note,
                Err(e) => {
                    error!("Failed to encode access log entry: {}", e);
                    return;
                }
            };
            match publisher.session.annotate(publisher.ledger.as_ref(), &note).await {
                Ok(confirmation) => info!("Access log entry recorded in {}", confirmation.id),
                Err(e) => error!("Failed to publish access log entry: {}", e),
            }
        }))
    }

    fn release_temporarily(&self) {
        let generation = self.releases.fetch_add(1, Ordering::SeqCst) + 1;
        self.actuator.release();

        let actuator = self.actuator.clone();
        let releases = self.releases.clone();
        let duration = self.unlock_duration;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if releases.load(Ordering::SeqCst) == generation {
                actuator.engage();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::ledger::{LedgerReader, TransactionFilter};
    use crate::blockchain::memory_ledger::MemoryLedger;
    use crate::models::outcome::VerificationStage;
    use crate::wallet::key_management::LocalSigner;

    fn outcome(decision: Decision, reason: ReasonCode) -> VerificationOutcome {
        VerificationOutcome {
            decision,
            reason,
            detail: String::new(),
            stage: VerificationStage::TimeChecked,
            key_id: Some(KeyId::new("K1")),
            key_name: Some("Walker".into()),
            verified_recipient: None,
            seconds: None,
            retryable: false,
        }
    }

    fn notifier(lock: Arc<SimulatedLock>) -> ActuationNotifier {
        ActuationNotifier::new(lock, Arc::new(AuditTrail::new(2)), Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn grant_releases_then_relocks() {
        let lock = Arc::new(SimulatedLock::new(DEFAULT_LOCK_PIN));
        let notifier = notifier(lock.clone());

        let granted = outcome(Decision::Granted, ReasonCode::AccessGranted);
        assert!(notifier.handle(&granted, 0).is_none());
        assert!(!lock.is_locked());

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(!lock.is_locked());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(lock.is_locked());
    }

    #[tokio::test(start_paused = true)]
    async fn a_second_grant_extends_the_unlock() {
        let lock = Arc::new(SimulatedLock::new(DEFAULT_LOCK_PIN));
        let notifier = notifier(lock.clone());

        notifier.handle(&outcome(Decision::Granted, ReasonCode::AccessGranted), 0);
        tokio::time::sleep(Duration::from_secs(6)).await;
        notifier.handle(&outcome(Decision::Granted, ReasonCode::AccessGranted), 6);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!lock.is_locked());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(lock.is_locked());
    }

    #[tokio::test]
    async fn denials_keep_the_lock_engaged_and_audit_is_bounded() {
        let lock = Arc::new(SimulatedLock::new(DEFAULT_LOCK_PIN));
        let notifier = notifier(lock.clone());
        notifier.handle(&outcome(Decision::Denied, ReasonCode::Expired), 1);
        notifier.handle(&outcome(Decision::Denied, ReasonCode::Revoked), 2);
        notifier.handle(&outcome(Decision::Denied, ReasonCode::WrongApplication), 3);

        assert!(lock.is_locked());
        let entries = notifier.audit().recent(10);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].reason, ReasonCode::WrongApplication);
        assert_eq!(entries[1].reason, ReasonCode::Revoked);
    }

    #[tokio::test]
    async fn access_events_are_published_best_effort() {
        let ledger = Arc::new(MemoryLedger::new(100));
        let signer = LocalSigner::from_seed([8u8; 32]).unwrap();
        let session = Arc::new(OwnerSession::new(Arc::new(signer)));
        let device = session.address();
        let notifier = notifier(Arc::new(SimulatedLock::new(4))).with_publisher(AccessPublisher {
            session,
            ledger: ledger.clone(),
            app_id: AppId::new("gate"),
        });

        let task = notifier.handle(&outcome(Decision::Denied, ReasonCode::Revoked), 100).unwrap();
        task.await.unwrap();
        let history = ledger
            .search_by_address(&device, TransactionFilter::default(), 10)
            .await
            .unwrap();
        let note = Annotation::decode(&history[0].note).unwrap();
        assert_eq!(note.action, NoteAction::GuestAccessDenied);

        ledger.fail_writes(true);
        let task = notifier
            .handle(&outcome(Decision::Granted, ReasonCode::AccessGranted), 101)
            .unwrap();
        task.await.unwrap();
        assert_eq!(notifier.audit().len(), 2);
        assert_eq!(ledger.transaction_count(), 1);
    }
}
