use std::collections::HashSet;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{PageId, PageWriteGuard, Rid, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states plus the terminal outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Why a transaction was moved to the aborted state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    UpgradeConflict,
    Deadlock,
    LockSharedOnReadUncommitted,
}

/// An active transaction.
///
/// All fields use interior mutability so a transaction can be shared
/// between its own worker thread and the lock manager, which may abort it
/// from another thread under wound-wait.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: RwLock<TransactionState>,
    abort_reason: Mutex<Option<AbortReason>>,

    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,

    // Page write latches held by an in-flight index descent, root first.
    page_latches: Mutex<Vec<PageWriteGuard>>,
    deleted_pages: Mutex<Vec<PageId>>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: RwLock::new(TransactionState::Growing),
            abort_reason: Mutex::new(None),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            page_latches: Mutex::new(Vec::new()),
            deleted_pages: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    /// Move to the aborted state, keeping the first recorded reason
    pub fn abort_with(&self, reason: AbortReason) {
        *self.state.write() = TransactionState::Aborted;
        let mut slot = self.abort_reason.lock();
        if slot.is_none() {
            *slot = Some(reason);
        }
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        *self.abort_reason.lock()
    }

    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub fn shared_lock_insert(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub fn shared_lock_remove(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
    }

    pub fn exclusive_lock_insert(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub fn exclusive_lock_remove(&self, rid: Rid) {
        self.exclusive_lock_set.lock().remove(&rid);
    }

    /// Snapshot of every rid this transaction currently holds a lock on
    pub fn locked_rids(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self.shared_lock_set.lock().iter().copied().collect();
        rids.extend(self.exclusive_lock_set.lock().iter().copied());
        rids
    }

    /// Park an ancestor write latch during an index descent
    pub fn add_page_latch(&self, guard: PageWriteGuard) {
        self.page_latches.lock().push(guard);
    }

    /// Take back the most recently parked latch (the immediate parent)
    pub fn pop_page_latch(&self) -> Option<PageWriteGuard> {
        self.page_latches.lock().pop()
    }

    /// Drain every parked latch, root first
    pub fn drain_page_latches(&self) -> Vec<PageWriteGuard> {
        std::mem::take(&mut *self.page_latches.lock())
    }

    pub fn add_deleted_page(&self, page_id: PageId) {
        self.deleted_pages.lock().push(page_id);
    }

    pub fn take_deleted_pages(&self) -> Vec<PageId> {
        std::mem::take(&mut *self.deleted_pages.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_is_growing() {
        let txn = Transaction::new(1, IsolationLevel::RepeatableRead);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.abort_reason(), None);
    }

    #[test]
    fn test_abort_keeps_first_reason() {
        let txn = Transaction::new(2, IsolationLevel::ReadCommitted);
        txn.abort_with(AbortReason::Deadlock);
        txn.abort_with(AbortReason::UpgradeConflict);
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(txn.abort_reason(), Some(AbortReason::Deadlock));
    }

    #[test]
    fn test_lock_sets() {
        let txn = Transaction::new(3, IsolationLevel::RepeatableRead);
        let rid = Rid::new(1, 4);
        txn.shared_lock_insert(rid);
        assert!(txn.is_shared_locked(rid));
        assert!(!txn.is_exclusive_locked(rid));

        txn.shared_lock_remove(rid);
        txn.exclusive_lock_insert(rid);
        assert!(!txn.is_shared_locked(rid));
        assert_eq!(txn.locked_rids(), vec![rid]);
    }
}
