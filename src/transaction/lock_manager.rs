use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::transaction::{
    AbortReason, IsolationLevel, Transaction, TransactionState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
    // Kept so a waiting requester can wound this transaction directly.
    txn: Arc<Transaction>,
}

struct LockRequestQueue {
    queue: VecDeque<LockRequest>,
    upgrading: Option<TxnId>,
    cv: Arc<Condvar>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            upgrading: None,
            cv: Arc::new(Condvar::new()),
        }
    }
}

/// Row-level shared/exclusive lock manager enforcing two-phase locking,
/// with wound-wait deadlock prevention.
///
/// Requests form a FIFO queue per rid. A requester that would have to
/// wait first wounds every younger conflicting request (sets its
/// transaction to aborted and broadcasts so the victim can observe it),
/// then waits iff an older conflicting request remains. Wait-for edges
/// therefore only ever point from younger to older transactions and no
/// cycle can form.
///
/// Lock calls return false once the transaction is aborted; the aborted
/// transaction's queue entries are cleaned up when its locks are released
/// on its behalf (the transaction manager's abort path).
pub struct LockManager {
    latch: Mutex<HashMap<Rid, LockRequestQueue>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            latch: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a shared lock on a rid, blocking until grantable.
    ///
    /// Read-uncommitted transactions never take shared locks; asking for
    /// one is an error that aborts the transaction.
    pub fn lock_shared(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.abort_with(AbortReason::LockSharedOnReadUncommitted);
            return false;
        }
        if txn.state() != TransactionState::Growing {
            txn.abort_with(AbortReason::LockOnShrinking);
            return false;
        }
        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return true;
        }

        let mut table = self.latch.lock();
        table
            .entry(rid)
            .or_insert_with(LockRequestQueue::new)
            .queue
            .push_back(LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Shared,
                granted: false,
                txn: txn.clone(),
            });
        txn.shared_lock_insert(rid);

        loop {
            let queue = table.get_mut(&rid).expect("queue exists while request pending");
            if !Self::need_wait(txn.id(), LockMode::Shared, queue) {
                break;
            }
            let cv = queue.cv.clone();
            debug!("txn {} waits for S lock on {:?}", txn.id(), rid);
            cv.wait(&mut table);
            if txn.state() == TransactionState::Aborted {
                return false;
            }
        }

        Self::mark_granted(table.get_mut(&rid).expect("queue exists"), txn.id(), None);
        debug!("txn {} granted S lock on {:?}", txn.id(), rid);
        true
    }

    /// Acquire an exclusive lock on a rid, blocking until grantable
    pub fn lock_exclusive(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        if txn.state() != TransactionState::Growing {
            txn.abort_with(AbortReason::LockOnShrinking);
            return false;
        }
        if txn.is_exclusive_locked(rid) {
            return true;
        }

        let mut table = self.latch.lock();
        table
            .entry(rid)
            .or_insert_with(LockRequestQueue::new)
            .queue
            .push_back(LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Exclusive,
                granted: false,
                txn: txn.clone(),
            });
        txn.exclusive_lock_insert(rid);

        loop {
            let queue = table.get_mut(&rid).expect("queue exists while request pending");
            if !Self::need_wait(txn.id(), LockMode::Exclusive, queue) {
                break;
            }
            let cv = queue.cv.clone();
            debug!("txn {} waits for X lock on {:?}", txn.id(), rid);
            cv.wait(&mut table);
            if txn.state() == TransactionState::Aborted {
                return false;
            }
        }

        Self::mark_granted(table.get_mut(&rid).expect("queue exists"), txn.id(), None);
        debug!("txn {} granted X lock on {:?}", txn.id(), rid);
        true
    }

    /// Upgrade a held shared lock to exclusive.
    ///
    /// Only one transaction may be upgrading on a rid at a time; a second
    /// upgrader aborts with `UpgradeConflict`.
    pub fn lock_upgrade(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        if txn.state() != TransactionState::Growing {
            txn.abort_with(AbortReason::LockOnShrinking);
            return false;
        }
        if txn.is_exclusive_locked(rid) {
            return true;
        }
        if !txn.is_shared_locked(rid) {
            return false;
        }

        let mut table = self.latch.lock();
        let conflicting = {
            let queue = table.entry(rid).or_insert_with(LockRequestQueue::new);
            match queue.upgrading {
                Some(other) if other != txn.id() => true,
                _ => {
                    queue.upgrading = Some(txn.id());
                    false
                }
            }
        };
        if conflicting {
            drop(table);
            txn.abort_with(AbortReason::UpgradeConflict);
            return false;
        }

        loop {
            let queue = table.get_mut(&rid).expect("queue exists while upgrading");
            if !Self::need_wait_upgrade(txn.id(), queue) {
                break;
            }
            let cv = queue.cv.clone();
            debug!("txn {} waits to upgrade lock on {:?}", txn.id(), rid);
            cv.wait(&mut table);
            if txn.state() == TransactionState::Aborted {
                return false;
            }
        }

        let queue = table.get_mut(&rid).expect("queue exists");
        queue.upgrading = None;
        Self::mark_granted(queue, txn.id(), Some(LockMode::Exclusive));
        txn.shared_lock_remove(rid);
        txn.exclusive_lock_insert(rid);
        debug!("txn {} upgraded lock on {:?}", txn.id(), rid);
        true
    }

    /// Release this transaction's lock on a rid and wake the queue.
    ///
    /// Under repeatable read a release during the growing phase moves the
    /// transaction into shrinking; read committed may release shared locks
    /// without leaving the growing phase.
    pub fn unlock(&self, txn: &Arc<Transaction>, rid: Rid) -> bool {
        if !txn.is_shared_locked(rid) && !txn.is_exclusive_locked(rid) {
            return false;
        }

        let mut table = self.latch.lock();
        let found = match table.get_mut(&rid) {
            None => false,
            Some(queue) => {
                if queue.upgrading == Some(txn.id()) {
                    queue.upgrading = None;
                }
                match queue.queue.iter().position(|r| r.txn_id == txn.id()) {
                    None => false,
                    Some(pos) => {
                        queue.queue.remove(pos);
                        queue.cv.notify_all();
                        true
                    }
                }
            }
        };
        if let Some(queue) = table.get(&rid) {
            if queue.queue.is_empty() && queue.upgrading.is_none() {
                table.remove(&rid);
            }
        }
        drop(table);

        if !found {
            return false;
        }

        if txn.state() == TransactionState::Growing
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            txn.set_state(TransactionState::Shrinking);
        }
        txn.shared_lock_remove(rid);
        txn.exclusive_lock_remove(rid);
        debug!("txn {} released lock on {:?}", txn.id(), rid);
        true
    }

    /// Decide whether a queued request must keep waiting, wounding younger
    /// conflicting requests along the way.
    ///
    /// Scans the requests ahead of the caller's own entry: every younger
    /// conflicting transaction is aborted (and the queue broadcast so it
    /// can observe the wound); any older conflicting request means the
    /// caller waits. Requests of already-aborted transactions are treated
    /// as vacated.
    fn need_wait(my_id: TxnId, my_mode: LockMode, queue: &mut LockRequestQueue) -> bool {
        let mut need_wait = false;
        let mut wounded = false;
        let mut ahead = true;

        for request in queue.queue.iter() {
            if request.txn_id == my_id {
                ahead = false;
                continue;
            }
            // The conflict set is everything queued in front of us plus
            // anything already granted behind us.
            if !ahead && !request.granted {
                continue;
            }
            let conflict =
                my_mode == LockMode::Exclusive || request.mode == LockMode::Exclusive;
            if !conflict {
                continue;
            }
            if request.txn.state() == TransactionState::Aborted {
                continue;
            }
            if request.txn_id > my_id {
                debug!("txn {} wounds younger txn {}", my_id, request.txn_id);
                request.txn.abort_with(AbortReason::Deadlock);
                wounded = true;
            } else {
                need_wait = true;
            }
        }

        if wounded {
            queue.cv.notify_all();
        }
        need_wait
    }

    /// The upgrade variant: the caller wants exclusive access, so every
    /// younger request ahead of its own (skipped) shared entry is wounded;
    /// it waits iff an older request remains.
    fn need_wait_upgrade(my_id: TxnId, queue: &mut LockRequestQueue) -> bool {
        let mut need_wait = false;
        let mut wounded = false;
        let mut ahead = true;

        for request in queue.queue.iter() {
            if request.txn_id == my_id {
                ahead = false;
                continue;
            }
            if !ahead && !request.granted {
                continue;
            }
            if request.txn.state() == TransactionState::Aborted {
                continue;
            }
            if request.txn_id > my_id {
                debug!("txn {} wounds younger txn {} (upgrade)", my_id, request.txn_id);
                request.txn.abort_with(AbortReason::Deadlock);
                wounded = true;
            } else {
                need_wait = true;
            }
        }

        if wounded {
            queue.cv.notify_all();
        }
        need_wait
    }

    fn mark_granted(queue: &mut LockRequestQueue, txn_id: TxnId, new_mode: Option<LockMode>) {
        for request in queue.queue.iter_mut().filter(|r| r.txn_id == txn_id) {
            request.granted = true;
            if let Some(mode) = new_mode {
                request.mode = mode;
            }
        }
    }
}
