use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use log::debug;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::lock_manager::LockManager;
use crate::transaction::transaction::{IsolationLevel, Transaction, TransactionState};

/// Issues transaction ids and drives transactions to their terminal
/// state, releasing every held lock on the way out.
pub struct TransactionManager {
    lock_manager: Arc<LockManager>,
    next_txn_id: AtomicU32,
    txn_map: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            lock_manager,
            next_txn_id: AtomicU32::new(0),
            txn_map: Mutex::new(HashMap::new()),
        }
    }

    /// Start a transaction in the growing phase
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(id, isolation_level));
        self.txn_map.lock().insert(id, txn.clone());
        debug!("txn {} begins ({:?})", id, isolation_level);
        txn
    }

    pub fn get_transaction(&self, id: TxnId) -> Option<Arc<Transaction>> {
        self.txn_map.lock().get(&id).cloned()
    }

    pub fn commit(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Committed);
        self.release_locks(txn);
        self.txn_map.lock().remove(&txn.id());
        debug!("txn {} committed", txn.id());
    }

    /// Abort a transaction, whether self-inflicted or wounded.
    ///
    /// Releasing the locks also removes the transaction's queue entries,
    /// which is what lets waiters behind a wounded transaction proceed.
    pub fn abort(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Aborted);
        self.release_locks(txn);
        self.txn_map.lock().remove(&txn.id());
        debug!("txn {} aborted", txn.id());
    }

    fn release_locks(&self, txn: &Arc<Transaction>) {
        for rid in txn.locked_rids() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}
