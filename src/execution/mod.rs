use std::sync::Arc;
use thiserror::Error;

use crate::common::types::{Rid, TxnId};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::transaction::{IsolationLevel, LockManager, Transaction, TransactionManager};

/// Opaque row payload handed between operators
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tuple(pub Vec<u8>);

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("transaction {0} aborted")]
    TransactionAborted(TxnId),

    #[error("buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
}

/// Pull-mode operator interface: `init` prepares the operator, `next`
/// yields one row at a time until `None`.
pub trait Executor {
    fn init(&mut self) -> Result<(), ExecutionError>;
    fn next(&mut self) -> Result<Option<(Tuple, Rid)>, ExecutionError>;
}

/// Everything an operator needs from the storage core: the buffer pool,
/// the lock manager and the transaction it runs under.
pub struct ExecutorContext {
    buffer_pool: Arc<BufferPoolManager>,
    lock_manager: Arc<LockManager>,
    transaction_manager: Arc<TransactionManager>,
    transaction: Arc<Transaction>,
}

impl ExecutorContext {
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        lock_manager: Arc<LockManager>,
        transaction_manager: Arc<TransactionManager>,
        transaction: Arc<Transaction>,
    ) -> Self {
        Self {
            buffer_pool,
            lock_manager,
            transaction_manager,
            transaction,
        }
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.buffer_pool
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.transaction_manager
    }

    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.transaction
    }

    /// Take whatever lock this transaction's isolation level requires
    /// before reading a row. Read-uncommitted reads without locking.
    pub fn lock_row_for_read(&self, rid: Rid) -> Result<(), ExecutionError> {
        if self.transaction.isolation_level() == IsolationLevel::ReadUncommitted {
            return Ok(());
        }
        if self.lock_manager.lock_shared(&self.transaction, rid) {
            Ok(())
        } else {
            Err(ExecutionError::TransactionAborted(self.transaction.id()))
        }
    }

    /// Release a read lock where the isolation level allows it:
    /// read-committed drops shared locks as soon as the row is consumed,
    /// repeatable-read keeps them until commit.
    pub fn unlock_row_after_read(&self, rid: Rid) {
        if self.transaction.isolation_level() == IsolationLevel::ReadCommitted {
            self.lock_manager.unlock(&self.transaction, rid);
        }
    }

    /// Take an exclusive lock before writing a row, upgrading a held
    /// shared lock in place.
    pub fn lock_row_for_write(&self, rid: Rid) -> Result<(), ExecutionError> {
        let granted = if self.transaction.is_shared_locked(rid) {
            self.lock_manager.lock_upgrade(&self.transaction, rid)
        } else {
            self.lock_manager.lock_exclusive(&self.transaction, rid)
        };
        if granted {
            Ok(())
        } else {
            Err(ExecutionError::TransactionAborted(self.transaction.id()))
        }
    }
}
