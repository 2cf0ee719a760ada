use super::TransactionId;
use crate::storage::buffer::BufferPool;
use crate::storage::error::StorageResult;
use log::warn;

/// A transaction bound to a buffer pool.
///
/// Dropping a handle that was neither committed nor aborted aborts it.
pub struct Transaction {
    id: TransactionId,
    pool: BufferPool,
    finished: bool,
}

impl Transaction {
    pub fn begin(pool: &BufferPool) -> Self {
        Self {
            id: TransactionId::fresh(),
            pool: pool.clone(),
            finished: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn commit(mut self) -> StorageResult<()> {
        self.finished = true;
        self.pool.commit(self.id)
    }

    pub fn abort(mut self) -> StorageResult<()> {
        self.finished = true;
        self.pool.abort(self.id)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.pool.abort(self.id) {
                warn!("abort of dropped {} failed: {}", self.id, e);
            }
        }
    }
}
