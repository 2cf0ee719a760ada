//! Storage layer error types.

use crate::storage::page::{PageId, TableId};
use crate::transaction::TransactionId;
use thiserror::Error;

/// Coarse classification of a [`StorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The transaction was rolled back to break a deadlock.
    TransactionAborted,
    /// Reading or writing the table file failed.
    StorageFailure,
    /// The caller violated an API contract.
    IllegalOperation,
    /// The buffer pool has no clean page left to evict.
    ResourceExhausted,
}

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Transaction {tid} aborted: waiting for {page_id} would deadlock")]
    TransactionAborted { tid: TransactionId, page_id: PageId },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("Corrupt page {page_id}: {reason}")]
    CorruptPage { page_id: PageId, reason: String },

    #[error("Transaction {tid} holds no lock on {page_id}")]
    LockNotHeld { tid: TransactionId, page_id: PageId },

    #[error("Slot {slot} of {page_id} is not occupied")]
    SlotNotOccupied { page_id: PageId, slot: usize },

    #[error("Tuple belongs to {actual}, not {expected}")]
    TupleNotOnPage { expected: PageId, actual: PageId },

    #[error("{page_id} is not part of {table_id}")]
    TupleNotInTable { table_id: TableId, page_id: PageId },

    #[error("Page is full: {0} has no empty slot")]
    PageFull(PageId),

    #[error("Tuple layout does not match: expected {expected}, got {actual}")]
    SchemaMismatch { expected: String, actual: String },

    #[error("Tuple has no record id")]
    MissingRecordId,

    #[error("Table not found: {0}")]
    TableNotFound(TableId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Buffer pool is full: all {capacity} cached pages are dirty")]
    BufferPoolFull { capacity: usize },
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::TransactionAborted { .. } => ErrorKind::TransactionAborted,
            StorageError::Io(_) | StorageError::PageNotFound(_) | StorageError::CorruptPage { .. } => {
                ErrorKind::StorageFailure
            }
            StorageError::BufferPoolFull { .. } => ErrorKind::ResourceExhausted,
            StorageError::LockNotHeld { .. }
            | StorageError::SlotNotOccupied { .. }
            | StorageError::TupleNotOnPage { .. }
            | StorageError::TupleNotInTable { .. }
            | StorageError::PageFull(_)
            | StorageError::SchemaMismatch { .. }
            | StorageError::MissingRecordId
            | StorageError::TableNotFound(_)
            | StorageError::InvalidConfig(_) => ErrorKind::IllegalOperation,
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
