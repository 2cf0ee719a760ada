//! Transaction identifiers and handles.
//!
//! A transaction is nothing more than an id: the buffer pool tracks which
//! pages it locked and dirtied, and commit or abort settles them.

pub mod handle;
pub mod id;

pub use handle::Transaction;
pub use id::TransactionId;
