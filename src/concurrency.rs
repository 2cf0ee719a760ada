//! Concurrency control module.
//!
//! Page-granularity two-phase locking with wait-for-graph deadlock
//! detection. The lock manager is driven by the buffer pool, which acquires
//! locks on behalf of transactions as pages are requested.

pub mod lock;

pub use lock::{LockManager, LockMode};
