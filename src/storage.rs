//! Page storage for heap tables.
//!
//! - **HeapPage**: fixed-size page of fixed-width tuple slots with an
//!   occupancy bitmap
//! - **HeapFile**: one table stored as a flat file of heap pages
//! - **BufferPool**: bounded LRU page cache that locks pages on behalf of
//!   transactions and settles their dirty pages on commit or abort

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;

pub use buffer::{BufferPool, PageRef, Permissions};
pub use disk::{HeapFile, HeapFileScan};
pub use error::{ErrorKind, StorageError, StorageResult};
pub use page::{HeapPage, PageId, TableId};
