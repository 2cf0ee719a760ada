//! Buffer pool configuration.

use crate::storage::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of pages a buffer pool caches.
pub const DEFAULT_PAGES: usize = 50;

/// Default size in bytes of a page, including its header.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default upper bound on how long a blocked lock request sleeps before it
/// re-runs deadlock detection.
pub const DEFAULT_LOCK_WAIT_MS: u64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Maximum number of pages held in memory.
    pub num_pages: usize,
    /// Size of every page image in bytes.
    pub page_size: usize,
    /// Lock wait recheck interval in milliseconds.
    pub lock_wait_ms: u64,
}

impl BufferPoolConfig {
    pub fn new(num_pages: usize) -> Self {
        Self {
            num_pages,
            ..Self::default()
        }
    }

    pub fn with_num_pages(mut self, num_pages: usize) -> Self {
        self.num_pages = num_pages;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms.max(1))
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.num_pages == 0 {
            return Err(StorageError::InvalidConfig(
                "num_pages must be greater than zero".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(StorageError::InvalidConfig(
                "page_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            num_pages: DEFAULT_PAGES,
            page_size: DEFAULT_PAGE_SIZE,
            lock_wait_ms: DEFAULT_LOCK_WAIT_MS,
        }
    }
}
