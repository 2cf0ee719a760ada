pub mod lru;

use crate::access::{RecordId, Tuple, TupleDesc};
use crate::catalog::Catalog;
use crate::concurrency::{LockManager, LockMode};
use crate::config::BufferPoolConfig;
use crate::storage::disk::HeapFile;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{HeapPage, PageId, TableId};
use crate::transaction::TransactionId;
use log::{debug, info, warn};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;

/// Shared handle to a cached page.
///
/// The page lock taken by [`BufferPool::get_page`] decides who may use the
/// page; the `RwLock` only makes the in-memory access itself safe.
pub type PageRef = Arc<RwLock<HeapPage>>;

/// Access a transaction asks for when fetching a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

impl From<Permissions> for LockMode {
    fn from(perm: Permissions) -> Self {
        match perm {
            Permissions::ReadOnly => LockMode::Shared,
            Permissions::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// Bounded page cache that also mediates page locking.
///
/// Pages are evicted least recently used first. A page dirtied by an
/// uncommitted transaction is never evicted (no-steal), and neither is a
/// page under an exclusive lock, since its holder may write through its
/// handle at any time. Committing a transaction writes its pages back;
/// aborting re-reads them from disk.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<BufferPoolInner>,
}

struct BufferPoolInner {
    config: BufferPoolConfig,
    catalog: Catalog,
    cache: Mutex<LruCache<PageId, PageRef>>,
    lock_manager: LockManager,
}

impl BufferPool {
    pub fn new(config: BufferPoolConfig) -> StorageResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(BufferPoolInner {
                cache: Mutex::new(LruCache::new(config.num_pages)),
                catalog: Catalog::new(),
                lock_manager: LockManager::new(),
                config,
            }),
        })
    }

    /// A pool caching up to `num_pages` pages, other settings defaulted.
    pub fn with_capacity(num_pages: usize) -> StorageResult<Self> {
        Self::new(BufferPoolConfig::new(num_pages))
    }

    pub fn config(&self) -> &BufferPoolConfig {
        &self.inner.config
    }

    pub fn page_size(&self) -> usize {
        self.inner.config.page_size
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    /// Create a table file with this pool's page size and register it.
    pub fn create_table(
        &self,
        table_id: TableId,
        path: &Path,
        desc: Arc<TupleDesc>,
    ) -> StorageResult<Arc<HeapFile>> {
        let file = HeapFile::create(table_id, path, desc, self.page_size())?;
        Ok(self.inner.catalog.add_table(file))
    }

    /// Open an existing table file with this pool's page size and register it.
    pub fn open_table(
        &self,
        table_id: TableId,
        path: &Path,
        desc: Arc<TupleDesc>,
    ) -> StorageResult<Arc<HeapFile>> {
        let file = HeapFile::open(table_id, path, desc, self.page_size())?;
        Ok(self.inner.catalog.add_table(file))
    }

    /// Fetch a page on behalf of `tid`, locking it first.
    ///
    /// Blocks while another transaction holds a conflicting lock. If waiting
    /// would deadlock, `tid` is aborted (its dirty pages are restored and its
    /// locks released) and `TransactionAborted` is returned.
    pub fn get_page(
        &self,
        tid: TransactionId,
        pid: PageId,
        perm: Permissions,
    ) -> StorageResult<PageRef> {
        let lock = self.inner.lock_manager.acquire(
            tid,
            pid,
            LockMode::from(perm),
            self.inner.config.lock_wait(),
        );
        if let Err(e) = lock {
            if matches!(e, StorageError::TransactionAborted { .. }) {
                warn!("aborting {} to break a deadlock on {}", tid, pid);
                if let Err(revert) = self.transaction_complete(tid, false) {
                    warn!("rolling back {} after deadlock failed: {}", tid, revert);
                }
            }
            return Err(e);
        }

        self.fetch(pid)
    }

    fn fetch(&self, pid: PageId) -> StorageResult<PageRef> {
        if let Some(page) = self.inner.cache.lock().get(&pid) {
            return Ok(Arc::clone(page));
        }

        let file = self.inner.catalog.file(pid.table_id)?;
        let page = file.read_page(pid)?;
        debug!("faulted in {}", pid);

        let mut cache = self.inner.cache.lock();
        // Another reader may have faulted the same page in meanwhile.
        if let Some(existing) = cache.get(&pid) {
            return Ok(Arc::clone(existing));
        }

        let page = Arc::new(RwLock::new(page));
        let locks = &self.inner.lock_manager;
        let evicted = cache
            .put(pid, Arc::clone(&page), |cached_pid, cached| {
                is_clean(cached) && !locks.is_exclusively_locked(*cached_pid)
            })
            .inspect_err(|_| warn!("no clean page to evict for {}", pid))?;
        if let Some((victim, _)) = evicted {
            debug!("evicted {} for {}", victim, pid);
        }
        Ok(page)
    }

    /// Release one page lock before the transaction ends.
    ///
    /// This breaks two-phase locking: another transaction may then see the
    /// page before `tid` commits. Returns `LockNotHeld` if `tid` had no lock
    /// on `pid`.
    pub fn unsafe_release_page(&self, tid: TransactionId, pid: PageId) -> StorageResult<()> {
        if self.inner.lock_manager.release(tid, pid) {
            Ok(())
        } else {
            Err(StorageError::LockNotHeld { tid, page_id: pid })
        }
    }

    pub fn holds_lock(&self, tid: TransactionId, pid: PageId) -> bool {
        self.inner.lock_manager.lock_of(tid, pid).is_some()
    }

    pub fn lock_manager(&self) -> &LockManager {
        &self.inner.lock_manager
    }

    /// Commit or abort `tid` and release all of its locks.
    ///
    /// Commit writes every page `tid` dirtied and makes the written image the
    /// new before image. Abort replaces each such page with the copy on disk.
    /// Pages are settled before any lock is released. If writing or
    /// restoring fails, the pages still dirtied by `tid` are dropped from the
    /// cache so that the next fetch reads the disk copy, and the error is
    /// returned.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> StorageResult<()> {
        let result = if commit {
            self.flush_pages(tid)
        } else {
            self.revert_pages(tid)
        };
        if result.is_err() {
            self.discard_pages_dirtied_by(tid);
        }
        self.inner.lock_manager.release_all(tid);

        match &result {
            Ok(()) if commit => info!("{} committed", tid),
            Ok(()) => info!("{} aborted", tid),
            Err(e) => warn!("completing {} failed: {}", tid, e),
        }
        result
    }

    pub fn commit(&self, tid: TransactionId) -> StorageResult<()> {
        self.transaction_complete(tid, true)
    }

    pub fn abort(&self, tid: TransactionId) -> StorageResult<()> {
        self.transaction_complete(tid, false)
    }

    /// Add `tuple` to a table on behalf of `tid`, returning where it landed.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: TableId,
        tuple: Tuple,
    ) -> StorageResult<RecordId> {
        let file = self.inner.catalog.file(table_id)?;
        file.insert_tuple(self, tid, tuple)
    }

    /// Remove the stored `tuple` on behalf of `tid`.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> StorageResult<()> {
        let record_id = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        let file = self.inner.catalog.file(record_id.page_id.table_id)?;
        file.delete_tuple(self, tid, tuple)
    }

    /// Write every page `tid` dirtied and mark it clean.
    pub fn flush_pages(&self, tid: TransactionId) -> StorageResult<()> {
        for (pid, page) in self.pages_dirtied_by(tid) {
            let file = self.inner.catalog.file(pid.table_id)?;
            let mut page = page.write();
            file.write_page(&page)?;
            page.mark_dirty(None);
            page.set_before_image();
        }
        Ok(())
    }

    /// Write every dirty page, whoever dirtied it.
    ///
    /// This writes uncommitted data and so defeats no-steal; it exists for
    /// tests and orderly shutdown.
    pub fn flush_all_pages(&self) -> StorageResult<()> {
        for (pid, page) in self.cached_pages() {
            let mut page = page.write();
            if page.is_dirty() {
                let file = self.inner.catalog.file(pid.table_id)?;
                file.write_page(&page)?;
                page.mark_dirty(None);
                page.set_before_image();
            }
        }
        Ok(())
    }

    /// Drop a page from the cache without writing it.
    pub fn discard_page(&self, pid: PageId) {
        self.inner.cache.lock().remove(&pid);
    }

    pub fn is_cached(&self, pid: PageId) -> bool {
        self.inner.cache.lock().contains(&pid)
    }

    pub fn num_cached(&self) -> usize {
        self.inner.cache.lock().len()
    }

    fn revert_pages(&self, tid: TransactionId) -> StorageResult<()> {
        for (pid, page) in self.pages_dirtied_by(tid) {
            let file = self.inner.catalog.file(pid.table_id)?;
            let original = file.read_page(pid)?;
            *page.write() = original;
            debug!("restored {} after {} aborted", pid, tid);
        }
        Ok(())
    }

    fn discard_pages_dirtied_by(&self, tid: TransactionId) {
        for (pid, _) in self.pages_dirtied_by(tid) {
            self.discard_page(pid);
            debug!("dropped unsettled {} of {}", pid, tid);
        }
    }

    /// Snapshot of the cache, most recently used first.
    fn cached_pages(&self) -> Vec<(PageId, PageRef)> {
        self.inner
            .cache
            .lock()
            .iter()
            .map(|(pid, page)| (*pid, Arc::clone(page)))
            .collect()
    }

    fn pages_dirtied_by(&self, tid: TransactionId) -> Vec<(PageId, PageRef)> {
        self.cached_pages()
            .into_iter()
            .filter(|(_, page)| page.read().dirtier() == Some(tid))
            .collect()
    }
}

/// A page may be evicted only if nobody has dirtied it. A page that is
/// write-locked right now is in use and is skipped as well.
fn is_clean(page: &PageRef) -> bool {
    page.try_read().is_some_and(|page| !page.is_dirty())
}
