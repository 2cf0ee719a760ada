use crate::access::{RecordId, Tuple, TupleDesc};
use crate::storage::buffer::{BufferPool, Permissions};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{HeapPage, PageId, TableId};
use crate::transaction::TransactionId;
use log::debug;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A table stored as a flat file of fixed-size [`HeapPage`] images.
///
/// Page `n` lives at byte offset `n * page_size`. Raw reads and writes go
/// straight to the file; tuple-level operations go through the buffer pool
/// so that they take page locks.
pub struct HeapFile {
    table_id: TableId,
    path: PathBuf,
    desc: Arc<TupleDesc>,
    page_size: usize,
    file: Mutex<File>,
}

impl HeapFile {
    /// Create an empty table file, truncating any existing file at `path`.
    pub fn create(
        table_id: TableId,
        path: &Path,
        desc: Arc<TupleDesc>,
        page_size: usize,
    ) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self::from_file(table_id, path, desc, page_size, file))
    }

    /// Open an existing table file.
    pub fn open(
        table_id: TableId,
        path: &Path,
        desc: Arc<TupleDesc>,
        page_size: usize,
    ) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self::from_file(table_id, path, desc, page_size, file))
    }

    fn from_file(
        table_id: TableId,
        path: &Path,
        desc: Arc<TupleDesc>,
        page_size: usize,
        file: File,
    ) -> Self {
        Self {
            table_id,
            path: path.to_path_buf(),
            desc,
            page_size,
            file: Mutex::new(file),
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        let file = self.file.lock();
        Ok((file.metadata()?.len() / self.page_size as u64) as u32)
    }

    pub fn read_page(&self, pid: PageId) -> StorageResult<HeapPage> {
        if pid.table_id != self.table_id {
            return Err(StorageError::PageNotFound(pid));
        }

        let mut data = vec![0u8; self.page_size];
        {
            let mut file = self.file.lock();
            let pages = file.metadata()?.len() / self.page_size as u64;
            if pid.page_number as u64 >= pages {
                return Err(StorageError::PageNotFound(pid));
            }
            file.seek(SeekFrom::Start(pid.offset(self.page_size)))?;
            file.read_exact(&mut data)?;
        }

        HeapPage::from_bytes(pid, self.desc.clone(), &data)
    }

    pub fn write_page(&self, page: &HeapPage) -> StorageResult<()> {
        let pid = page.page_id();
        if pid.table_id != self.table_id {
            return Err(StorageError::PageNotFound(pid));
        }

        let data = page.to_bytes();
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pid.offset(self.page_size)))?;
        file.write_all(&data)?;
        file.sync_all()?;
        Ok(())
    }

    /// Extend the file by one all-zero page and return its id.
    pub fn append_empty_page(&self) -> StorageResult<PageId> {
        let mut file = self.file.lock();
        let pages = file.metadata()?.len() / self.page_size as u64;
        let pid = PageId::new(self.table_id, pages as u32);

        file.seek(SeekFrom::Start(pid.offset(self.page_size)))?;
        file.write_all(&HeapPage::empty_page_data(self.page_size))?;
        file.sync_all()?;

        debug!("appended {} to {}", pid, self.path.display());
        Ok(pid)
    }

    /// Insert `tuple` into the first page with a free slot, appending a new
    /// page when every existing page is full. Each page examined is locked
    /// exclusively on behalf of `tid`; the page written is marked dirty.
    /// A full page that `tid` had not locked before is released again.
    pub fn insert_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: Tuple,
    ) -> StorageResult<RecordId> {
        if !tuple.desc().same_layout(&self.desc) {
            return Err(StorageError::SchemaMismatch {
                expected: self.desc.to_string(),
                actual: tuple.desc().to_string(),
            });
        }

        for page_number in 0..self.num_pages()? {
            let pid = PageId::new(self.table_id, page_number);
            let held_before = pool.holds_lock(tid, pid);
            let frame = pool.get_page(tid, pid, Permissions::ReadWrite)?;
            let mut page = frame.write();
            if page.num_empty_slots() > 0 {
                let record_id = page.insert_tuple(tuple)?;
                page.mark_dirty(Some(tid));
                return Ok(record_id);
            }
            // A full page this insert only looked at needs no lock.
            let untouched = !held_before && !page.is_dirty();
            drop(page);
            if untouched {
                pool.unsafe_release_page(tid, pid)?;
            }
        }

        // A concurrent inserter may fill a freshly appended page first.
        loop {
            let pid = self.append_empty_page()?;
            let frame = pool.get_page(tid, pid, Permissions::ReadWrite)?;
            let mut page = frame.write();
            if page.num_empty_slots() > 0 {
                let record_id = page.insert_tuple(tuple)?;
                page.mark_dirty(Some(tid));
                return Ok(record_id);
            }
        }
    }

    /// Free the slot named by the tuple's record id.
    pub fn delete_tuple(
        &self,
        pool: &BufferPool,
        tid: TransactionId,
        tuple: &Tuple,
    ) -> StorageResult<()> {
        let record_id = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        let pid = record_id.page_id;
        if pid.table_id != self.table_id || pid.page_number >= self.num_pages()? {
            return Err(StorageError::TupleNotInTable {
                table_id: self.table_id,
                page_id: pid,
            });
        }

        let frame = pool.get_page(tid, pid, Permissions::ReadWrite)?;
        let mut page = frame.write();
        page.delete_tuple(tuple)?;
        page.mark_dirty(Some(tid));
        Ok(())
    }

    /// Iterate over every tuple in the table, reading each page through the
    /// buffer pool with shared permission.
    pub fn scan<'a>(&'a self, pool: &'a BufferPool, tid: TransactionId) -> StorageResult<HeapFileScan<'a>> {
        Ok(HeapFileScan {
            file: self,
            pool,
            tid,
            next_page: 0,
            num_pages: self.num_pages()?,
            current: Vec::new().into_iter(),
            failed: false,
        })
    }
}

pub struct HeapFileScan<'a> {
    file: &'a HeapFile,
    pool: &'a BufferPool,
    tid: TransactionId,
    next_page: u32,
    num_pages: u32,
    current: std::vec::IntoIter<Tuple>,
    failed: bool,
}

impl Iterator for HeapFileScan<'_> {
    type Item = StorageResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tuple) = self.current.next() {
                return Some(Ok(tuple));
            }
            if self.failed || self.next_page >= self.num_pages {
                return None;
            }

            let pid = PageId::new(self.file.table_id, self.next_page);
            self.next_page += 1;
            match self.pool.get_page(self.tid, pid, Permissions::ReadOnly) {
                Ok(page) => {
                    let tuples: Vec<Tuple> = page.read().iter().cloned().collect();
                    self.current = tuples.into_iter();
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
