//! Registry of open table files.
//!
//! Table identifiers and layouts are decided by whoever registers a table;
//! the catalog only maps a [`TableId`] to its [`HeapFile`] so the buffer pool
//! can fault pages in.

use crate::access::TupleDesc;
use crate::storage::disk::HeapFile;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::TableId;
use dashmap::DashMap;
use log::debug;
use std::sync::Arc;

#[derive(Default)]
pub struct Catalog {
    tables: DashMap<TableId, Arc<HeapFile>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `file` under its table id, replacing any earlier file.
    pub fn add_table(&self, file: HeapFile) -> Arc<HeapFile> {
        let file = Arc::new(file);
        debug!("registered {} at {}", file.table_id(), file.path().display());
        self.tables.insert(file.table_id(), Arc::clone(&file));
        file
    }

    pub fn remove_table(&self, table_id: TableId) -> Option<Arc<HeapFile>> {
        self.tables.remove(&table_id).map(|(_, file)| file)
    }

    pub fn file(&self, table_id: TableId) -> StorageResult<Arc<HeapFile>> {
        self.tables
            .get(&table_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StorageError::TableNotFound(table_id))
    }

    pub fn tuple_desc(&self, table_id: TableId) -> StorageResult<Arc<TupleDesc>> {
        self.file(table_id).map(|file| Arc::clone(file.desc()))
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = self.tables.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::FieldType;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_add_and_lookup() -> Result<()> {
        let dir = tempdir()?;
        let desc = Arc::new(TupleDesc::new(&[FieldType::Int]));
        let catalog = Catalog::new();

        catalog.add_table(HeapFile::create(
            TableId(2),
            &dir.path().join("b.dat"),
            desc.clone(),
            4096,
        )?);
        catalog.add_table(HeapFile::create(
            TableId(1),
            &dir.path().join("a.dat"),
            desc.clone(),
            4096,
        )?);

        assert_eq!(catalog.table_ids(), vec![TableId(1), TableId(2)]);
        assert_eq!(catalog.file(TableId(2))?.table_id(), TableId(2));
        assert_eq!(*catalog.tuple_desc(TableId(1))?, *desc);
        Ok(())
    }

    #[test]
    fn test_missing_table() -> Result<()> {
        let dir = tempdir()?;
        let catalog = Catalog::new();
        assert!(matches!(
            catalog.file(TableId(7)),
            Err(StorageError::TableNotFound(TableId(7)))
        ));

        let desc = Arc::new(TupleDesc::new(&[FieldType::Int]));
        catalog.add_table(HeapFile::create(TableId(7), &dir.path().join("t.dat"), desc, 4096)?);
        assert!(catalog.remove_table(TableId(7)).is_some());
        assert!(catalog.file(TableId(7)).is_err());
        Ok(())
    }
}
