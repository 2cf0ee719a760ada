pub mod heap_page;

use std::fmt;

/// Identifier of a table file, assigned by whoever registers the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Table({})", self.0)
    }
}

/// A page is addressed by its table and its position within the table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId {
    pub table_id: TableId,
    pub page_number: u32,
}

impl PageId {
    pub fn new(table_id: TableId, page_number: u32) -> Self {
        Self {
            table_id,
            page_number,
        }
    }

    /// Byte offset of this page inside its table file.
    pub fn offset(&self, page_size: usize) -> u64 {
        self.page_number as u64 * page_size as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({}:{})", self.table_id.0, self.page_number)
    }
}

pub use heap_page::HeapPage;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_page_id_equality_and_hash() {
        let a = PageId::new(TableId(1), 4);
        let b = PageId::new(TableId(1), 4);
        let c = PageId::new(TableId(2), 4);

        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    #[test]
    fn test_page_offset() {
        assert_eq!(PageId::new(TableId(9), 0).offset(4096), 0);
        assert_eq!(PageId::new(TableId(9), 3).offset(4096), 12288);
    }
}
