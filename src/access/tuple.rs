use crate::access::value::{Field, FieldType};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// One column of a [`TupleDesc`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TdItem {
    pub field_type: FieldType,
    pub name: Option<String>,
}

/// Layout of the tuples stored in one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    pub fn new(types: &[FieldType]) -> Self {
        Self {
            items: types
                .iter()
                .map(|&field_type| TdItem {
                    field_type,
                    name: None,
                })
                .collect(),
        }
    }

    pub fn with_names(types: &[FieldType], names: &[&str]) -> Self {
        Self {
            items: types
                .iter()
                .zip(names.iter().map(|n| Some(n.to_string())).chain(std::iter::repeat(None)))
                .map(|(&field_type, name)| TdItem { field_type, name })
                .collect(),
        }
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn field_type(&self, i: usize) -> Option<FieldType> {
        self.items.get(i).map(|item| item.field_type)
    }

    pub fn field_name(&self, i: usize) -> Option<&str> {
        self.items.get(i).and_then(|item| item.name.as_deref())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.name.as_deref() == Some(name))
    }

    pub fn items(&self) -> impl Iterator<Item = &TdItem> {
        self.items.iter()
    }

    /// Width in bytes of one tuple with this layout.
    pub fn size(&self) -> usize {
        self.items.iter().map(|item| item.field_type.size()).sum()
    }

    /// Two descriptors are layout compatible when their field types agree
    /// position by position. Names are not compared.
    pub fn same_layout(&self, other: &TupleDesc) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(other.items.iter())
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl fmt::Display for TupleDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match &item.name {
                Some(name) => write!(f, "{}({})", item.field_type, name)?,
                None => write!(f, "{}", item.field_type)?,
            }
        }
        Ok(())
    }
}

/// Location of a stored tuple: its page and slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_id: PageId,
    pub slot: usize,
}

impl RecordId {
    pub fn new(page_id: PageId, slot: usize) -> Self {
        Self { page_id, slot }
    }
}

impl PartialOrd for RecordId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecordId {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.page_id.cmp(&other.page_id) {
            Ordering::Equal => self.slot.cmp(&other.slot),
            other => other,
        }
    }
}

/// A row. It carries a [`RecordId`] once it has been stored in a page.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: Arc<TupleDesc>, fields: Vec<Field>) -> StorageResult<Self> {
        let matches = fields.len() == desc.num_fields()
            && fields
                .iter()
                .enumerate()
                .all(|(i, field)| desc.field_type(i) == Some(field.field_type()));
        if !matches {
            return Err(StorageError::SchemaMismatch {
                expected: desc.to_string(),
                actual: fields
                    .iter()
                    .map(|f| f.field_type().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        Ok(Self {
            desc,
            fields,
            record_id: None,
        })
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields.get(i)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.fields.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", values.join("\t"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::TableId;

    fn two_ints() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::with_names(
            &[FieldType::Int, FieldType::Int],
            &["a", "b"],
        ))
    }

    #[test]
    fn test_tuple_desc_size() {
        let desc = TupleDesc::new(&[FieldType::Int, FieldType::String, FieldType::Int]);
        assert_eq!(desc.num_fields(), 3);
        assert_eq!(desc.size(), 4 + 132 + 4);
    }

    #[test]
    fn test_tuple_desc_names() {
        let desc = two_ints();
        assert_eq!(desc.field_name(1), Some("b"));
        assert_eq!(desc.index_of("a"), Some(0));
        assert_eq!(desc.index_of("missing"), None);
        assert_eq!(desc.field_type(2), None);
        assert_eq!(desc.to_string(), "INT(a), INT(b)");
    }

    #[test]
    fn test_same_layout_ignores_names() {
        let named = two_ints();
        let anonymous = TupleDesc::new(&[FieldType::Int, FieldType::Int]);
        let other = TupleDesc::new(&[FieldType::Int, FieldType::String]);

        assert!(named.same_layout(&anonymous));
        assert!(!named.same_layout(&other));
        assert!(!anonymous.same_layout(&TupleDesc::new(&[FieldType::Int])));
    }

    #[test]
    fn test_tuple_rejects_mismatched_fields() {
        let desc = two_ints();
        let err = Tuple::new(desc.clone(), vec![Field::Int(1)]).unwrap_err();
        assert!(matches!(err, StorageError::SchemaMismatch { .. }));

        let err = Tuple::new(desc, vec![Field::Int(1), Field::String("x".into())]).unwrap_err();
        assert!(matches!(err, StorageError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_record_id_ordering() {
        let p1 = PageId::new(TableId(1), 1);
        let p2 = PageId::new(TableId(1), 2);

        assert!(RecordId::new(p1, 5) < RecordId::new(p1, 10));
        assert!(RecordId::new(p1, 10) < RecordId::new(p2, 0));
    }

    #[test]
    fn test_tuple_display() -> anyhow::Result<()> {
        let tuple = Tuple::new(two_ints(), vec![Field::Int(3), Field::Int(-4)])?;
        assert_eq!(tuple.to_string(), "3\t-4");
        assert_eq!(tuple.record_id(), None);
        Ok(())
    }
}
