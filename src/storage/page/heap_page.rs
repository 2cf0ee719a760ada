use crate::access::{RecordId, Tuple, TupleDesc};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use bytes::Bytes;
use std::io::Cursor;
use std::sync::Arc;

/// In-memory form of one fixed-size table page.
///
/// On disk a page is `[occupancy bitmap][tuple slots][zero padding]`. The
/// bitmap has one bit per slot, least significant bit first within a byte,
/// and is `ceil(slots / 8)` bytes long. Every slot is `desc.size()` bytes,
/// and the slot count is `floor(page_size * 8 / (tuple_size * 8 + 1))`.
#[derive(Debug, Clone)]
pub struct HeapPage {
    page_id: PageId,
    desc: Arc<TupleDesc>,
    page_size: usize,
    header: Vec<u8>,
    tuples: Vec<Option<Tuple>>,
    dirtier: Option<TransactionId>,
    before_image: Bytes,
}

impl HeapPage {
    /// Number of tuple slots on a page of `page_size` bytes.
    pub fn slot_count(page_size: usize, tuple_size: usize) -> usize {
        (page_size * 8) / (tuple_size * 8 + 1)
    }

    /// Number of bitmap bytes needed for `slots` slots.
    pub fn header_size(slots: usize) -> usize {
        slots.div_ceil(8)
    }

    /// Image of a page with no tuples.
    pub fn empty_page_data(page_size: usize) -> Vec<u8> {
        vec![0u8; page_size]
    }

    pub fn empty(page_id: PageId, desc: Arc<TupleDesc>, page_size: usize) -> Self {
        let slots = Self::slot_count(page_size, desc.size());
        let mut page = Self {
            page_id,
            desc,
            page_size,
            header: vec![0u8; Self::header_size(slots)],
            tuples: vec![None; slots],
            dirtier: None,
            before_image: Bytes::new(),
        };
        page.set_before_image();
        page
    }

    /// Decode a page image. The page size is the length of `data`.
    pub fn from_bytes(page_id: PageId, desc: Arc<TupleDesc>, data: &[u8]) -> StorageResult<Self> {
        let page_size = data.len();
        let tuple_size = desc.size();
        let slots = Self::slot_count(page_size, tuple_size);
        let header_size = Self::header_size(slots);
        let header = data[..header_size].to_vec();

        let mut tuples = Vec::with_capacity(slots);
        for slot in 0..slots {
            if !bit_is_set(&header, slot) {
                tuples.push(None);
                continue;
            }

            let start = header_size + slot * tuple_size;
            let mut cursor = Cursor::new(&data[start..start + tuple_size]);
            let mut fields = Vec::with_capacity(desc.num_fields());
            for item in desc.items() {
                let field = item
                    .field_type
                    .parse(&mut cursor)
                    .map_err(|e| StorageError::CorruptPage {
                        page_id,
                        reason: format!("slot {}: {}", slot, e),
                    })?;
                fields.push(field);
            }

            let mut tuple = Tuple::new(desc.clone(), fields)?;
            tuple.set_record_id(Some(RecordId::new(page_id, slot)));
            tuples.push(Some(tuple));
        }

        Ok(Self {
            page_id,
            desc,
            page_size,
            header,
            tuples,
            dirtier: None,
            before_image: Bytes::copy_from_slice(data),
        })
    }

    /// Encode the page. Feeding the result back to [`HeapPage::from_bytes`]
    /// yields an identical page.
    pub fn to_bytes(&self) -> Vec<u8> {
        let tuple_size = self.desc.size();
        let mut data = Vec::with_capacity(self.page_size);
        data.extend_from_slice(&self.header);

        for tuple in &self.tuples {
            match tuple {
                Some(tuple) => {
                    for field in tuple.fields() {
                        field.encode_into(&mut data);
                    }
                }
                None => data.resize(data.len() + tuple_size, 0),
            }
        }

        data.resize(self.page_size, 0);
        data
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn num_slots(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_slot_used(&self, slot: usize) -> bool {
        slot < self.tuples.len() && bit_is_set(&self.header, slot)
    }

    pub fn num_empty_slots(&self) -> usize {
        (0..self.tuples.len())
            .filter(|&slot| !self.is_slot_used(slot))
            .count()
    }

    pub fn tuple(&self, slot: usize) -> Option<&Tuple> {
        self.tuples.get(slot).and_then(|t| t.as_ref())
    }

    /// Occupied tuples in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter().flatten()
    }

    /// Store `tuple` in the first free slot and return its new locator.
    pub fn insert_tuple(&mut self, mut tuple: Tuple) -> StorageResult<RecordId> {
        if !tuple.desc().same_layout(&self.desc) {
            return Err(StorageError::SchemaMismatch {
                expected: self.desc.to_string(),
                actual: tuple.desc().to_string(),
            });
        }

        let slot = (0..self.tuples.len())
            .find(|&slot| !self.is_slot_used(slot))
            .ok_or(StorageError::PageFull(self.page_id))?;

        let record_id = RecordId::new(self.page_id, slot);
        tuple.set_record_id(Some(record_id));
        self.tuples[slot] = Some(tuple);
        self.mark_slot_used(slot, true);
        Ok(record_id)
    }

    /// Free the slot named by the tuple's locator.
    pub fn delete_tuple(&mut self, tuple: &Tuple) -> StorageResult<()> {
        let record_id = tuple.record_id().ok_or(StorageError::MissingRecordId)?;
        if record_id.page_id != self.page_id {
            return Err(StorageError::TupleNotOnPage {
                expected: self.page_id,
                actual: record_id.page_id,
            });
        }
        if !self.is_slot_used(record_id.slot) {
            return Err(StorageError::SlotNotOccupied {
                page_id: self.page_id,
                slot: record_id.slot,
            });
        }

        self.tuples[record_id.slot] = None;
        self.mark_slot_used(record_id.slot, false);
        Ok(())
    }

    /// Record which transaction dirtied the page, or `None` once it is clean.
    pub fn mark_dirty(&mut self, tid: Option<TransactionId>) {
        self.dirtier = tid;
    }

    pub fn dirtier(&self) -> Option<TransactionId> {
        self.dirtier
    }

    pub fn is_dirty(&self) -> bool {
        self.dirtier.is_some()
    }

    /// The page as it was when it was last clean.
    pub fn before_image(&self) -> StorageResult<HeapPage> {
        HeapPage::from_bytes(self.page_id, self.desc.clone(), &self.before_image)
    }

    pub fn set_before_image(&mut self) {
        self.before_image = Bytes::from(self.to_bytes());
    }

    fn mark_slot_used(&mut self, slot: usize, used: bool) {
        let mask = 1u8 << (slot % 8);
        if used {
            self.header[slot / 8] |= mask;
        } else {
            self.header[slot / 8] &= !mask;
        }
    }
}

fn bit_is_set(header: &[u8], slot: usize) -> bool {
    header[slot / 8] & (1u8 << (slot % 8)) != 0
}
