//! The slotted page: header, slot directory, record area, and their
//! binary (de)serialization.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! [4] page_id
//! [4] page_size
//! [4] free_space_end        ; offset; grows downward from page_size
//! [4] slot_count
//! [4] next_page_id          ; -1 sentinel
//! [8] last_access_timestamp
//! [1] dirty_flag
//! --- slot directory (slot_count * 8 bytes): [4] offset [4] length ---
//! --- free region ---
//! --- record area, grows upward from page_size toward the header ---
//! ```

use crate::error::{FluxError, Result};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

pub const HEADER_SIZE: u32 = 29;
pub const SLOT_ENTRY_SIZE: u32 = 8;
pub const NO_NEXT_PAGE: i32 = -1;

static TICK: AtomicU64 = AtomicU64::new(1);

/// A monotonically increasing counter used as the LRU timestamp. Per the
/// design notes, wall-clock time is avoided because two touches within the
/// same tick would otherwise be indistinguishable.
pub fn now_monotonic() -> u64 {
    TICK.fetch_add(1, AtomicOrdering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: u32,
    pub length: u32,
}

#[derive(Debug, Clone)]
pub struct Page {
    page_id: i32,
    page_size: u32,
    free_space_end: u32,
    next_page_id: i32,
    last_access_timestamp: u64,
    dirty: bool,
    slots: Vec<Slot>,
    records: Vec<Vec<u8>>,
}

impl Page {
    /// Construct a brand-new, empty page with the given id.
    pub fn new(page_id: i32, page_size: u32) -> Self {
        let mut page = Self {
            page_id,
            page_size,
            free_space_end: page_size,
            next_page_id: NO_NEXT_PAGE,
            last_access_timestamp: 0,
            dirty: false,
            slots: Vec::new(),
            records: Vec::new(),
        };
        page.touch();
        page
    }

    pub fn get_page_id(&self) -> i32 {
        self.page_id
    }

    pub fn get_next_page(&self) -> i32 {
        self.next_page_id
    }

    pub fn set_next_page(&mut self, next_page_id: i32) {
        self.next_page_id = next_page_id;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clean_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn get_num_records(&self) -> usize {
        self.slots.len()
    }

    pub fn get_records(&self) -> &[Vec<u8>] {
        &self.records
    }

    pub fn last_access_timestamp(&self) -> u64 {
        self.last_access_timestamp
    }

    pub fn touch(&mut self) {
        self.last_access_timestamp = now_monotonic();
    }

    /// `free_space_end - header_size - slot_count * slot_entry_size`.
    pub fn get_free_space(&self) -> u32 {
        self.free_space_end - HEADER_SIZE - self.slots.len() as u32 * SLOT_ENTRY_SIZE
    }

    /// Append a record. Returns `false` (no partial insert) if it does not
    /// fit; the caller is expected to split the page in that case.
    pub fn add_record(&mut self, bytes: &[u8]) -> bool {
        let len = bytes.len() as u32;
        let required = len + SLOT_ENTRY_SIZE;
        if self.get_free_space() < required {
            return false;
        }
        self.free_space_end -= len;
        self.slots.push(Slot {
            offset: self.free_space_end,
            length: len,
        });
        self.records.push(bytes.to_vec());
        self.dirty = true;
        self.touch();
        true
    }

    /// Compacts the record area by shifting every record whose offset is
    /// lower than the removed slot's (i.e. inserted after it, and so
    /// physically closer to the header) up by the removed slot's length,
    /// then drops the slot. Returns `false` for an out-of-range index.
    ///
    /// No public StorageManager operation ever calls this — only whole-row
    /// inserts and whole-table/whole-column rewrites are supported — but it
    /// is kept correct and tested in isolation in case a future delete
    /// command needs it.
    pub fn remove_record(&mut self, slot_index: usize) -> bool {
        if slot_index >= self.slots.len() {
            return false;
        }
        let removed = self.slots[slot_index];
        for slot in self.slots.iter_mut() {
            if slot.offset < removed.offset {
                slot.offset += removed.length;
            }
        }
        self.slots.remove(slot_index);
        self.records.remove(slot_index);
        self.free_space_end += removed.length;
        self.dirty = true;
        true
    }

    /// Partitions this page's records by index at `slot_count / 2` (floor):
    /// the first half go to `dest_a`, the second half to `dest_b`, in order.
    /// Both destinations must be empty and large enough to hold their
    /// halves; that's guaranteed by the only caller, which only splits when
    /// a single record doesn't fit a non-empty tail page.
    pub fn split(&mut self, dest_a: &mut Page, dest_b: &mut Page) -> Result<()> {
        let mid = self.records.len() / 2;
        for record in &self.records[..mid] {
            if !dest_a.add_record(record) {
                return Err(FluxError::InvariantBreach(
                    "split: first half did not fit in a fresh empty page".into(),
                ));
            }
        }
        for record in &self.records[mid..] {
            if !dest_b.add_record(record) {
                return Err(FluxError::InvariantBreach(
                    "split: second half did not fit in a fresh empty page".into(),
                ));
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Clears this page and reloads it with `records`, in order. Used by
    /// `StorageManager` to install the two halves of a split into their
    /// real buffer-resident pages. Fatal if a record doesn't fit, which
    /// would mean the destination page was undersized for its half.
    pub fn bulk_load(&mut self, records: &[Vec<u8>]) -> Result<()> {
        self.clean_data();
        self.dirty = true;
        for record in records {
            if !self.add_record(record) {
                return Err(FluxError::InvariantBreach(
                    "bulk_load: destination page ran out of space".into(),
                ));
            }
        }
        Ok(())
    }

    /// Resets the page to empty, preserving `page_id`. Does not set the
    /// dirty flag; the caller must do so if the page was previously
    /// non-empty (e.g. `free_page`, which always marks dirty explicitly).
    pub fn clean_data(&mut self) {
        self.slots.clear();
        self.records.clear();
        self.free_space_end = self.page_size;
        self.next_page_id = NO_NEXT_PAGE;
        self.touch();
    }

    /// Serialize to exactly `page_size` bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.page_size as usize];
        buf[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.page_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.free_space_end.to_le_bytes());
        buf[12..16].copy_from_slice(&(self.slots.len() as u32).to_le_bytes());
        buf[16..20].copy_from_slice(&self.next_page_id.to_le_bytes());
        buf[20..28].copy_from_slice(&self.last_access_timestamp.to_le_bytes());
        buf[28] = self.dirty as u8;

        for (i, slot) in self.slots.iter().enumerate() {
            let start = HEADER_SIZE as usize + i * SLOT_ENTRY_SIZE as usize;
            buf[start..start + 4].copy_from_slice(&slot.offset.to_le_bytes());
            buf[start + 4..start + 8].copy_from_slice(&slot.length.to_le_bytes());
        }

        for (slot, record) in self.slots.iter().zip(self.records.iter()) {
            let start = slot.offset as usize;
            let end = start + slot.length as usize;
            buf[start..end].copy_from_slice(record);
        }

        buf
    }

    /// Inverse of `serialize`. Rejects a byte slice shorter than
    /// `page_size`.
    pub fn deserialize(bytes: &[u8], page_size: u32) -> Result<Self> {
        if (bytes.len() as u32) < page_size {
            return Err(FluxError::InvariantBreach(format!(
                "page bytes ({}) shorter than page_size ({page_size})",
                bytes.len()
            )));
        }

        let page_id = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let stored_page_size = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let free_space_end = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let slot_count = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        let next_page_id = i32::from_le_bytes(bytes[16..20].try_into().unwrap());
        let last_access_timestamp = u64::from_le_bytes(bytes[20..28].try_into().unwrap());
        let dirty = bytes[28] != 0;

        let mut slots = Vec::with_capacity(slot_count as usize);
        for i in 0..slot_count as usize {
            let start = HEADER_SIZE as usize + i * SLOT_ENTRY_SIZE as usize;
            let offset = u32::from_le_bytes(bytes[start..start + 4].try_into().unwrap());
            let length = u32::from_le_bytes(bytes[start + 4..start + 8].try_into().unwrap());
            slots.push(Slot { offset, length });
        }

        let mut records = Vec::with_capacity(slots.len());
        for slot in &slots {
            let start = slot.offset as usize;
            let end = start + slot.length as usize;
            records.push(bytes[start..end].to_vec());
        }

        Ok(Self {
            page_id,
            page_size: stored_page_size,
            free_space_end,
            next_page_id,
            last_access_timestamp,
            dirty,
            slots,
            records,
        })
    }
}

impl PartialEq for Page {
    fn eq(&self, other: &Self) -> bool {
        self.last_access_timestamp == other.last_access_timestamp
    }
}
impl Eq for Page {}

impl PartialOrd for Page {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Page {
    /// Pages order by `last_access_timestamp`; this is the LRU key.
    fn cmp(&self, other: &Self) -> Ordering {
        self.last_access_timestamp.cmp(&other.last_access_timestamp)
    }
}
