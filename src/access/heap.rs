use crate::access::rid::RecordId;
use crate::access::scan::RelationScanner;
use crate::storage::buffer::lru::LruReplacer;
use crate::storage::error::StorageError;
use crate::storage::page::{PageId, kind};
use crate::storage::{BufferPool, DiskManager, PAGE_SIZE};
use anyhow::{Result, bail};
use std::path::Path;

// Data page layout: kind at 0, record count at 2..4, records packed from 16.
// The meta page (page 0) stores the record length at 4..8.
pub(crate) const HEAP_HEADER_SIZE: usize = 16;
const RECORD_LEN_POS: usize = 4;
const COUNT_POS: usize = 2;

pub(crate) fn read_record_count(data: &[u8; PAGE_SIZE]) -> usize {
    u16::from_le_bytes(data[COUNT_POS..COUNT_POS + 2].try_into().unwrap()) as usize
}

fn write_record_count(data: &mut [u8; PAGE_SIZE], count: usize) {
    data[COUNT_POS..COUNT_POS + 2].copy_from_slice(&(count as u16).to_le_bytes());
}

pub(crate) fn record_pos(record_len: usize, slot: usize) -> usize {
    HEAP_HEADER_SIZE + slot * record_len
}

pub(crate) fn records_per_page(record_len: usize) -> usize {
    (PAGE_SIZE - HEAP_HEADER_SIZE) / record_len
}

/// A relation as a paged file of fixed-width records, appended in arrival
/// order. This is what the index bulk-loads from; the indexed attribute is
/// read out of each record at a byte offset.
pub struct RelationHeap {
    buffer_pool: BufferPool,
    name: String,
    record_len: usize,
}

impl std::fmt::Debug for RelationHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationHeap")
            .field("name", &self.name)
            .field("record_len", &self.record_len)
            .finish()
    }
}

impl RelationHeap {
    /// Create a new relation file named after the relation itself.
    pub fn create(dir: &Path, name: &str, record_len: usize, pool_frames: usize) -> Result<Self> {
        if record_len == 0 || record_len > PAGE_SIZE - HEAP_HEADER_SIZE {
            return Err(StorageError::RecordTooLarge { record_len }.into());
        }

        let disk = DiskManager::create(&dir.join(name))?;
        let replacer = Box::new(LruReplacer::new(pool_frames));
        let buffer_pool = BufferPool::new(disk, replacer, pool_frames);

        let (meta_id, mut meta) = buffer_pool.new_page()?;
        debug_assert_eq!(meta_id, PageId(0));
        meta[0] = kind::HEAP_META;
        meta[RECORD_LEN_POS..RECORD_LEN_POS + 4]
            .copy_from_slice(&(record_len as u32).to_le_bytes());
        drop(meta);

        Ok(Self {
            buffer_pool,
            name: name.to_string(),
            record_len,
        })
    }

    /// Open an existing relation file, validating its record length against
    /// the caller's expectation.
    pub fn open(dir: &Path, name: &str, record_len: usize, pool_frames: usize) -> Result<Self> {
        let disk = DiskManager::open(&dir.join(name))?;
        let replacer = Box::new(LruReplacer::new(pool_frames));
        let buffer_pool = BufferPool::new(disk, replacer, pool_frames);

        let meta = buffer_pool.fetch_page(PageId(0))?;
        if meta[0] != kind::HEAP_META {
            bail!("File {:?} is not a relation heap", name);
        }
        let on_disk =
            u32::from_le_bytes(meta[RECORD_LEN_POS..RECORD_LEN_POS + 4].try_into().unwrap())
                as usize;
        if on_disk != record_len {
            return Err(StorageError::HeapMetaMismatch {
                on_disk,
                expected: record_len,
            }
            .into());
        }
        drop(meta);

        Ok(Self {
            buffer_pool,
            name: name.to_string(),
            record_len,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record_len(&self) -> usize {
        self.record_len
    }

    /// Append one record, returning its id.
    pub fn append(&self, record: &[u8]) -> Result<RecordId> {
        if record.len() != self.record_len {
            bail!(
                "Record is {} bytes, relation {:?} stores {}-byte records",
                record.len(),
                self.name,
                self.record_len
            );
        }

        let num_pages = self.buffer_pool.num_pages()?;
        if num_pages > 1 {
            let last = PageId(num_pages - 1);
            let mut guard = self.buffer_pool.fetch_page_write(last)?;
            let count = read_record_count(&guard);
            if count < records_per_page(self.record_len) {
                let pos = record_pos(self.record_len, count);
                guard[pos..pos + self.record_len].copy_from_slice(record);
                write_record_count(&mut guard, count + 1);
                return Ok(RecordId::new(last.0, count as u16));
            }
        }

        let (page_id, mut guard) = self.buffer_pool.new_page()?;
        guard[0] = kind::HEAP_DATA;
        let pos = record_pos(self.record_len, 0);
        guard[pos..pos + self.record_len].copy_from_slice(record);
        write_record_count(&mut guard, 1);
        Ok(RecordId::new(page_id.0, 0))
    }

    /// Fetch one record by id.
    pub fn get(&self, rid: RecordId) -> Result<Vec<u8>> {
        let guard = self.buffer_pool.fetch_page(PageId(rid.page_number))?;
        if guard[0] != kind::HEAP_DATA || rid.slot_number as usize >= read_record_count(&guard) {
            bail!("No record at ({}, {})", rid.page_number, rid.slot_number);
        }
        let pos = record_pos(self.record_len, rid.slot_number as usize);
        Ok(guard[pos..pos + self.record_len].to_vec())
    }

    /// Scan all records in heap order.
    pub fn scan(&self) -> Result<RelationScanner> {
        RelationScanner::new(self.buffer_pool.clone(), self.record_len)
    }

    pub fn flush(&self) -> Result<()> {
        self.buffer_pool.flush_all()
    }
}
