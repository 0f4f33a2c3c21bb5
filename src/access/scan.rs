//! Sequential scanning over a relation heap, used to feed bulk loads.

use crate::access::heap::{read_record_count, record_pos};
use crate::access::rid::RecordId;
use crate::storage::BufferPool;
use crate::storage::page::PageId;
use anyhow::Result;

/// Iterates every record of a relation in heap order as
/// `(RecordId, record bytes)`. End of relation is iterator exhaustion.
pub struct RelationScanner {
    buffer_pool: BufferPool,
    record_len: usize,
    num_pages: u32,
    current_page: u32,
    current_slot: usize,
}

impl RelationScanner {
    pub(crate) fn new(buffer_pool: BufferPool, record_len: usize) -> Result<Self> {
        let num_pages = buffer_pool.num_pages()?;
        Ok(Self {
            buffer_pool,
            record_len,
            num_pages,
            current_page: 1, // page 0 is the heap meta page
            current_slot: 0,
        })
    }

    fn try_next(&mut self) -> Result<Option<(RecordId, Vec<u8>)>> {
        while self.current_page < self.num_pages {
            let guard = self.buffer_pool.fetch_page(PageId(self.current_page))?;
            if self.current_slot < read_record_count(&guard) {
                let slot = self.current_slot;
                self.current_slot += 1;
                let pos = record_pos(self.record_len, slot);
                let record = guard[pos..pos + self.record_len].to_vec();
                return Ok(Some((
                    RecordId::new(self.current_page, slot as u16),
                    record,
                )));
            }
            self.current_page += 1;
            self.current_slot = 0;
        }
        Ok(None)
    }
}

impl Iterator for RelationScanner {
    type Item = Result<(RecordId, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.try_next().transpose()
    }
}
