use crate::storage::error::StorageError;
use crate::storage::page::PageId;
use anyhow::{Context, Result, bail};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const PAGE_SIZE: usize = 4096;

/// Page-granular file I/O. One `DiskManager` owns one index or relation file;
/// all callers go through the buffer pool, which serializes access.
pub struct DiskManager {
    file: File,
}

impl std::fmt::Debug for DiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskManager").finish()
    }
}

impl DiskManager {
    /// Create a new (empty) paged file, truncating any existing one.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create paged file: {:?}", path))?;

        Ok(Self { file })
    }

    /// Open an existing paged file. A missing file surfaces as an error whose
    /// root cause is `std::io::ErrorKind::NotFound`, which the index lifecycle
    /// inspects to decide between its open and create paths.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open paged file: {:?}", path))?;

        Ok(Self { file })
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        if buf.len() != PAGE_SIZE {
            bail!("Read buffer must be PAGE_SIZE ({}), got {}", PAGE_SIZE, buf.len());
        }

        let offset = Self::page_offset(page_id);
        if offset >= self.file.metadata()?.len() {
            return Err(StorageError::PageNotFound(page_id).into());
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .context("Failed to seek")?;
        self.file
            .read_exact(buf)
            .with_context(|| format!("Failed to read page {}", page_id))?;

        Ok(())
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != PAGE_SIZE {
            bail!("Page data must be PAGE_SIZE ({}), got {}", PAGE_SIZE, data.len());
        }

        let offset = Self::page_offset(page_id);
        let file_size = self.file.metadata()?.len();
        if offset >= file_size {
            self.file
                .set_len(offset + PAGE_SIZE as u64)
                .context("Failed to extend file")?;
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .context("Failed to seek")?;
        self.file
            .write_all(data)
            .with_context(|| format!("Failed to write page {}", page_id))?;

        Ok(())
    }

    /// Extend the file by one page and return the new page's id.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let page_id = PageId(self.num_pages()?);
        self.file
            .set_len((page_id.0 as u64 + 1) * PAGE_SIZE as u64)
            .context("Failed to extend file")?;
        Ok(page_id)
    }

    pub fn num_pages(&self) -> Result<u32> {
        Ok((self.file.metadata()?.len() / PAGE_SIZE as u64) as u32)
    }

    /// Force all written pages to stable storage. Called from
    /// `BufferPool::flush_all`; individual `write_page` calls do not sync.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().context("Failed to sync paged file")
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id.0 as u64 * PAGE_SIZE as u64
    }
}
