pub mod lru;
pub mod replacer;

use crate::storage::error::StorageError;
use crate::storage::page::PageId;
use crate::storage::{DiskManager, PAGE_SIZE};
use anyhow::Result;
use dashmap::DashMap;
use log::trace;
use parking_lot::{Mutex, RwLock};
use replacer::{FrameId, Replacer};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

struct Frame {
    data: Box<[u8; PAGE_SIZE]>,
    page_id: Option<PageId>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
            page_id: None,
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    fn reset(&mut self) {
        self.page_id = None;
        self.pin_count.store(0, Ordering::SeqCst);
        self.is_dirty.store(false, Ordering::SeqCst);
        self.data.fill(0);
    }
}

/// A pool of in-memory frames over one paged file. Pages are handed out as
/// guards: a guard pins its frame on construction and unpins it when dropped,
/// so a pin cannot outlive the scope that took it, on any exit path. Write
/// guards mark the frame dirty; read guards leave it as found.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    page_table: DashMap<PageId, FrameId>,
    frames: RwLock<HashMap<FrameId, Frame>>,
    replacer: Mutex<Box<dyn Replacer>>,
    disk: Mutex<DiskManager>,
    next_frame_id: AtomicU32,
    max_frames: usize,
}

impl BufferPool {
    pub fn new(disk: DiskManager, replacer: Box<dyn Replacer>, max_frames: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                page_table: DashMap::new(),
                frames: RwLock::new(HashMap::with_capacity(max_frames)),
                replacer: Mutex::new(replacer),
                disk: Mutex::new(disk),
                next_frame_id: AtomicU32::new(0),
                max_frames,
            }),
        }
    }

    /// Pin a page for reading.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageReadGuard> {
        let frame_id = self.pin_resident(page_id, false).map_or_else(
            || self.load_page(page_id, false),
            Ok,
        )?;

        let frames = self.inner.frames.read();
        let frame = frames.get(&frame_id).expect("pinned frame must exist");
        let data = frame.data.as_ref() as *const [u8; PAGE_SIZE];
        Ok(PageReadGuard {
            inner: self.inner.clone(),
            frame_id,
            data,
        })
    }

    /// Pin a page for writing. The frame is marked dirty up front.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard> {
        let frame_id = self.pin_resident(page_id, true).map_or_else(
            || self.load_page(page_id, true),
            Ok,
        )?;

        let mut frames = self.inner.frames.write();
        let frame = frames.get_mut(&frame_id).expect("pinned frame must exist");
        let data = frame.data.as_mut() as *mut [u8; PAGE_SIZE];
        drop(frames);
        Ok(PageWriteGuard {
            inner: self.inner.clone(),
            frame_id,
            data,
        })
    }

    /// Allocate a fresh page on disk and pin it for writing. The frame starts
    /// zeroed and dirty.
    pub fn new_page(&self) -> Result<(PageId, PageWriteGuard)> {
        let frame_id = self.acquire_frame()?;
        let page_id = self.inner.disk.lock().allocate_page()?;

        let mut frames = self.inner.frames.write();
        let frame = frames.get_mut(&frame_id).expect("acquired frame must exist");
        frame.reset();
        frame.page_id = Some(page_id);
        frame.pin_count.store(1, Ordering::SeqCst);
        frame.is_dirty.store(true, Ordering::SeqCst);
        let data = frame.data.as_mut() as *mut [u8; PAGE_SIZE];
        drop(frames);

        self.inner.page_table.insert(page_id, frame_id);
        self.inner.replacer.lock().pin(frame_id);

        Ok((
            page_id,
            PageWriteGuard {
                inner: self.inner.clone(),
                frame_id,
                data,
            },
        ))
    }

    /// Write one page back to disk if dirty. Does not sync.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        if let Some(frame_id) = self.inner.page_table.get(&page_id).map(|e| *e.value()) {
            let frames = self.inner.frames.read();
            if let Some(frame) = frames.get(&frame_id) {
                if frame.is_dirty.load(Ordering::SeqCst) {
                    self.inner.disk.lock().write_page(page_id, frame.data.as_ref())?;
                    frame.is_dirty.store(false, Ordering::SeqCst);
                }
            }
        }
        Ok(())
    }

    /// Write every dirty frame back and sync the file.
    pub fn flush_all(&self) -> Result<()> {
        {
            let frames = self.inner.frames.read();
            let mut disk = self.inner.disk.lock();
            for frame in frames.values() {
                if let Some(page_id) = frame.page_id {
                    if frame.is_dirty.load(Ordering::SeqCst) {
                        disk.write_page(page_id, frame.data.as_ref())?;
                        frame.is_dirty.store(false, Ordering::SeqCst);
                    }
                }
            }
        }
        self.inner.disk.lock().sync()
    }

    /// Number of frames currently pinned by at least one guard.
    pub fn pinned_frames(&self) -> usize {
        let frames = self.inner.frames.read();
        frames
            .values()
            .filter(|f| f.pin_count.load(Ordering::SeqCst) > 0)
            .count()
    }

    /// Number of pages in the backing file.
    pub fn num_pages(&self) -> Result<u32> {
        self.inner.disk.lock().num_pages()
    }

    /// Pin `page_id` if it is already resident; returns its frame id.
    fn pin_resident(&self, page_id: PageId, dirty: bool) -> Option<FrameId> {
        let frame_id = *self.inner.page_table.get(&page_id)?.value();
        let frames = self.inner.frames.read();
        let frame = frames.get(&frame_id)?;
        frame.pin_count.fetch_add(1, Ordering::SeqCst);
        if dirty {
            frame.is_dirty.store(true, Ordering::SeqCst);
        }
        self.inner.replacer.lock().pin(frame_id);
        Some(frame_id)
    }

    /// Bring a non-resident page in from disk, pinned once.
    fn load_page(&self, page_id: PageId, dirty: bool) -> Result<FrameId> {
        let frame_id = self.acquire_frame()?;

        {
            let mut disk = self.inner.disk.lock();
            let mut frames = self.inner.frames.write();
            let frame = frames.get_mut(&frame_id).expect("acquired frame must exist");
            disk.read_page(page_id, frame.data.as_mut())?;
            frame.page_id = Some(page_id);
            frame.pin_count.store(1, Ordering::SeqCst);
            frame.is_dirty.store(dirty, Ordering::SeqCst);
        }

        self.inner.page_table.insert(page_id, frame_id);
        self.inner.replacer.lock().pin(frame_id);
        Ok(frame_id)
    }

    /// Find a frame to (re)use: grow the pool while under its limit,
    /// otherwise evict an unpinned frame, writing it back first if dirty.
    fn acquire_frame(&self) -> Result<FrameId> {
        {
            let mut frames = self.inner.frames.write();
            if frames.len() < self.inner.max_frames {
                let frame_id = self.inner.next_frame_id.fetch_add(1, Ordering::SeqCst);
                frames.insert(frame_id, Frame::new());
                return Ok(frame_id);
            }
        }

        let victim = self
            .inner
            .replacer
            .lock()
            .evict()
            .ok_or(StorageError::BufferPoolFull)?;

        let (old_page_id, is_dirty, data) = {
            let frames = self.inner.frames.read();
            match frames.get(&victim) {
                Some(frame) => (
                    frame.page_id,
                    frame.is_dirty.load(Ordering::SeqCst),
                    frame.data.clone(),
                ),
                None => return Ok(victim),
            }
        };

        if let Some(page_id) = old_page_id {
            if is_dirty {
                trace!("evicting dirty page {}, writing back", page_id);
                self.inner.disk.lock().write_page(page_id, data.as_ref())?;
            }
            self.inner.page_table.remove(&page_id);
        }

        let mut frames = self.inner.frames.write();
        if let Some(frame) = frames.get_mut(&victim) {
            frame.reset();
        }
        Ok(victim)
    }
}

fn release_pin(inner: &Arc<PoolInner>, frame_id: FrameId) {
    let last_pin = {
        let frames = inner.frames.read();
        match frames.get(&frame_id) {
            Some(frame) => frame.pin_count.fetch_sub(1, Ordering::SeqCst) == 1,
            None => false,
        }
    };
    if last_pin {
        inner.replacer.lock().unpin(frame_id);
    }
}

pub struct PageReadGuard {
    inner: Arc<PoolInner>,
    frame_id: FrameId,
    data: *const [u8; PAGE_SIZE],
}

impl Deref for PageReadGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.data }
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        release_pin(&self.inner, self.frame_id);
    }
}

pub struct PageWriteGuard {
    inner: Arc<PoolInner>,
    frame_id: FrameId,
    data: *mut [u8; PAGE_SIZE],
}

impl std::fmt::Debug for PageWriteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageWriteGuard").finish()
    }
}

impl Deref for PageWriteGuard {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.data }
    }
}

impl DerefMut for PageWriteGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.data }
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        release_pin(&self.inner, self.frame_id);
    }
}

unsafe impl Send for PageReadGuard {}
unsafe impl Sync for PageReadGuard {}
unsafe impl Send for PageWriteGuard {}
unsafe impl Sync for PageWriteGuard {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_pool(max_frames: usize) -> Result<BufferPool> {
        let dir = tempdir()?;
        let disk = DiskManager::create(&dir.path().join("pool.idx"))?;
        let replacer = Box::new(lru::LruReplacer::new(max_frames));
        Ok(BufferPool::new(disk, replacer, max_frames))
    }

    #[test]
    fn test_new_page_then_fetch() -> Result<()> {
        let pool = test_pool(8)?;

        let (page_id, mut guard) = pool.new_page()?;
        assert_eq!(page_id, PageId(0));
        guard[0] = 42;
        guard[PAGE_SIZE - 1] = 43;
        drop(guard);

        let guard = pool.fetch_page(page_id)?;
        assert_eq!(guard[0], 42);
        assert_eq!(guard[PAGE_SIZE - 1], 43);

        Ok(())
    }

    #[test]
    fn test_write_guard_persists() -> Result<()> {
        let pool = test_pool(8)?;

        let (page_id, mut guard) = pool.new_page()?;
        guard[10] = 1;
        drop(guard);

        let mut guard = pool.fetch_page_write(page_id)?;
        guard[10] = 2;
        drop(guard);

        let guard = pool.fetch_page(page_id)?;
        assert_eq!(guard[10], 2);

        Ok(())
    }

    #[test]
    fn test_eviction_writes_back() -> Result<()> {
        let pool = test_pool(2)?;

        for i in 0..3u8 {
            let (page_id, mut guard) = pool.new_page()?;
            assert_eq!(page_id.0, i as u32);
            guard[0] = i + 1;
        }

        // Three pages through a two-frame pool: the first two were evicted
        // and must come back from disk intact.
        for i in 0..3u8 {
            let guard = pool.fetch_page(PageId(i as u32))?;
            assert_eq!(guard[0], i + 1);
        }

        Ok(())
    }

    #[test]
    fn test_pinned_frame_is_not_evicted() -> Result<()> {
        let pool = test_pool(2)?;

        let (page_a, mut guard_a) = pool.new_page()?;
        guard_a[0] = 1;
        drop(guard_a);

        let (_page_b, guard_b) = pool.new_page()?;

        // Only page_a is evictable; this allocation must reclaim its frame.
        let (_page_c, guard_c) = pool.new_page()?;
        drop(guard_c);
        drop(guard_b);

        let guard_a = pool.fetch_page(page_a)?;
        assert_eq!(guard_a[0], 1);

        Ok(())
    }

    #[test]
    fn test_all_pinned_fails() -> Result<()> {
        let pool = test_pool(2)?;

        let (_p1, _g1) = pool.new_page()?;
        let (_p2, _g2) = pool.new_page()?;

        let err = pool.new_page().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::BufferPoolFull)
        ));

        Ok(())
    }

    #[test]
    fn test_pinned_frames_balance() -> Result<()> {
        let pool = test_pool(8)?;

        assert_eq!(pool.pinned_frames(), 0);
        let (page_id, guard) = pool.new_page()?;
        assert_eq!(pool.pinned_frames(), 1);
        let second = pool.fetch_page(page_id)?;
        assert_eq!(pool.pinned_frames(), 1);
        drop(guard);
        assert_eq!(pool.pinned_frames(), 1);
        drop(second);
        assert_eq!(pool.pinned_frames(), 0);

        Ok(())
    }

    #[test]
    fn test_flush_all_clears_dirty() -> Result<()> {
        let pool = test_pool(4)?;

        let (page_id, mut guard) = pool.new_page()?;
        guard[0] = 99;
        drop(guard);

        pool.flush_all()?;

        // After a flush the page must survive eviction without a write-back.
        pool.flush_page(page_id)?;
        let guard = pool.fetch_page(page_id)?;
        assert_eq!(guard[0], 99);

        Ok(())
    }
}
