pub type FrameId = u32;

/// Eviction policy seam for the buffer pool. Only unpinned frames are
/// candidates; the pool reports pin transitions, the policy picks victims.
pub trait Replacer: Send + Sync {
    /// Select a frame to evict. Returns None if no frame is evictable.
    fn evict(&mut self) -> Option<FrameId>;

    /// Mark a frame as pinned (not evictable).
    fn pin(&mut self, frame_id: FrameId);

    /// Mark a frame as unpinned (evictable).
    fn unpin(&mut self, frame_id: FrameId);

    /// Number of evictable frames.
    fn size(&self) -> usize;
}
