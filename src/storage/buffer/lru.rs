use super::replacer::{FrameId, Replacer};
use std::collections::{HashSet, VecDeque};

/// Least-recently-unpinned eviction. The deque holds candidate victims in
/// unpin order; the set is the source of truth for evictability, so stale
/// deque entries (re-pinned frames) are skipped at evict time.
pub struct LruReplacer {
    order: VecDeque<FrameId>,
    evictable: HashSet<FrameId>,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            evictable: HashSet::with_capacity(capacity),
        }
    }
}

impl Replacer for LruReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        while let Some(frame_id) = self.order.pop_front() {
            if self.evictable.remove(&frame_id) {
                return Some(frame_id);
            }
        }
        None
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.evictable.remove(&frame_id);
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if self.evictable.insert(frame_id) {
            self.order.push_back(frame_id);
        }
    }

    fn size(&self) -> usize {
        self.evictable.len()
    }
}
