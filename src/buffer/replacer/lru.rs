//! LRU (Least Recently Used) replacement policy.

use std::collections::{BTreeMap, HashMap};

use crate::common::FrameId;

/// Evicts the unpinned frame whose last access is oldest.
///
/// Every access takes a stamp from a monotonic counter. Evictable frames are
/// indexed by stamp, so picking a victim is `O(log n)`.
#[derive(Debug, Default)]
pub struct LruReplacer {
    /// Next access stamp.
    clock: u64,
    /// Last access stamp of every tracked frame.
    stamps: HashMap<FrameId, u64>,
    /// Evictable frames ordered by stamp (first = least recently used).
    evictable: BTreeMap<u64, FrameId>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a frame was accessed, making it most recently used.
    pub fn record_access(&mut self, frame_id: FrameId) {
        self.clock += 1;
        let stamp = self.clock;
        if let Some(old) = self.stamps.insert(frame_id, stamp) {
            if self.evictable.remove(&old).is_some() {
                self.evictable.insert(stamp, frame_id);
            }
        }
    }

    /// Mark a tracked frame as evictable (pin count dropped to 0) or not.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        let Some(&stamp) = self.stamps.get(&frame_id) else {
            return;
        };
        if evictable {
            self.evictable.insert(stamp, frame_id);
        } else {
            self.evictable.remove(&stamp);
        }
    }

    /// Select and forget the least recently used evictable frame.
    pub fn evict(&mut self) -> Option<FrameId> {
        let (_, frame_id) = self.evictable.pop_first()?;
        self.stamps.remove(&frame_id);
        Some(frame_id)
    }

    /// Stop tracking a frame.
    pub fn remove(&mut self, frame_id: FrameId) {
        if let Some(stamp) = self.stamps.remove(&frame_id) {
            self.evictable.remove(&stamp);
        }
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.evictable.len()
    }
}
