//! Allocator pool: one per size class, holding each capability's lock-free
//! `current` segment plus the shared `active`/`filled` CAS stacks
//! (spec.md §3, §4.1). Grounded in the teacher crate's
//! `policy::marksweepspace::native_ms::{BlockLists, MarkSweepSpace}`, which
//! plays the same role (per-bin current/abandoned block lists) for mimalloc
//! style size classes.

use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::RwLock;

use crate::segment::{Segment, SegmentMeta, SegmentStack};

pub type CapabilityId = usize;

/// A single capability's allocation cursor: the segment it is currently
/// bumping a pointer through. Stored as an `AtomicPtr` so a capability can
/// swap its own slot without contending with other capabilities (spec.md
/// §4.1: "Allocation is wait-free in the fast path ... lock-free against
/// other capabilities").
struct CurrentSlot(AtomicPtr<SegmentMeta>);

impl CurrentSlot {
    fn new(seg: Segment) -> Self {
        CurrentSlot(AtomicPtr::new(seg.0 as *const SegmentMeta as *mut SegmentMeta))
    }

    fn get(&self) -> Segment {
        let p = self.0.load(Ordering::Acquire);
        debug_assert!(!p.is_null(), "a capability's current segment is never null");
        Segment(unsafe { &*p })
    }

    fn set(&self, seg: Segment) {
        self.0
            .store(seg.0 as *const SegmentMeta as *mut SegmentMeta, Ordering::Release);
    }
}

pub struct AllocatorPool {
    pub size_class: usize,
    current: RwLock<Vec<CurrentSlot>>,
    pub active: SegmentStack,
    pub filled: SegmentStack,
}

impl AllocatorPool {
    pub fn new(size_class: usize, initial_caps: usize) -> Self {
        let current = (0..initial_caps)
            .map(|_| CurrentSlot::new(Segment::allocate_fresh(size_class)))
            .collect();
        AllocatorPool {
            size_class,
            current: RwLock::new(current),
            active: SegmentStack::new(),
            filled: SegmentStack::new(),
        }
    }

    /// Grow the per-capability `current` array. Per spec.md §6
    /// (`add_capabilities`), the caller guarantees no GC or mutator threads
    /// are running concurrently, so a plain write lock (rather than a
    /// wait-free path) is appropriate here.
    pub fn add_capabilities(&self, new_total: usize) {
        let mut slots = self.current.write().unwrap();
        while slots.len() < new_total {
            slots.push(CurrentSlot::new(Segment::allocate_fresh(self.size_class)));
        }
    }

    pub fn current(&self, cap: CapabilityId) -> Segment {
        self.current.read().unwrap()[cap].get()
    }

    pub fn set_current(&self, cap: CapabilityId, seg: Segment) {
        self.current.read().unwrap()[cap].set(seg);
    }

    /// Every segment this pool currently owns: all `current` segments, plus
    /// `active`, plus `filled`. Used by `prepare` (clearing bitmaps,
    /// snapshotting `next_free`) and by iteration-based invariant checks.
    pub fn all_current(&self) -> Vec<Segment> {
        self.current.read().unwrap().iter().map(|s| s.get()).collect()
    }

    /// Acquire a segment to become a capability's new `current`: first an
    /// abandoned-but-not-full segment from `active`, otherwise a segment
    /// handed back by the caller (the global free list or a freshly
    /// allocated one).
    pub fn take_active(&self) -> Option<Segment> {
        self.active.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_starts_with_one_current_segment_per_capability() {
        let pool = AllocatorPool::new(0, 4);
        for cap in 0..4 {
            let seg = pool.current(cap);
            assert_eq!(seg.next_free(), 0);
        }
    }

    #[test]
    fn add_capabilities_grows_without_disturbing_existing_slots() {
        let pool = AllocatorPool::new(0, 2);
        let before = pool.current(0);
        pool.add_capabilities(5);
        assert_eq!(pool.current(0), before);
        assert_eq!(pool.all_current().len(), 5);
    }
}
