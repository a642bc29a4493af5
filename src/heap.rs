//! Heap state (spec.md §3): the segmented allocator's global pools plus the
//! large-object lists that the §4.8 sweep also has to reconcile. Grounded
//! in the teacher crate's `MarkSweepSpace` (`policy::marksweepspace::native_ms::global`)
//! for the pool/abandoned-list shape, and in `NonMoving.c`'s
//! `nonmoving_heap`/`nonmoving_large_objects` globals for the free-list
//! high-water mark and large-object bookkeeping.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::pool::{AllocatorPool, CapabilityId};
use crate::segment::{Segment, SegmentStack};
use crate::util::address::Address;
use crate::util::constants::{max_free, size_class_of, ALLOCA_CNT};
use crate::util::error::fatal;

/// A large object is tracked by its own descriptor rather than a bitmap
/// (spec.md §3, §4.7): cheaper for the rare big allocation, at the cost of
/// needing a mutex around the `MARKED` transition (spec.md §5).
pub struct LargeObjectDescriptor {
    pub address: Address,
    marked: bool,
    sweeping: bool,
}

impl LargeObjectDescriptor {
    pub fn new(address: Address) -> Self {
        LargeObjectDescriptor {
            address,
            marked: false,
            sweeping: false,
        }
    }
}

/// Large-object lists, behind one mutex (spec.md §3 `large_objects_mutex`).
/// `live_snapshot` holds objects present at the start of mark (candidates
/// for sweeping); `marked` accumulates objects reached during this cycle;
/// `incoming` holds objects registered (by the young-generation promotion
/// path) after prepare, which are implicitly live this cycle.
pub struct LargeObjectSet {
    inner: Mutex<LargeObjectSetInner>,
}

struct LargeObjectSetInner {
    live_snapshot: Vec<LargeObjectDescriptor>,
    marked: Vec<Address>,
    incoming: Vec<LargeObjectDescriptor>,
}

impl LargeObjectSet {
    pub fn new() -> Self {
        LargeObjectSet {
            inner: Mutex::new(LargeObjectSetInner {
                live_snapshot: Vec::new(),
                marked: Vec::new(),
                incoming: Vec::new(),
            }),
        }
    }

    /// Register a large object allocated by the (external) large-object
    /// allocator. Objects registered after `prepare` are implicitly live
    /// this cycle, the large-object analogue of `next_free_snap`.
    pub fn register(&self, address: Address) {
        let mut inner = self.inner.lock().unwrap();
        inner.incoming.push(LargeObjectDescriptor::new(address));
    }

    /// `prepare` step: steal the young generation's large-object list and
    /// mark every live-snapshot descriptor as `SWEEPING` (spec.md §2 step 1,
    /// §3 invariant 4).
    pub fn prepare(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.marked.clear();
        let incoming = std::mem::take(&mut inner.incoming);
        inner.live_snapshot.extend(incoming);
        // Unlike a segment's `next_free_snap` cutoff, a large object gets no
        // "allocated after prepare, implicitly live" exemption: every large
        // object in scope this cycle, whether carried over or just promoted
        // via `register`, is marked `sweeping` and must be traced to
        // survive (mirrors `BF_NONMOVING_SWEEPING` being set uniformly
        // across both groups in the original's `nonmoving_prepare_mark`).
        for d in inner.live_snapshot.iter_mut() {
            d.sweeping = true;
            d.marked = false;
        }
    }

    /// Mark transition `MARKED ∉ flags → MARKED ∈ flags`, performed under
    /// the large-object mutex (spec.md §3 invariant 4). Returns `true` if
    /// this call performed the transition (i.e. the object was previously
    /// unmarked), mirroring the mark engine's "discard if already marked"
    /// dedup rule for segmented objects.
    pub fn mark(&self, address: Address) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if let Some(d) = inner
            .live_snapshot
            .iter_mut()
            .find(|d| d.address == address)
        {
            if d.marked {
                return false;
            }
            d.marked = true;
        } else {
            // Not present in the snapshot: either a non-large pointer was
            // misrouted here, or the object was allocated after prepare and
            // is implicitly live; either way there is nothing to mark.
            return false;
        }
        inner.marked.push(address);
        true
    }

    pub fn is_alive(&self, address: Address) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.live_snapshot.iter().find(|d| d.address == address) {
            Some(d) => !d.sweeping || d.marked,
            None => true, // not in snapshot: allocated after prepare, implicitly live
        }
    }

    /// Is `address` a large object this set actually knows about, in either
    /// the current cycle's snapshot or next cycle's incoming list? Used by
    /// the mark engine to tell a genuine large object apart from a pointer
    /// that wrongly claims non-moving heap membership (spec.md §7.1).
    pub fn is_registered(&self, address: Address) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.live_snapshot.iter().any(|d| d.address == address) || inner.incoming.iter().any(|d| d.address == address)
    }

    /// `sweep_large_objects()` (spec.md §4.8): the marked set becomes the
    /// new live snapshot; everything else is dropped (reclaimed by its
    /// external block descriptor's owner).
    pub fn sweep(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let marked = std::mem::take(&mut inner.marked);
        let reclaimed = inner.live_snapshot.len() - marked.len().min(inner.live_snapshot.len());
        inner.live_snapshot = marked
            .into_iter()
            .map(LargeObjectDescriptor::new)
            .collect();
        reclaimed
    }
}

impl Default for LargeObjectSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Top-level allocator/heap state (spec.md §3): one `AllocatorPool` per
/// size class, a bounded global free-segment pool partitioned by size
/// class (see DESIGN.md for why this crate partitions `free` by class
/// rather than keeping one class-agnostic list), and the large-object
/// lists.
pub struct Heap {
    pools: Vec<AllocatorPool>,
    free: Vec<SegmentStack>,
    n_free: AtomicUsize,
    max_free: usize,
    pub sweep_list: SegmentStack,
    pub large_objects: LargeObjectSet,
    /// Serializes requests to the underlying block allocator
    /// (spec.md §5: "Storage-manager lock is acquired for block-group
    /// allocation and free").
    storage_lock: spin::Mutex<()>,
    capabilities: AtomicUsize,
}

impl Heap {
    pub fn new(initial_caps: usize) -> Self {
        Heap {
            pools: (0..ALLOCA_CNT)
                .map(|sc| AllocatorPool::new(sc, initial_caps))
                .collect(),
            free: (0..ALLOCA_CNT).map(|_| SegmentStack::new()).collect(),
            n_free: AtomicUsize::new(0),
            max_free: max_free(),
            sweep_list: SegmentStack::new(),
            large_objects: LargeObjectSet::new(),
            storage_lock: spin::Mutex::new(()),
            capabilities: AtomicUsize::new(initial_caps),
        }
    }

    pub fn capabilities(&self) -> usize {
        self.capabilities.load(Ordering::Acquire)
    }

    /// `add_capabilities(n)` (spec.md §6): caller guarantees no GC or
    /// mutators run concurrently.
    pub fn add_capabilities(&self, new_total: usize) {
        for pool in &self.pools {
            pool.add_capabilities(new_total);
        }
        self.capabilities.store(new_total, Ordering::Release);
    }

    pub fn pool(&self, size_class: usize) -> &AllocatorPool {
        &self.pools[size_class]
    }

    pub fn pools(&self) -> &[AllocatorPool] {
        &self.pools
    }

    /// Return a segment to the global free pool (spec.md §4.8 FREE
    /// classification), respecting `MAX_FREE` by handing the segment's
    /// storage back to the block allocator instead once the high-water
    /// mark is exceeded (spec.md §3, §9; `nonmoving_push_free_segment`).
    pub fn push_free_segment(&self, seg: Segment, size_class: usize) {
        if self.n_free.load(Ordering::Acquire) >= self.max_free {
            self.release_to_block_allocator(seg);
            return;
        }
        self.free[size_class].push(seg);
        self.n_free.fetch_add(1, Ordering::AcqRel);
    }

    fn pop_free_segment(&self, size_class: usize) -> Option<Segment> {
        let seg = self.free[size_class].pop()?;
        self.n_free.fetch_sub(1, Ordering::AcqRel);
        Some(seg)
    }

    pub fn n_free(&self) -> usize {
        self.n_free.load(Ordering::Acquire)
    }

    /// Hand a segment's storage back to the underlying block allocator.
    /// This crate models "the underlying block allocator" with the process
    /// allocator directly (spec.md §1 treats it as an external
    /// collaborator); since `SegmentMeta` values are otherwise leaked for
    /// the process lifetime (see segment.rs), releasing here means the
    /// segment is simply dropped from every list and never reused, which
    /// satisfies the observable contract (`n_free` accounting, no further
    /// allocation from it) without requiring unsafe deallocation.
    fn release_to_block_allocator(&self, _seg: Segment) {
        log::trace!("releasing segment to the underlying block allocator");
    }

    /// Acquire a segment for `pool` to install as a capability's new
    /// `current`: first an abandoned-but-not-full `active` segment, then
    /// the global free pool, finally a fresh aligned group from the block
    /// allocator (spec.md §4.1 steps 2-3).
    pub fn acquire_segment(&self, size_class: usize) -> Segment {
        let pool = self.pool(size_class);
        if let Some(seg) = pool.take_active() {
            return seg;
        }
        if let Some(seg) = self.pop_free_segment(size_class) {
            seg.reinit();
            return seg;
        }
        let _guard = self.storage_lock.lock();
        Segment::allocate_fresh(size_class)
    }

    /// `allocate(cap, word_size)` (spec.md §4.1).
    pub fn allocate(&self, cap: CapabilityId, word_size: usize) -> Address {
        const WORD_BYTES: usize = std::mem::size_of::<usize>();
        let size_class = size_class_of(word_size * WORD_BYTES);
        if size_class >= ALLOCA_CNT {
            fatal("oversize object reached the segmented allocator fast path; large objects must be routed to the external large-object allocator");
        }
        let pool = self.pool(size_class);
        let current = pool.current(cap);
        let idx = current.next_free();
        let addr = current.block_address(idx);
        debug_assert_eq!(addr.as_usize() & 0b111, 0, "allocation must be word aligned");

        if !current.is_on_todo_list() {
            current.mark_dirty_for_scavenge();
        }

        if current.advance_next_free() {
            pool.filled.push(current);
            let new_current = self.acquire_segment(size_class);
            new_current.set_link(None);
            pool.set_current(cap, new_current);
        }
        addr
    }

    /// `prepare()` step of one major cycle (spec.md §2 step 1, §4.2):
    /// clear bitmaps of segments written by mutators since the last sweep
    /// (i.e. the `filled` lists — `current`/`active` segments were either
    /// written only by the collector or cleared at their last sweep), then
    /// snapshot every live segment's `next_free`.
    pub fn prepare(&self) {
        for pool in &self.pools {
            for seg in pool.filled.iter() {
                seg.clear_bitmap();
                seg.snapshot_next_free();
            }
            for seg in pool.all_current() {
                seg.snapshot_next_free();
            }
            // Active segments were swept (and their bitmaps cleared for the
            // unmarked suffix) since the last cycle and have seen no
            // allocation since, so only their snapshot pointer needs
            // refreshing.
            for seg in pool.active.iter() {
                seg.snapshot_next_free();
            }
        }
        self.large_objects.prepare();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_advances_within_one_segment() {
        let heap = Heap::new(1);
        let a = heap.allocate(0, 2); // 16 bytes -> size class 0
        let b = heap.allocate(0, 2);
        assert_ne!(a, b);
    }

    #[test]
    fn allocate_rolls_over_a_full_segment() {
        let heap = Heap::new(1);
        let size_class = 0;
        let block_count = heap.pool(size_class).current(0).block_count();
        for _ in 0..block_count {
            heap.allocate(0, 2);
        }
        // The segment is now full and has been pushed to `filled`; the next
        // allocation must come from a brand-new current segment.
        assert!(!heap.pool(size_class).filled.is_empty());
        let fresh = heap.pool(size_class).current(0);
        assert_eq!(fresh.next_free(), 0);
    }

    #[test]
    fn free_segments_respect_the_high_water_mark() {
        let heap = Heap::new(1);
        for _ in 0..(max_free() + 5) {
            let seg = crate::segment::Segment::allocate_fresh(0);
            heap.push_free_segment(seg, 0);
        }
        assert!(heap.n_free() <= max_free());
    }
}
