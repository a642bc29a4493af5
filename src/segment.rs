//! Segment & Bitmap (spec.md §3, §4.2).
//!
//! A segment is a `SEGMENT_SIZE`-byte, `SEGMENT_SIZE`-aligned region holding
//! blocks of one size class. Grounded in the teacher crate's
//! `policy::marksweepspace::native_ms::Block` (a self-aligned region handle
//! wrapping a `NonZeroUsize`) and `util::heap::chunk_map::ChunkMap` (the
//! global side table mapping an aligned region's base address back to its
//! metadata) — here adapted so the mark bitmap lives in an ordinary
//! heap-allocated side array rather than embedded in the segment's own
//! self-aligned memory (see DESIGN.md for the rationale).

use std::alloc::{alloc, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicU8, AtomicUsize, Ordering};
use std::sync::RwLock;

use crate::util::address::Address;
use crate::util::constants::{block_size_for, SEGMENT_SIZE};
use crate::util::error::{fatal, GcError};

/// The process-wide mark epoch: alternates between `1` and `2` across
/// cycles. `0` always means "unmarked" (spec.md §3).
pub struct MarkEpoch(AtomicU8);

impl MarkEpoch {
    pub const fn new() -> Self {
        MarkEpoch(AtomicU8::new(1))
    }

    #[inline]
    pub fn current(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }

    /// Flip to the other non-zero value.
    pub fn rotate(&self) -> u8 {
        let prev = self.0.load(Ordering::Acquire);
        let next = if prev == 1 { 2 } else { 1 };
        self.0.store(next, Ordering::Release);
        next
    }
}

impl Default for MarkEpoch {
    fn default() -> Self {
        Self::new()
    }
}

/// Sentinel for `todo_link`: owned by the (out-of-scope) young-generation
/// scavenger. `0` means "not on the scavenger's todo list"; any non-zero
/// value is collaborator-defined (spec.md §9 Open Questions).
pub const TODO_LINK_NOT_QUEUED: usize = 0;
pub const TODO_LINK_SENTINEL: usize = 1;

/// Backing metadata for one segment. Segments are never freed back to the
/// process allocator by this crate directly — they are either recycled onto
/// a free list or handed to the external block allocator collaborator
/// (spec.md §4.1), so `SegmentMeta` values are leaked (`Box::leak`) and
/// referenced for the remaining lifetime of the process, matching the
/// non-moving region's own lifetime.
pub struct SegmentMeta {
    /// Base address of the self-aligned raw block storage.
    blocks_base: Address,
    block_size_log2: u8,
    block_count: usize,
    /// Per-block mark byte. Lives alongside (not inside) the raw block
    /// storage; see module docs.
    bitmap: Box<[AtomicU8]>,
    /// Index of the first free block for mutator allocation.
    next_free: AtomicUsize,
    /// Snapshot of `next_free` taken at the start of the current mark cycle.
    /// Blocks at or beyond this index are implicitly live (spec.md §3, §4.7).
    next_free_snap: AtomicUsize,
    /// Intrusive next-pointer: a segment is on exactly one of
    /// free/active/filled/sweep/current at a time (spec.md §3 invariant 1).
    link: AtomicPtr<SegmentMeta>,
    /// Scavenger collaborator sentinel (spec.md §9).
    todo_link: AtomicUsize,
}

/// A `Copy` handle to a segment's metadata, in the spirit of the teacher
/// crate's `Block(NonZeroUsize)` handle.
#[derive(Clone, Copy)]
pub struct Segment(pub &'static SegmentMeta);

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Segment({:?})", self.0.blocks_base)
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}
impl Eq for Segment {}

impl Segment {
    /// Allocate a fresh, self-aligned segment for `size_class`. This is the
    /// collector's one call into the "underlying block allocator"
    /// collaborator mentioned in spec.md §1; on this machine we model that
    /// collaborator with the process allocator directly, matching the
    /// teacher crate's own use of `std::alloc` under its page resource.
    ///
    /// Resource exhaustion here is fatal per spec.md §7.2 ("no degraded
    /// mode"), but the fallible boundary itself is typed (`request_group`
    /// returns a `Result`) rather than panicking inline, matching the
    /// teacher crate's own `FreeListPageResource`-style acquire path.
    pub fn allocate_fresh(size_class: usize) -> Segment {
        let ptr = Self::request_group().unwrap_or_else(|e| fatal(e));
        let blocks_base = Address::from_ptr(ptr.as_ptr());
        let block_size = block_size_for(size_class);
        let block_count = SEGMENT_SIZE / block_size;
        let bitmap = (0..block_count)
            .map(|_| AtomicU8::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let meta = SegmentMeta {
            blocks_base,
            block_size_log2: (crate::util::constants::MIN_LOG2 + size_class) as u8,
            block_count,
            bitmap,
            next_free: AtomicUsize::new(0),
            next_free_snap: AtomicUsize::new(0),
            link: AtomicPtr::new(std::ptr::null_mut()),
            todo_link: AtomicUsize::new(TODO_LINK_NOT_QUEUED),
        };
        let leaked: &'static SegmentMeta = Box::leak(Box::new(meta));
        SegmentMap::global().register(leaked);
        Segment(leaked)
    }

    /// Request a fresh, `SEGMENT_SIZE`-aligned group of memory from the
    /// underlying block allocator. The one seam in the allocator where
    /// failure is expressed as a typed `Result` rather than an inline panic
    /// (spec.md §7.2).
    fn request_group() -> Result<NonNull<u8>, GcError> {
        let layout = Layout::from_size_align(SEGMENT_SIZE, SEGMENT_SIZE)
            .unwrap_or_else(|e| fatal(format!("bad segment layout: {e}")));
        let ptr = unsafe { alloc(layout) };
        NonNull::new(ptr).ok_or(GcError::SegmentAllocationFailed {
            requested_bytes: SEGMENT_SIZE,
            align: SEGMENT_SIZE,
        })
    }

    #[inline]
    pub fn start(&self) -> Address {
        self.0.blocks_base
    }

    #[inline]
    pub fn block_size_log2(&self) -> u8 {
        self.0.block_size_log2
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        1usize << self.0.block_size_log2
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.0.block_count
    }

    #[inline]
    pub fn block_address(&self, index: usize) -> Address {
        debug_assert!(index < self.block_count());
        self.start() + index * self.block_size()
    }

    /// `block_index(p) = (p & (SEGMENT_SIZE-1)) >> block_size_log2` per
    /// spec.md §3, computed here as an offset from the segment's (already
    /// self-aligned) base, which is equivalent for any `p` inside the
    /// segment.
    #[inline]
    pub fn block_index_of(&self, p: Address) -> usize {
        (p - self.start()) >> self.block_size_log2() as usize
    }

    #[inline]
    pub fn next_free(&self) -> usize {
        self.0.next_free.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_next_free(&self, v: usize) {
        self.0.next_free.store(v, Ordering::Release);
    }

    #[inline]
    pub fn next_free_snap(&self) -> usize {
        self.0.next_free_snap.load(Ordering::Acquire)
    }

    /// Snapshot `next_free` into `next_free_snap`. Called only during the
    /// short stop-the-world `prepare` step (spec.md §2 step 1), so plain
    /// store ordering suffices; the value is published to the concurrent
    /// mark worker and mutators via the subsequent mutator release.
    pub fn snapshot_next_free(&self) {
        let v = self.next_free();
        self.0.next_free_snap.store(v, Ordering::Release);
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.next_free() >= self.block_count()
    }

    /// Advance `next_free` to the next unmarked block index, or to
    /// `block_count()` if none remain. Returns `true` if the segment is now
    /// full. Mirrors `advance_next_free` in the original source.
    pub fn advance_next_free(&self) -> bool {
        let count = self.block_count();
        let mut i = self.next_free() + 1;
        while i < count {
            if self.bit(i) == 0 {
                self.set_next_free(i);
                return false;
            }
            i += 1;
        }
        self.set_next_free(count);
        true
    }

    #[inline]
    pub fn bit(&self, index: usize) -> u8 {
        self.0.bitmap[index].load(Ordering::Acquire)
    }

    #[inline]
    pub fn mark_bit(&self, index: usize, epoch: u8) {
        self.0.bitmap[index].store(epoch, Ordering::Release);
    }

    #[inline]
    pub fn is_marked(&self, index: usize, epoch: u8) -> bool {
        self.bit(index) == epoch
    }

    /// Clear every cell in this segment's bitmap (spec.md §4.2: required for
    /// filled segments at `prepare`, since they were last written by the
    /// mutator; active/current segments never need this).
    pub fn clear_bitmap(&self) {
        for cell in self.0.bitmap.iter() {
            cell.store(0, Ordering::Release);
        }
    }

    #[inline]
    pub fn link(&self) -> Option<Segment> {
        let p = self.0.link.load(Ordering::Acquire);
        if p.is_null() {
            None
        } else {
            Some(Segment(unsafe { &*p }))
        }
    }

    #[inline]
    pub fn set_link(&self, next: Option<Segment>) {
        let p = next.map_or(std::ptr::null_mut(), |s| {
            s.0 as *const SegmentMeta as *mut SegmentMeta
        });
        self.0.link.store(p, Ordering::Release);
    }

    #[inline]
    fn link_raw(&self) -> *mut SegmentMeta {
        self.0.link.load(Ordering::Acquire)
    }

    #[inline]
    fn cas_link(&self, expected: *mut SegmentMeta, new: *mut SegmentMeta) -> bool {
        self.0
            .link
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    fn as_raw(&self) -> *mut SegmentMeta {
        self.0 as *const SegmentMeta as *mut SegmentMeta
    }

    /// Is this segment queued on the scavenger's todo list? (spec.md §9;
    /// the scavenger itself is an external collaborator, so this crate only
    /// exposes the sentinel, it never clears it on its own initiative.)
    pub fn is_on_todo_list(&self) -> bool {
        self.0.todo_link.load(Ordering::Acquire) != TODO_LINK_NOT_QUEUED
    }

    /// Reset a segment popped off the global free list back to a clean
    /// slate before it becomes someone's `current` (mirrors
    /// `nonmoving_init_segment` in the original source, minus the
    /// size-class byte, which this crate's free lists are already
    /// partitioned by — see DESIGN.md).
    pub fn reinit(&self) {
        self.set_next_free(0);
        self.0.next_free_snap.store(0, Ordering::Release);
        self.clear_bitmap();
        self.0.todo_link.store(TODO_LINK_NOT_QUEUED, Ordering::Release);
        self.set_link(None);
    }

    pub fn mark_dirty_for_scavenge(&self) {
        self.0
            .todo_link
            .compare_exchange(
                TODO_LINK_NOT_QUEUED,
                TODO_LINK_SENTINEL,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok();
    }
}

/// A lock-free, CAS-based intrusive stack of segments (spec.md §3: "All
/// list heads mutated via compare-and-swap"). Used for the `free`,
/// `active`, and `filled` lists of each allocator pool.
pub struct SegmentStack {
    head: AtomicPtr<SegmentMeta>,
}

impl SegmentStack {
    pub const fn new() -> Self {
        SegmentStack {
            head: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    pub fn push(&self, seg: Segment) {
        loop {
            let head = self.head.load(Ordering::Acquire);
            seg.0
                .link
                .store(head, Ordering::Release);
            if self
                .head
                .compare_exchange(head, seg.as_raw(), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    pub fn pop(&self) -> Option<Segment> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }
            let seg = Segment(unsafe { &*head });
            let next = seg.link_raw();
            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                seg.set_link(None);
                return Some(seg);
            }
        }
    }

    /// Atomically detach the entire list, returning its former head.
    /// Used by `prepare_sweep` (spec.md §4.8) to splice `filled` onto the
    /// global `sweep_list` in one step.
    pub fn take_all(&self) -> Option<Segment> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            if self
                .head
                .compare_exchange(
                    head,
                    std::ptr::null_mut(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return if head.is_null() {
                    None
                } else {
                    Some(Segment(unsafe { &*head }))
                };
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Iterate the list as it stands right now. Only safe to rely on the
    /// result's completeness when no concurrent pusher/popper is active
    /// (e.g. during `prepare`, which runs stop-the-world).
    pub fn iter(&self) -> SegmentStackIter {
        SegmentStackIter {
            next: self.head.load(Ordering::Acquire),
        }
    }
}

impl Default for SegmentStack {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SegmentStackIter {
    next: *mut SegmentMeta,
}

impl Iterator for SegmentStackIter {
    type Item = Segment;
    fn next(&mut self) -> Option<Segment> {
        if self.next.is_null() {
            return None;
        }
        let seg = Segment(unsafe { &*self.next });
        self.next = seg.link_raw();
        Some(seg)
    }
}

/// Global registry mapping a segment's (self-aligned) base address back to
/// its metadata, so the mark engine can resolve a bare object pointer to
/// `(segment, block_index)` without already holding a `Segment` handle.
/// Grounded in the teacher crate's `util::heap::chunk_map::ChunkMap`.
pub struct SegmentMap {
    table: RwLock<HashMap<usize, &'static SegmentMeta>>,
}

impl SegmentMap {
    pub fn global() -> &'static SegmentMap {
        static MAP: std::sync::OnceLock<SegmentMap> = std::sync::OnceLock::new();
        MAP.get_or_init(|| SegmentMap {
            table: RwLock::new(HashMap::new()),
        })
    }

    fn register(&self, meta: &'static SegmentMeta) {
        self.table
            .write()
            .unwrap()
            .insert(meta.blocks_base.as_usize(), meta);
    }

    /// Resolve an arbitrary heap pointer to the segment containing it, if
    /// any. Returns `None` for pointers outside the non-moving region.
    pub fn segment_of(&self, p: Address) -> Option<Segment> {
        let base = p.align_down(SEGMENT_SIZE);
        self.table
            .read()
            .unwrap()
            .get(&base.as_usize())
            .map(|&m| Segment(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_segment_is_self_aligned_and_empty() {
        let seg = Segment::allocate_fresh(0);
        assert!(seg.start().is_aligned_to(SEGMENT_SIZE));
        assert_eq!(seg.next_free(), 0);
        assert!(!seg.is_full());
        assert_eq!(seg.bit(0), 0);
    }

    #[test]
    fn segment_map_resolves_interior_pointers() {
        let seg = Segment::allocate_fresh(2);
        let inner = seg.block_address(3) + 4usize;
        let found = SegmentMap::global().segment_of(inner).unwrap();
        assert_eq!(found, seg);
        assert_eq!(found.block_index_of(inner), 3);
    }

    #[test]
    fn advance_next_free_skips_marked_blocks() {
        let seg = Segment::allocate_fresh(0);
        seg.mark_bit(1, 1);
        assert!(!seg.advance_next_free());
        assert_eq!(seg.next_free(), 2);
    }

    #[test]
    fn stack_push_pop_is_lifo() {
        let stack = SegmentStack::new();
        let a = Segment::allocate_fresh(1);
        let b = Segment::allocate_fresh(1);
        stack.push(a);
        stack.push(b);
        assert_eq!(stack.pop(), Some(b));
        assert_eq!(stack.pop(), Some(a));
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn epoch_rotates_between_two_nonzero_values() {
        let epoch = MarkEpoch::new();
        assert_eq!(epoch.current(), 1);
        assert_eq!(epoch.rotate(), 2);
        assert_eq!(epoch.rotate(), 1);
    }
}

