//! The mark engine (spec.md §4.3, §4.4): the drain loop that empties a
//! `MarkQueue` (adopting from the `GlobalUrs` chain when the local queue
//! runs dry), the type-dispatch policy table, and the stack-dirtiness
//! two-bit handshake between the collector and mutators.
//!
//! Grounded in the teacher crate's `scheduler::gc_work::ProcessEdgesWork`
//! (the generic trace-and-enqueue drain loop shape) and, for the stack
//! handshake specifically, in `original_source/rts/sm/NonMovingMark.c`'s
//! `MUTATOR_MARKING`/`COLLECTOR_MARKING` dirty-flag protocol.

use std::sync::atomic::Ordering;
use std::sync::Mutex;

use crate::heap::Heap;
use crate::queue::{Entry, GlobalUrs, MarkQueue};
use crate::segment::{Segment, SegmentMap};
use crate::util::address::Address;
use crate::util::constants::MARK_ARRAY_CHUNK_LENGTH;
use crate::util::error::fatal;
use crate::util::opaque::{ObjectReference, RawPtr};
use crate::vm::{Field, HeapPredicate, ObjectTag, ObjectVisitor};

/// Set by a mutator about to write through a stack slot that still needs
/// marking this cycle; observed by the collector to know it need not trace
/// the stack itself (spec.md §4.4).
pub const MUTATOR_MARKING: u8 = 0b01;
/// Set by the collector while (and, on completion, after) tracing a stack;
/// observed by a mutator about to write to know it must wait rather than
/// race the collector (spec.md §4.4).
pub const COLLECTOR_MARKING: u8 = 0b10;

/// Drives one mark worker's drain loop against a particular heap/epoch.
/// Exactly one `MarkEngine` runs at a time (spec.md §1 Non-goals: a single
/// concurrent marker), so the static-closure dedup set needs no external
/// synchronization beyond the mutex that guards it against the (disjoint)
/// possibility of a nested re-entrant call from the weak/thread fixpoint.
pub struct MarkEngine<'a> {
    heap: &'a Heap,
    epoch: u8,
    pred: &'a dyn HeapPredicate,
    visitor: &'a dyn ObjectVisitor,
    static_seen: Mutex<std::collections::HashSet<Address>>,
}

impl<'a> MarkEngine<'a> {
    pub fn new(heap: &'a Heap, epoch: u8, pred: &'a dyn HeapPredicate, visitor: &'a dyn ObjectVisitor) -> Self {
        MarkEngine {
            heap,
            epoch,
            pred,
            visitor,
            static_seen: Mutex::new(std::collections::HashSet::new()),
        }
    }

    pub fn heap(&self) -> &'a Heap {
        self.heap
    }

    pub fn epoch(&self) -> u8 {
        self.epoch
    }

    /// Drain `queue` to completion, adopting the global URS chain whenever
    /// the local queue empties, until both are empty (spec.md §4.3). Idle
    /// on an already-empty queue and empty chain (idempotence, spec.md §8).
    pub fn mark(&self, queue: &mut MarkQueue, global: &GlobalUrs) {
        loop {
            match queue.pop() {
                Some(Entry::Closure { p, .. }) => self.process_closure(queue, p),
                Some(Entry::Array { array, start_index }) => {
                    self.process_array(queue, array, start_index)
                }
                None => {
                    let adopted = global.take_all();
                    if adopted.is_empty() {
                        return;
                    }
                    queue.adopt(adopted);
                }
            }
        }
    }

    fn process_closure(&self, queue: &mut MarkQueue, p: Address) {
        let raw = RawPtr::from_address(p);
        if raw.is_null() {
            return;
        }
        // Static closures fail `is_heap_allocated` by definition (spec.md
        // §4.5; mirrors the original's `!HEAP_ALLOCED_GC(p)` branch), so
        // this check must come before the heap-membership gate below, not
        // after it.
        if self.pred.is_static(raw) {
            if !self.static_seen.lock().unwrap().insert(p) {
                return; // already visited this cycle
            }
            let obj = ObjectReference::from_raw_address(p);
            self.enqueue_fields(queue, obj);
            return;
        }

        // Not in the non-moving region at all: nothing to do.
        if !self.pred.is_heap_allocated(raw) {
            return;
        }

        // Heap-allocated but untagged and resident in a younger generation
        // (spec.md §4.3): the snapshot never included it, so discard rather
        // than trace it as part of this region.
        if !self.pred.is_non_moving(raw) {
            return;
        }

        let seg = match SegmentMap::global().segment_of(p) {
            Some(s) => s,
            None => return self.process_large_object(queue, p, raw),
        };
        let idx = seg.block_index_of(p);

        // Beyond the mark-cycle's snapshot and not already marked: this
        // block was allocated after `prepare` and is implicitly live,
        // never traced this cycle (spec.md §3 invariant 3).
        if idx >= seg.next_free_snap() && seg.bit(idx) == 0 {
            return;
        }

        let obj = ObjectReference::from_raw_address(p);
        let tag = self.visitor.tag_of(obj);

        if tag == ObjectTag::WhiteHole {
            // Transient: another mutator is mid-overwrite of this closure's
            // info pointer. Spin until it settles, then re-dispatch.
            while self.visitor.tag_of(obj) == ObjectTag::WhiteHole {
                std::hint::spin_loop();
            }
            queue.push_closure(p, None);
            return;
        }

        if tag == ObjectTag::Pinned {
            return; // never traced (spec.md §4.3)
        }

        if seg.is_marked(idx, self.epoch) {
            return; // already marked this cycle: discard
        }

        if tag == ObjectTag::Stack {
            self.mark_stack(queue, obj, seg, idx);
        } else {
            // General rule: enqueue children, THEN set the mark bit
            // (spec.md §4.3 ordering rule; load-bearing for the stack
            // handshake above and applied uniformly here for consistency).
            self.enqueue_fields(queue, obj);
            seg.mark_bit(idx, self.epoch);
        }
    }

    /// A non-moving pointer that resolves to no `SegmentMap` entry: either a
    /// large object (tracked by its own descriptor, spec.md §3, §4.7) or a
    /// genuine fault. `LargeObjectSet::mark` covers both the already-marked
    /// dedup and the implicitly-live-if-registered-after-prepare case the
    /// segmented path handles via `next_free_snap`; only a pointer the large
    /// object set has never heard of reaches the fatal fault spec.md §7.1
    /// names ("a pointer that claims to be in the non-moving region but
    /// whose block descriptor disagrees").
    fn process_large_object(&self, queue: &mut MarkQueue, p: Address, raw: RawPtr) {
        if !self.heap.large_objects.mark(p) {
            if !self.heap.large_objects.is_registered(p) {
                let desc = self.pred.block_descriptor(raw);
                fatal(format!(
                    "pointer {p:?} claims non-moving heap membership (block_descriptor.non_moving={}) but resolves to no segment and no large object",
                    desc.non_moving
                ));
            }
            return; // already marked this cycle, or allocated after prepare
        }
        let obj = ObjectReference::from_raw_address(p);
        self.enqueue_fields(queue, obj);
    }

    fn enqueue_fields(&self, queue: &mut MarkQueue, obj: ObjectReference) {
        self.visitor.for_each_pointer_field(obj, &mut |field| match field {
            Field::Pointer(p) => {
                if !p.is_null() {
                    queue.push_closure(p.address(), None);
                }
            }
            Field::ArrayChunk { array, start_index } => queue.push_array(array, start_index),
            Field::Raw => {}
        });
    }

    /// `ARRAY{array, start}` entries (spec.md §4.3): push at most
    /// `MARK_ARRAY_CHUNK_LENGTH` slots; if the array extends further,
    /// re-enqueue the remainder first so per-entry work stays bounded. The
    /// array object's own mark bit was already set when its initiating
    /// `Closure` entry was processed, so no dedup happens here.
    fn process_array(&self, queue: &mut MarkQueue, array: Address, start_index: usize) {
        let obj = ObjectReference::from_raw_address(array);
        let len = self.visitor.array_length(obj);
        let end = (start_index + MARK_ARRAY_CHUNK_LENGTH).min(len);
        if end < len {
            queue.push_array(array, end);
        }
        for i in start_index..end {
            let slot = self.visitor.array_slot(obj, i);
            if !slot.is_null() {
                queue.push_closure(slot.address(), None);
            }
        }
    }

    /// The stack-dirtiness handshake (spec.md §4.4): claim `COLLECTOR_MARKING`
    /// unless a mutator already claimed `MUTATOR_MARKING` first (in which
    /// case the collector relies on the mutator to finish), trace the
    /// stack's children, then publish completion by setting
    /// `MUTATOR_MARKING` too (unblocking any mutator spinning on it) before
    /// finally setting the segment mark bit.
    fn mark_stack(&self, queue: &mut MarkQueue, obj: ObjectReference, seg: Segment, idx: usize) {
        let flags = self.visitor.stack_dirty_flags(obj);
        loop {
            let cur = flags.load(Ordering::Acquire);
            if cur & MUTATOR_MARKING != 0 {
                return; // a mutator already owns marking this stack
            }
            if flags
                .compare_exchange(cur, cur | COLLECTOR_MARKING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }
        self.enqueue_fields(queue, obj);
        flags.fetch_or(MUTATOR_MARKING, Ordering::AcqRel);
        seg.mark_bit(idx, self.epoch);
    }

    /// `is_alive(p)` (spec.md §4.7): used by both the weak-pointer fixpoint
    /// and any external collaborator asking whether a pointer survived this
    /// cycle.
    pub fn is_alive(&self, p: RawPtr) -> bool {
        if p.is_null() {
            return false;
        }
        if !self.pred.is_heap_allocated(p) {
            return true; // static or off-heap: always alive
        }
        let addr = p.address();
        if let Some(seg) = SegmentMap::global().segment_of(addr) {
            let idx = seg.block_index_of(addr);
            return idx >= seg.next_free_snap() || seg.is_marked(idx, self.epoch);
        }
        self.heap.large_objects.is_alive(addr)
    }
}

/// Mutator-side half of the stack handshake (spec.md §4.4), called from the
/// write barrier before a mutator writes through a stack's slot. Returns
/// once it is safe for the mutator to proceed with its write: either it
/// claimed marking duty itself and has pushed a full snapshot via
/// `push_stack`, or the collector had already claimed it and has since
/// published completion.
pub fn mutator_write_barrier_for_stack(
    flags: &std::sync::atomic::AtomicU8,
    mut push_stack: impl FnMut(),
) {
    loop {
        let cur = flags.load(Ordering::Acquire);
        if cur & MUTATOR_MARKING != 0 {
            return; // already handled
        }
        if cur & COLLECTOR_MARKING != 0 {
            while flags.load(Ordering::Acquire) & MUTATOR_MARKING == 0 {
                std::hint::spin_loop();
            }
            return;
        }
        if flags
            .compare_exchange(cur, cur | MUTATOR_MARKING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            push_stack();
            return;
        }
    }
}
