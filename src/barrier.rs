//! Write barrier (spec.md §4.5, §6): the mutator-side entry point that
//! records a pointer overwrite into a capability's local update remembered
//! set, and the stack snapshot path that drives the §4.4 handshake.
//!
//! Grounded in the teacher crate's `util::barriers` module (object/array
//! write barriers dispatched per `ObjectReference`) generalised here to the
//! closure/thunk/TSO/stack split spec.md §4.5 names explicitly.
//!
//! `WriteBarrier` takes its `GlobalUrs` and `HeapPredicate` by reference at
//! each call rather than storing them, so a `NonMovingGc` can own both the
//! barrier and the URS chain it splices into without a self-referential
//! lifetime.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, RwLock};

use crate::mark::mutator_write_barrier_for_stack;
use crate::pool::CapabilityId;
use crate::queue::{Entry, GlobalUrs, UpdateRemSet};
use crate::util::address::Address;
use crate::util::opaque::RawPtr;
use crate::vm::HeapPredicate;

/// Per-capability write barrier state plus the master enable flag
/// (spec.md §6 `write_barrier_enabled`). Mutators consult `is_enabled`
/// before doing any recording work, so the barrier is a single relaxed load
/// when no cycle is in progress.
pub struct WriteBarrier {
    enabled: AtomicBool,
    per_cap: RwLock<Vec<Mutex<UpdateRemSet>>>,
}

impl WriteBarrier {
    pub fn new(capabilities: usize) -> Self {
        WriteBarrier {
            enabled: AtomicBool::new(false),
            per_cap: RwLock::new((0..capabilities).map(|_| Mutex::new(UpdateRemSet::new())).collect()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turned on for the duration of a concurrent mark cycle (spec.md §2
    /// step 1 onward) and off again once the final flush completes
    /// (spec.md §4.5 step 4).
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Grow the per-capability URS array (spec.md §6 `add_capabilities`:
    /// caller guarantees no GC/mutators run concurrently).
    pub fn add_capabilities(&self, new_total: usize) {
        let mut caps = self.per_cap.write().unwrap();
        while caps.len() < new_total {
            caps.push(Mutex::new(UpdateRemSet::new()));
        }
    }

    /// `push_closure(cap, p, origin_slot)` (spec.md §4.5): the common
    /// recording primitive every other barrier entry point funnels through.
    /// `origin` is the overwritten slot's own address, kept for the
    /// selector-thunk shortcut the mark engine may use when tracing later.
    pub fn push_closure(
        &self,
        cap: CapabilityId,
        p: Address,
        origin: Option<Address>,
        global: &GlobalUrs,
        pred: &dyn HeapPredicate,
    ) {
        if !self.is_enabled() {
            return;
        }
        let raw = RawPtr::from_address(p);
        if raw.is_null() {
            return;
        }
        // Spec.md §4.5: "if p does not lie in the non-moving region (and is
        // not static), no-op" — static closures fail `is_heap_allocated`
        // (they have no segment/bitmap) but must still be recorded.
        if !pred.is_heap_allocated(raw) && !pred.is_static(raw) {
            return;
        }
        self.per_cap.read().unwrap()[cap]
            .lock()
            .unwrap()
            .push(Entry::Closure { p, origin }, global);
    }

    /// `push_thunk(cap, thunk)` (spec.md §4.5): recorded exactly like any
    /// other closure overwrite — thunks carry no special barrier semantics
    /// beyond being a pointer target.
    pub fn push_thunk(&self, cap: CapabilityId, thunk: Address, global: &GlobalUrs, pred: &dyn HeapPredicate) {
        self.push_closure(cap, thunk, None, global, pred);
    }

    /// `push_tso(cap, tso)` (spec.md §4.5): records the thread-state object
    /// itself, e.g. when it transitions onto a run queue that might now
    /// reach it from a root the collector hasn't scanned yet.
    pub fn push_tso(&self, cap: CapabilityId, tso: Address, global: &GlobalUrs, pred: &dyn HeapPredicate) {
        self.push_closure(cap, tso, None, global, pred);
    }

    /// `push_stack(cap, stack)` (spec.md §4.5, §4.4): runs the two-bit
    /// handshake; if this call wins the race to claim marking duty, it also
    /// pushes a full snapshot of the stack's current pointer fields (via
    /// `snapshot_fields`) plus the stack object itself, exactly as the
    /// mark engine would have done had it reached the stack first.
    #[allow(clippy::too_many_arguments)]
    pub fn push_stack(
        &self,
        cap: CapabilityId,
        stack: Address,
        dirty_flags: &AtomicU8,
        mut snapshot_fields: impl FnMut(&mut dyn FnMut(Address)),
        global: &GlobalUrs,
        pred: &dyn HeapPredicate,
    ) {
        if !self.is_enabled() {
            return;
        }
        mutator_write_barrier_for_stack(dirty_flags, || {
            snapshot_fields(&mut |p| self.push_closure(cap, p, None, global, pred));
            self.push_closure(cap, stack, None, global, pred);
        });
    }

    /// Unconditionally splice a capability's remaining local entries into
    /// the global chain. Used by the flush protocol (spec.md §4.5 step 2).
    pub fn flush_capability(&self, cap: CapabilityId, global: &GlobalUrs) {
        self.per_cap.read().unwrap()[cap].lock().unwrap().flush(global);
    }

    pub fn capability_count(&self) -> usize {
        self.per_cap.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AllHeap;
    impl HeapPredicate for AllHeap {
        fn is_heap_allocated(&self, p: RawPtr) -> bool {
            !p.is_null()
        }
        fn is_non_moving(&self, _p: RawPtr) -> bool {
            true
        }
        fn is_static(&self, _p: RawPtr) -> bool {
            false
        }
        fn block_descriptor(&self, p: RawPtr) -> crate::vm::BlockDescriptor {
            crate::vm::BlockDescriptor {
                non_moving: !p.is_null(),
            }
        }
    }

    /// A predicate where every pointer is static (and never
    /// heap-allocated), used to exercise the "not heap-allocated but
    /// static" OR-branch of `push_closure`'s guard.
    struct StaticOnly;
    impl HeapPredicate for StaticOnly {
        fn is_heap_allocated(&self, _p: RawPtr) -> bool {
            false
        }
        fn is_non_moving(&self, _p: RawPtr) -> bool {
            false
        }
        fn is_static(&self, p: RawPtr) -> bool {
            !p.is_null()
        }
        fn block_descriptor(&self, _p: RawPtr) -> crate::vm::BlockDescriptor {
            crate::vm::BlockDescriptor { non_moving: false }
        }
    }

    #[test]
    fn disabled_barrier_records_nothing() {
        let global = GlobalUrs::new();
        let pred = AllHeap;
        let barrier = WriteBarrier::new(1);
        barrier.push_closure(0, Address::from_usize(0x1000), None, &global, &pred);
        barrier.flush_capability(0, &global);
        assert!(global.is_empty());
    }

    #[test]
    fn enabled_barrier_records_and_flushes() {
        let global = GlobalUrs::new();
        let pred = AllHeap;
        let barrier = WriteBarrier::new(1);
        barrier.enable();
        barrier.push_closure(0, Address::from_usize(0x1000), None, &global, &pred);
        barrier.flush_capability(0, &global);
        assert!(!global.is_empty());
    }

    #[test]
    fn a_static_closure_is_recorded_even_though_it_is_not_heap_allocated() {
        let global = GlobalUrs::new();
        let pred = StaticOnly;
        let barrier = WriteBarrier::new(1);
        barrier.enable();
        barrier.push_closure(0, Address::from_usize(0x1000), None, &global, &pred);
        barrier.flush_capability(0, &global);
        assert!(!global.is_empty(), "a static closure overwrite must still be recorded");
    }

    #[test]
    fn push_stack_snapshots_only_when_it_wins_the_handshake() {
        let global = GlobalUrs::new();
        let pred = AllHeap;
        let barrier = WriteBarrier::new(1);
        barrier.enable();
        let dirty = AtomicU8::new(0);
        let fields = vec![Address::from_usize(0x2000), Address::from_usize(0x3000)];
        barrier.push_stack(
            0,
            Address::from_usize(0x4000),
            &dirty,
            |visit| {
                for f in &fields {
                    visit(*f);
                }
            },
            &global,
            &pred,
        );
        barrier.flush_capability(0, &global);
        // Two fields plus the stack object itself.
        assert!(!global.is_empty());
        assert_eq!(
            dirty.load(Ordering::Acquire) & crate::mark::MUTATOR_MARKING,
            crate::mark::MUTATOR_MARKING
        );
    }

    #[test]
    fn push_stack_is_a_no_op_once_mutator_marking_already_claimed() {
        let global = GlobalUrs::new();
        let pred = AllHeap;
        let barrier = WriteBarrier::new(1);
        barrier.enable();
        let dirty = AtomicU8::new(crate::mark::MUTATOR_MARKING);
        barrier.push_stack(
            0,
            Address::from_usize(0x4000),
            &dirty,
            |_visit| {
                panic!("snapshot should not run when already claimed");
            },
            &global,
            &pred,
        );
    }
}
