//! Top-level collector value (spec.md §6, §9 "Global state"): the single
//! `NonMovingGc` that owns the heap, mark epoch, write barrier, and
//! background mark-worker handle, and exposes every external interface the
//! rest of the runtime calls into.
//!
//! Grounded in the teacher crate's `scheduler::controller::GCController`
//! (the dedicated background worker, parked on a condition variable between
//! cycles) and the top-level `MMTK` struct (one value a VM binding owns and
//! threads through every call, rather than process globals).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::barrier::WriteBarrier;
use crate::heap::Heap;
use crate::mark::MarkEngine;
use crate::pool::CapabilityId;
use crate::queue::{GlobalUrs, MarkQueue};
use crate::segment::MarkEpoch;
use crate::sweep;
use crate::util::address::Address;
use crate::util::opaque::RawPtr;
use crate::vm::{PauseReason, VMBinding};
use crate::weak::{self, FixpointLists, ThreadRef, WeakPtr};

/// Mirrors the source's `sched_state`: `Running` spawns a background mark
/// worker per cycle; anything past it degenerates `collect()` into a
/// synchronous in-thread mark with no worker spawned (spec.md §5
/// "Cancellation / shutdown"; SPEC_FULL.md §9 Open Question 1).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedState {
    Running = 0,
    ShuttingDown = 1,
}

/// The collector (spec.md §9 "Global state"): owned by the embedding
/// runtime and passed by reference (here, `Arc`) rather than relying on
/// process globals, which also eases testing.
pub struct NonMovingGc<VM: VMBinding> {
    heap: Heap,
    epoch: MarkEpoch,
    write_barrier: WriteBarrier,
    global_urs: GlobalUrs,
    vm: VM,
    sched_state: AtomicU8,
    /// `true` for the full duration of a cycle, concurrent or synchronous
    /// (spec.md §5: "`mark_thread != nil` is the in-flight indicator";
    /// unlike `mark_thread`, this flag is also held across the synchronous
    /// shutdown-mode path, which spawns no thread at all, so `collect()`
    /// still correctly no-ops against a second call while one is running).
    in_flight: AtomicBool,
    /// `Some` while a concurrent cycle's worker thread is in flight. Purely
    /// a thread-handle store now that `in_flight` is the actual guard.
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    /// Guards `finished`; published via the condition variable the same
    /// way the source's `concurrent_coll_finished_lock` does.
    finished: Mutex<bool>,
    finished_cv: Condvar,
}

impl<VM: VMBinding + 'static> NonMovingGc<VM> {
    /// `init()` (spec.md §6): create the heap, synchronization primitives,
    /// and per-capability pool arrays.
    pub fn new(capabilities: usize, vm: VM) -> Self {
        crate::util::logger::try_init();
        NonMovingGc {
            heap: Heap::new(capabilities),
            epoch: MarkEpoch::new(),
            write_barrier: WriteBarrier::new(capabilities),
            global_urs: GlobalUrs::new(),
            vm,
            sched_state: AtomicU8::new(SchedState::Running as u8),
            in_flight: AtomicBool::new(false),
            worker: Mutex::new(None),
            finished: Mutex::new(true),
            finished_cv: Condvar::new(),
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn vm(&self) -> &VM {
        &self.vm
    }

    pub fn write_barrier_enabled(&self) -> bool {
        self.write_barrier.is_enabled()
    }

    pub fn sched_state(&self) -> SchedState {
        match self.sched_state.load(Ordering::Acquire) {
            0 => SchedState::Running,
            _ => SchedState::ShuttingDown,
        }
    }

    /// Transition into shutdown (spec.md §5, §7 failure mode 3). Does not
    /// itself wait for an in-flight cycle; call `wait_until_finished()` for
    /// that, matching the source's `exit()` sequencing.
    pub fn begin_shutdown(&self) {
        self.sched_state.store(SchedState::ShuttingDown as u8, Ordering::Release);
    }

    /// `exit()` (spec.md §6): block until any in-flight cycle drains, then
    /// the runtime may drop this value. There is no further teardown to do
    /// explicitly — every resource here is either `Drop`-managed or (per
    /// segment.rs's design) intentionally leaked for the process lifetime.
    pub fn exit(&self) {
        self.begin_shutdown();
        self.wait_until_finished();
    }

    /// `allocate(cap, words)` (spec.md §6, §4.1).
    pub fn allocate(&self, cap: CapabilityId, words: usize) -> Address {
        self.heap.allocate(cap, words)
    }

    /// `add_capabilities(n)` (spec.md §6): caller guarantees no GC/mutators
    /// run concurrently.
    pub fn add_capabilities(&self, new_total: usize) {
        self.heap.add_capabilities(new_total);
        self.write_barrier.add_capabilities(new_total);
    }

    pub fn is_alive(&self, p: RawPtr) -> bool {
        let epoch = self.epoch.current();
        let engine = MarkEngine::new(&self.heap, epoch, &self.vm, &self.vm);
        engine.is_alive(p)
    }

    pub fn push_closure(&self, cap: CapabilityId, p: Address, origin: Option<Address>) {
        self.write_barrier.push_closure(cap, p, origin, &self.global_urs, &self.vm);
    }

    pub fn push_thunk(&self, cap: CapabilityId, thunk: Address) {
        self.write_barrier.push_thunk(cap, thunk, &self.global_urs, &self.vm);
    }

    pub fn push_tso(&self, cap: CapabilityId, tso: Address) {
        self.write_barrier.push_tso(cap, tso, &self.global_urs, &self.vm);
    }

    pub fn push_stack(
        &self,
        cap: CapabilityId,
        stack: Address,
        dirty_flags: &std::sync::atomic::AtomicU8,
        snapshot_fields: impl FnMut(&mut dyn FnMut(Address)),
    ) {
        self.write_barrier
            .push_stack(cap, stack, dirty_flags, snapshot_fields, &self.global_urs, &self.vm);
    }

    /// `wait_until_finished()` (spec.md §6): block until any in-flight
    /// concurrent cycle drains.
    pub fn wait_until_finished(&self) {
        let guard = self.finished.lock().unwrap();
        let _guard = self.finished_cv.wait_while(guard, |done| !*done).unwrap();
    }

    /// `prepare()` + "Seed" (spec.md §2 steps 1-2): runs synchronously,
    /// under a short mutator pause for the root scan, and returns the
    /// initially-seeded mark queue. Per spec.md §1's single-mark-worker
    /// model, the queue has exactly one owner from this point on; it is
    /// moved by value into whichever cycle body runs next.
    fn prepare_and_seed(&self) -> MarkQueue {
        self.heap.prepare();
        self.epoch.rotate();
        self.write_barrier.enable();

        let mut queue = MarkQueue::new();
        self.vm.stop_all_mutators(PauseReason::RootScan);
        self.vm.for_each_root(&mut |p| {
            if !p.is_null() {
                queue.push_closure(p.address(), None);
            }
        });
        self.vm.release_all_mutators();
        queue
    }

    /// `collect()` (spec.md §6): kicks off one major cycle. No-op if
    /// another cycle is already in flight. Requires `Arc<Self>` because the
    /// concurrent path spawns a background worker that outlives this call
    /// and needs its own handle on the collector (spec.md §9 "Background
    /// marking: the mark worker is a long-lived task").
    pub fn collect(self: &Arc<Self>, threads: Vec<ThreadRef>, weak_ptrs: Vec<WeakPtr>) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return; // a cycle is already in flight
        }
        // Flipped before any cycle work runs (not just before the worker
        // spawns): a `wait_until_finished()` call racing this one must see
        // a fresh cycle as not-finished from the moment `in_flight` is
        // claimed, not only once `prepare_and_seed` happens to be done.
        *self.finished.lock().unwrap() = false;

        let queue = self.prepare_and_seed();
        let fixpoint = FixpointLists::new(threads, weak_ptrs);

        if self.sched_state() == SchedState::Running {
            let gc = Arc::clone(self);
            *self.worker.lock().unwrap() = Some(thread::spawn(move || gc.run_concurrent_cycle(queue, fixpoint)));
        } else {
            // Degenerate in-thread mark (SPEC_FULL.md §9 Open Question 1):
            // no worker spawned, so this call finishes the cycle itself
            // before returning. `in_flight` stays true for the whole call,
            // so a concurrent `collect()` from another thread still
            // correctly no-ops instead of racing `prepare`/`epoch.rotate`/
            // the write barrier against this in-progress synchronous cycle.
            self.run_cycle_body(queue, fixpoint);
            self.in_flight.store(false, Ordering::Release);
            *self.finished.lock().unwrap() = true;
            self.finished_cv.notify_all();
        }
    }

    fn run_concurrent_cycle(self: Arc<Self>, queue: MarkQueue, fixpoint: FixpointLists) {
        self.run_cycle_body(queue, fixpoint);
        *self.worker.lock().unwrap() = None;
        self.in_flight.store(false, Ordering::Release);
        *self.finished.lock().unwrap() = true;
        self.finished_cv.notify_all();
    }

    /// The shared body of the concurrent and synchronous paths: drain the
    /// mark queue, run the flush protocol and weak/thread fixpoint, then
    /// sweep. Checked for mid-cycle shutdown per spec.md §7 failure mode 3.
    fn run_cycle_body(&self, mut queue: MarkQueue, mut fixpoint: FixpointLists) {
        let epoch = self.epoch.current();
        let engine = MarkEngine::new(&self.heap, epoch, &self.vm, &self.vm);
        engine.mark(&mut queue, &self.global_urs);

        if self.sched_state() == SchedState::ShuttingDown {
            log::warn!("nonmoving-gc: shutdown mid-cycle, skipping final flush and sweep");
            self.write_barrier.disable();
            return;
        }

        self.flush_protocol(&engine, &mut queue, &mut fixpoint);

        sweep::prepare_sweep(&self.heap);
        let stats = sweep::sweep(&self.heap, epoch);
        let reclaimed_large = sweep::sweep_large_objects(&self.heap);
        log::debug!(
            "nonmoving-gc: sweep complete: {} free, {} partial, {} filled, {} large objects reclaimed",
            stats.freed,
            stats.partial,
            stats.filled,
            reclaimed_large
        );
    }

    /// Flush protocol (spec.md §4.5): stop mutators, splice every
    /// capability's URS into the global chain, drain it into the mark
    /// queue, finish the weak/thread fixpoint, disable the barrier, release
    /// mutators. Mutators are already stopped for the whole window here
    /// (see DESIGN.md for why this collapses the source's per-capability
    /// flush-counter handshake into one synchronous pass).
    fn flush_protocol(&self, engine: &MarkEngine, queue: &mut MarkQueue, fixpoint: &mut FixpointLists) {
        self.vm.stop_all_mutators(PauseReason::FlushUrs);
        for cap in 0..self.write_barrier.capability_count() {
            self.write_barrier.flush_capability(cap, &self.global_urs);
        }
        engine.mark(queue, &self.global_urs);
        weak::run_fixpoint(engine, queue, &self.global_urs, fixpoint);
        self.write_barrier.disable();
        self.vm.release_all_mutators();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRuntime;
    use crate::vm::{Field, ObjectTag};

    #[test]
    fn fully_dead_allocation_is_reclaimed_by_collect() {
        let rt = MockRuntime::new();
        let gc = Arc::new(NonMovingGc::new(1, rt));
        // Fill (and roll over) the current segment so it lands on `filled`;
        // only segments on `filled` get swept this cycle (DESIGN.md).
        let block_count = gc.heap().pool(0).current(0).block_count();
        for _ in 0..block_count {
            gc.allocate(0, 2);
        }
        assert!(!gc.heap().pool(0).filled.is_empty());

        gc.collect(vec![], vec![]);
        gc.wait_until_finished();
        assert_eq!(gc.heap().n_free(), 1);
    }

    #[test]
    fn a_retained_root_survives_collection_and_its_siblings_do_not() {
        let rt = MockRuntime::new();
        let gc = Arc::new(NonMovingGc::new(1, rt));
        let objs: Vec<Address> = (0..10).map(|_| gc.allocate(0, 2)).collect();
        gc.vm().add_root(RawPtr::from_address(objs[2]));
        gc.collect(vec![], vec![]);
        gc.wait_until_finished();

        assert!(gc.is_alive(RawPtr::from_address(objs[2])));
        let seg = crate::segment::SegmentMap::global().segment_of(objs[2]).unwrap();
        for (i, &o) in objs.iter().enumerate() {
            let idx = seg.block_index_of(o);
            assert_eq!(seg.bit(idx) != 0, i == 2, "only the retained 3rd object should be marked");
        }
    }

    #[test]
    fn array_chunking_marks_the_shared_target_exactly_once_via_dedup() {
        let rt = MockRuntime::new();
        let gc = Arc::new(NonMovingGc::new(1, rt));
        let target = gc.allocate(0, 2);
        let array = gc.allocate(0, 1);
        let entries: Vec<RawPtr> = (0..400).map(|_| RawPtr::from_address(target)).collect();
        gc.vm().set_array(array, entries);
        gc.vm().set_tag(array, ObjectTag::ArrayOfPointers);
        gc.vm().set_fields(
            array,
            vec![Field::ArrayChunk {
                array,
                start_index: 0,
            }],
        );
        gc.vm().add_root(RawPtr::from_address(array));
        gc.collect(vec![], vec![]);
        gc.wait_until_finished();

        assert!(gc.is_alive(RawPtr::from_address(target)));
        assert!(gc.is_alive(RawPtr::from_address(array)));
    }
}
