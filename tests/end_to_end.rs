//! End-to-end scenarios against a [`nonmoving_gc::mock::MockRuntime`]
//! binding, one per literal example in the collector's testable-properties
//! list. Run with `cargo test --features mock_test`, mirroring how
//! mmtk-core gates its own mock-VM integration tests behind `mock_test`.

#![cfg(feature = "mock_test")]

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use nonmoving_gc::mock::MockRuntime;
use nonmoving_gc::{
    Field, GlobalUrs, Heap, MarkQueue, NonMovingGc, ObjectReference, ObjectTag, RawPtr, Segment,
    SegmentMap, ThreadRef, WeakPtr,
};
use nonmoving_gc::mark::MarkEngine;
use nonmoving_gc::barrier::WriteBarrier;
use nonmoving_gc::weak::{run_fixpoint, FixpointLists};

#[test]
fn allocate_and_sweep_fully_dead() {
    let rt = MockRuntime::new();
    let gc = Arc::new(NonMovingGc::new(1, rt));

    // Fill the current segment so it rotates onto `filled`; only segments on
    // `filled` are swept this cycle.
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
fn survivor_scenario_leaves_one_marked_block_and_a_partial_segment() {
    let rt = MockRuntime::new();
    let gc = Arc::new(NonMovingGc::new(1, rt));

    let objs: Vec<_> = (0..10).map(|_| gc.allocate(0, 2)).collect();
    gc.vm().add_root(RawPtr::from_address(objs[2]));

    gc.collect(vec![], vec![]);
    gc.wait_until_finished();

    let seg = SegmentMap::global().segment_of(objs[0]).unwrap();
    for (i, &o) in objs.iter().enumerate() {
        let idx = seg.block_index_of(o);
        assert_eq!(seg.bit(idx) != 0, i == 2, "only object 2 should be marked");
    }
    // Survivor + 9 dead blocks is neither all-marked nor all-unmarked:
    // the segment classifies PARTIAL and resumes allocation at the first
    // unmarked index once it is actually swept.
    assert_eq!(seg.next_free(), 10);
}

#[test]
fn snapshot_invariant_protects_objects_allocated_after_prepare() {
    let heap = Heap::new(1);
    let rt = MockRuntime::new();

    let a = heap.allocate(0, 2);
    let b = heap.allocate(0, 2);
    rt.set_fields(a, vec![Field::Pointer(RawPtr::from_address(b))]);

    heap.prepare(); // snapshots next_free; a and b are both pre-snapshot

    let global = GlobalUrs::new();
    let barrier = WriteBarrier::new(1);
    barrier.enable();
    let mut queue = MarkQueue::new();
    queue.push_closure(a, None);

    let engine = MarkEngine::new(&heap, 1, &rt, &rt);
    // Mark `a`'s subtree before the mutator's write lands, as the collector
    // would if it reached `a` first.
    engine.mark(&mut queue, &global);

    // Mutator overwrites a's field: it used to point at b, now points at a
    // freshly allocated c. The barrier records the old value, b, so it gets
    // traced even though nothing still points to it.
    let c = heap.allocate(0, 2);
    barrier.push_closure(0, b, Some(a), &global, &rt);
    rt.set_fields(a, vec![Field::Pointer(RawPtr::from_address(c))]);

    barrier.flush_capability(0, &global);
    engine.mark(&mut queue, &global);

    let seg = SegmentMap::global().segment_of(a).unwrap();
    assert!(seg.is_marked(seg.block_index_of(b), 1), "b must be marked via the write barrier");
    assert!(!seg.is_marked(seg.block_index_of(c), 1), "c was never enqueued, only implicitly live");
    assert!(seg.block_index_of(c) >= seg.next_free_snap(), "c must be post-snapshot");
}

#[test]
fn weak_pointer_with_a_dead_key_moves_to_the_dead_list_and_marks_its_finalizer() {
    let heap = Heap::new(1);
    let rt = MockRuntime::new();

    let w_key = heap.allocate(0, 2);
    let v_value = heap.allocate(0, 2);
    let f_finalizer = heap.allocate(0, 2);
    heap.prepare(); // nothing marked yet; all three are unreachable once dropped

    let engine = MarkEngine::new(&heap, 1, &rt, &rt);
    let mut queue = MarkQueue::new();
    let global = GlobalUrs::new();

    let weak = WeakPtr {
        key: RawPtr::from_address(w_key),
        value: RawPtr::from_address(v_value),
        finalizer: RawPtr::from_address(f_finalizer),
        c_finalizers: vec![],
    };
    let mut lists = FixpointLists::new(vec![], vec![weak]);
    run_fixpoint(&engine, &mut queue, &global, &mut lists);

    assert_eq!(lists.weak_ptrs().len(), 0);
    assert_eq!(lists.dead_weak_ptr_list().len(), 1);

    let seg = SegmentMap::global().segment_of(f_finalizer).unwrap();
    assert!(seg.is_marked(seg.block_index_of(f_finalizer), 1), "finalizer must be marked live");
    assert!(!seg.is_marked(seg.block_index_of(v_value), 1), "value is not kept alive for a dead weak");
}

#[test]
fn array_of_four_hundred_entries_dedups_the_shared_target() {
    let heap = Heap::new(1);
    let rt = MockRuntime::new();

    let target = heap.allocate(0, 2);
    let array = heap.allocate(0, 1);
    let entries: Vec<RawPtr> = (0..400).map(|_| RawPtr::from_address(target)).collect();
    let entry_count = entries.len();
    rt.set_array(array, entries);
    rt.set_tag(array, ObjectTag::ArrayOfPointers);
    rt.set_fields(array, vec![Field::ArrayChunk { array, start_index: 0 }]);

    // A 400-entry array chunked at MARK_ARRAY_CHUNK_LENGTH=128 must take at
    // least ceil(400/128)=4 ARRAY entries to fully enqueue.
    let min_chunks = entry_count.div_ceil(nonmoving_gc::util::constants::MARK_ARRAY_CHUNK_LENGTH);
    assert!(min_chunks >= 4);

    let engine = MarkEngine::new(&heap, 1, &rt, &rt);
    let mut queue = MarkQueue::new();
    let global = GlobalUrs::new();
    queue.push_closure(array, None);
    engine.mark(&mut queue, &global);

    let target_seg = SegmentMap::global().segment_of(target).unwrap();
    let array_seg = SegmentMap::global().segment_of(array).unwrap();
    // Dedup via the bitmap: the 400 identical slots all resolve to one
    // mark-bit write, observable only as "marked", not as a count, which is
    // exactly the invariant this scenario is testing.
    assert!(target_seg.is_marked(target_seg.block_index_of(target), 1));
    assert!(array_seg.is_marked(array_seg.block_index_of(array), 1));
}

#[test]
fn stack_handshake_has_no_double_mark_and_no_lost_update() {
    let dirty = Arc::new(AtomicU8::new(0));
    let start = Arc::new(Barrier::new(2));
    let mutator_pushed = Arc::new(std::sync::Mutex::new(false));

    let collector_flags = Arc::clone(&dirty);
    let collector_start = Arc::clone(&start);
    let collector = thread::spawn(move || {
        collector_start.wait();
        // Collector claims marking duty first, simulating `MarkEngine::mark_stack`
        // racing a concurrent mutator write to the same stack.
        collector_flags
            .compare_exchange(
                0,
                nonmoving_gc::mark::COLLECTOR_MARKING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .expect("collector wins the claim in this simulation");
        thread::yield_now();
        collector_flags.fetch_or(nonmoving_gc::mark::MUTATOR_MARKING, Ordering::AcqRel);
    });

    let mutator_flags = Arc::clone(&dirty);
    let mutator_start = Arc::clone(&start);
    let mutator_pushed_flag = Arc::clone(&mutator_pushed);
    let mutator = thread::spawn(move || {
        mutator_start.wait();
        nonmoving_gc::mark::mutator_write_barrier_for_stack(&mutator_flags, || {
            *mutator_pushed_flag.lock().unwrap() = true;
        });
    });

    collector.join().unwrap();
    mutator.join().unwrap();

    // The collector claimed marking duty, so the mutator must have waited
    // for it rather than pushing its own snapshot.
    assert!(!*mutator_pushed.lock().unwrap());
    assert_eq!(
        dirty.load(Ordering::Acquire) & nonmoving_gc::mark::MUTATOR_MARKING,
        nonmoving_gc::mark::MUTATOR_MARKING
    );
}

// Keep ObjectReference/Segment/ThreadRef referenced so the re-exports this
// suite depends on stay exercised even as individual scenarios evolve.
#[allow(dead_code)]
fn _type_smoke(_: ObjectReference, _: Segment, _: ThreadRef) {}
