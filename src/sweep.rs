//! Sweep (spec.md §4.8): runs once all mutators have been released,
//! reclassifying every segment spliced onto the global sweep list, plus the
//! large-object, mutation-list, and stable-name-table companion passes.
//!
//! Grounded in the teacher crate's `policy::marksweepspace::native_ms`
//! sweep work packets (`SweepChunk`, `generate_sweep_tasks`), which
//! classify blocks the same three ways (`BlockState::{Unallocated,
//! Marked, Reusable}`) this module's `SweepResult` mirrors.

use crate::heap::Heap;
use crate::segment::Segment;
use crate::util::constants::MIN_LOG2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepResult {
    /// No cell equals the mark epoch: fully dead, returned to the free pool.
    Free,
    /// At least one cell marked and at least one not.
    Partial,
    /// Every cell marked: stays in rotation for next cycle's `filled` list.
    Filled,
}

/// `prepare_sweep()` (spec.md §4.8): splice every allocator pool's `filled`
/// list onto `heap.sweep_list`, via the CAS-detach `take_all` already used
/// for other segment-list handoffs.
pub fn prepare_sweep(heap: &Heap) {
    for pool in heap.pools() {
        let mut next = pool.filled.take_all();
        while let Some(seg) = next {
            next = seg.link();
            heap.sweep_list.push(seg);
        }
    }
}

fn size_class_of_segment(seg: Segment) -> usize {
    seg.block_size_log2() as usize - MIN_LOG2
}

/// Classify and rethread one segment (spec.md §4.8).
pub fn sweep_segment(seg: Segment, epoch: u8, heap: &Heap) -> SweepResult {
    let count = seg.block_count();
    let mut any_marked = false;
    let mut first_unmarked = None;
    for i in 0..count {
        if seg.bit(i) == epoch {
            any_marked = true;
        } else if first_unmarked.is_none() {
            first_unmarked = Some(i);
        }
    }
    let size_class = size_class_of_segment(seg);

    if !any_marked {
        heap.push_free_segment(seg, size_class);
        return SweepResult::Free;
    }
    match first_unmarked {
        Some(idx) => {
            seg.set_next_free(idx);
            seg.snapshot_next_free();
            heap.pool(size_class).active.push(seg);
            SweepResult::Partial
        }
        None => {
            heap.pool(size_class).filled.push(seg);
            SweepResult::Filled
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub freed: usize,
    pub partial: usize,
    pub filled: usize,
}

/// `sweep()` (spec.md §4.8): drain `heap.sweep_list` entirely, classifying
/// and rethreading every segment on it.
pub fn sweep(heap: &Heap, epoch: u8) -> SweepStats {
    let mut stats = SweepStats::default();
    let mut next = heap.sweep_list.take_all();
    while let Some(seg) = next {
        next = seg.link();
        match sweep_segment(seg, epoch, heap) {
            SweepResult::Free => stats.freed += 1,
            SweepResult::Partial => stats.partial += 1,
            SweepResult::Filled => stats.filled += 1,
        }
    }
    stats
}

/// `sweep_large_objects()` (spec.md §4.8): replace the live-snapshot list
/// with the marked list. Delegates to `LargeObjectSet::sweep`, which this
/// crate already keeps next to the rest of the large-object bookkeeping in
/// `heap.rs` rather than duplicating the locking here.
pub fn sweep_large_objects(heap: &Heap) -> usize {
    heap.large_objects.sweep()
}

/// `sweep_mut_lists()` (spec.md §4.8): for each capability's young-gen
/// mutation list, keep only entries pointing at objects that survived this
/// cycle. The mutation list's entry representation belongs to the (out of
/// scope, spec.md §1) young-generation collaborator, so this is generic
/// over it; the collaborator supplies the liveness check.
pub fn sweep_mut_lists<T>(per_capability: &mut [Vec<T>], mut is_live: impl FnMut(&T) -> bool) {
    for list in per_capability.iter_mut() {
        list.retain(|entry| is_live(entry));
    }
}

/// `sweep_stable_name_table()` (spec.md §4.8): drop any stable-name entry
/// whose referent did not survive this cycle.
pub fn sweep_stable_name_table<T>(table: &mut Vec<T>, mut is_live: impl FnMut(&T) -> bool) {
    table.retain(|entry| is_live(entry));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_segment_with_no_marks_goes_free() {
        let heap = Heap::new(1);
        let seg = Segment::allocate_fresh(0);
        let before = heap.n_free();
        assert_eq!(sweep_segment(seg, 1, &heap), SweepResult::Free);
        assert_eq!(heap.n_free(), before + 1);
    }

    #[test]
    fn a_fully_marked_segment_goes_filled() {
        let heap = Heap::new(1);
        let seg = Segment::allocate_fresh(0);
        for i in 0..seg.block_count() {
            seg.mark_bit(i, 1);
        }
        assert_eq!(sweep_segment(seg, 1, &heap), SweepResult::Filled);
        assert!(!heap.pool(0).filled.is_empty());
    }

    #[test]
    fn a_partially_marked_segment_resumes_at_the_first_unmarked_block() {
        let heap = Heap::new(1);
        let seg = Segment::allocate_fresh(0);
        seg.mark_bit(0, 1);
        seg.mark_bit(1, 1);
        assert_eq!(sweep_segment(seg, 1, &heap), SweepResult::Partial);
        assert_eq!(seg.next_free(), 2);
        assert_eq!(seg.next_free_snap(), 2);
    }

    #[test]
    fn prepare_sweep_moves_every_pools_filled_list_onto_the_sweep_list() {
        let heap = Heap::new(1);
        let seg = Segment::allocate_fresh(0);
        heap.pool(0).filled.push(seg);
        assert!(heap.sweep_list.is_empty());
        prepare_sweep(&heap);
        assert!(!heap.sweep_list.is_empty());
        assert!(heap.pool(0).filled.is_empty());
    }

    #[test]
    fn sweep_large_objects_keeps_only_marked_entries() {
        let heap = Heap::new(1);
        let a = crate::util::address::Address::from_usize(0x10_0000);
        let b = crate::util::address::Address::from_usize(0x20_0000);
        heap.large_objects.register(a);
        heap.large_objects.register(b);
        heap.large_objects.prepare();
        heap.large_objects.mark(a);
        let reclaimed = sweep_large_objects(&heap);
        assert_eq!(reclaimed, 1);
        assert!(heap.large_objects.is_alive(a));
    }

    #[test]
    fn mut_list_sweep_drops_dead_entries() {
        let mut lists = vec![vec![1, 2, 3], vec![4, 5]];
        sweep_mut_lists(&mut lists, |e| e % 2 == 0);
        assert_eq!(lists, vec![vec![2], vec![4]]);
    }
}
