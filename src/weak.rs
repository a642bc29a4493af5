//! Weak-pointer and thread resurrection fixpoint (spec.md §4.6). Interacts
//! with marking because a weak's value only becomes reachable once its key
//! is known live, and a thread is itself a GC root only while runnable.
//!
//! Grounded in the teacher crate's `util::finalizable_processor` (the
//! generic "process a to-finalize candidate list to a fixpoint, moving
//! survivors, retrying dead ones next round" shape), specialised to the
//! key/value/finalizer triple and thread-liveness rules spec.md §4.6 and
//! §4.7 describe.

use crate::mark::MarkEngine;
use crate::queue::{GlobalUrs, MarkQueue};
use crate::util::opaque::RawPtr;

/// A registered weak pointer (spec.md §3, §4.6).
#[derive(Clone, Debug)]
pub struct WeakPtr {
    pub key: RawPtr,
    pub value: RawPtr,
    pub finalizer: RawPtr,
    pub c_finalizers: Vec<RawPtr>,
}

/// A runnable thread reachable only via the scheduler's thread list
/// (spec.md §4.6).
#[derive(Clone, Copy, Debug)]
pub struct ThreadRef(pub RawPtr);

/// The lists the fixpoint walks and rebuilds each cycle (spec.md §4.6:
/// `old_threads`/`threads`, `old_weak_ptrs`/`weak_ptrs`,
/// `dead_weak_ptr_list`).
pub struct FixpointLists {
    old_threads: Vec<ThreadRef>,
    threads: Vec<ThreadRef>,
    old_weak_ptrs: Vec<WeakPtr>,
    weak_ptrs: Vec<WeakPtr>,
    dead_weak_ptr_list: Vec<WeakPtr>,
}

impl FixpointLists {
    /// Seed from the previous cycle's surviving threads/weaks (spec.md §2
    /// step 2 "Seed": the scheduler's thread list and weak list feed
    /// `old_threads`/`old_weak_ptrs` at the start of every cycle).
    pub fn new(threads: Vec<ThreadRef>, weak_ptrs: Vec<WeakPtr>) -> Self {
        FixpointLists {
            old_threads: threads,
            threads: Vec::new(),
            old_weak_ptrs: weak_ptrs,
            weak_ptrs: Vec::new(),
            dead_weak_ptr_list: Vec::new(),
        }
    }

    pub fn threads(&self) -> &[ThreadRef] {
        &self.threads
    }

    pub fn weak_ptrs(&self) -> &[WeakPtr] {
        &self.weak_ptrs
    }

    pub fn dead_weak_ptr_list(&self) -> &[WeakPtr] {
        &self.dead_weak_ptr_list
    }
}

/// Run the repeat-until-stable fixpoint (spec.md §4.6 steps 1-4), then the
/// final post-fixpoint resurrection/dead-weak pass.
pub fn run_fixpoint(
    engine: &MarkEngine,
    queue: &mut MarkQueue,
    global: &GlobalUrs,
    lists: &mut FixpointLists,
) {
    loop {
        engine.mark(queue, global);

        let mut progress = false;

        let mut still_old_threads = Vec::new();
        for t in lists.old_threads.drain(..) {
            if engine.is_alive(t.0) {
                lists.threads.push(t);
                progress = true;
            } else {
                still_old_threads.push(t);
            }
        }
        lists.old_threads = still_old_threads;

        let mut still_old_weaks = Vec::new();
        for w in lists.old_weak_ptrs.drain(..) {
            if engine.is_alive(w.key) {
                queue.push_closure(w.value.address(), None);
                queue.push_closure(w.finalizer.address(), None);
                for cf in &w.c_finalizers {
                    queue.push_closure(cf.address(), None);
                }
                lists.weak_ptrs.push(w);
                progress = true;
            } else {
                still_old_weaks.push(w);
            }
        }
        lists.old_weak_ptrs = still_old_weaks;

        if !progress {
            break;
        }
    }

    // Final post-fixpoint (spec.md §4.6): resurrect everything still on
    // `old_threads` — a thread is kept alive regardless of reachability so
    // its exception/finalizer machinery can still run — then drain once
    // more, then dispatch dead weaks.
    for t in lists.old_threads.drain(..) {
        queue.push_closure(t.0.address(), None);
        lists.threads.push(t);
    }
    engine.mark(queue, global);

    for w in lists.old_weak_ptrs.drain(..) {
        queue.push_closure(w.finalizer.address(), None);
        if !w.c_finalizers.is_empty() {
            queue.push_closure(w.value.address(), None);
        }
        lists.dead_weak_ptr_list.push(w);
    }
    engine.mark(queue, global);
}
