//! Mark queue & update remembered set (spec.md §3, §4.5).
//!
//! Grounded in the teacher crate's `util::queue` (a block-chained work
//! queue consumed by GC workers) and `scheduler::work_bucket`'s
//! bounded-capacity packet model; the "splice a full local block into a
//! global chain under a lock" protocol is the same shape as
//! `scheduler::worker`'s local-to-global work stealing, specialised here to
//! the mark queue / URS's single-producer-per-capability, single-consumer
//! (the one mark worker) access pattern spec.md §5 describes.

use std::sync::Mutex;

use crate::util::address::Address;

/// One entry in the mark queue or an update remembered set (spec.md §3).
/// The spec's `NULL_ENTRY` sentinel — used there because C has no option
/// type — becomes `Option<Entry>` / an empty `Vec` throughout this module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Entry {
    /// A pointer slot to be traced, and (optionally) the slot's own address
    /// (used by the selector-thunk optimisation hook in push_closure).
    Closure { p: Address, origin: Option<Address> },
    /// A chunk of a pointer array still to be traced, starting at
    /// `start_index` (spec.md §4.3: chunked so work stays bounded per
    /// entry).
    Array { array: Address, start_index: usize },
}

/// The mark queue (spec.md §3, §4.3). Owned exclusively by the single
/// concurrent mark worker (spec.md §1 Non-goals: only one marker thread),
/// so its local stack needs no synchronization; only the handoff from the
/// global URS chain does.
pub struct MarkQueue {
    local: Vec<Entry>,
    /// Cross-check only: every closure address currently unprocessed in
    /// `local`, used to flag duplicate mark-queue entries under
    /// `extreme_assertions` (mirrors the teacher crate's own
    /// `extreme_assertions`-gated sanity passes, e.g. `util::edge_logger`).
    #[cfg(feature = "extreme_assertions")]
    pending_closures: std::collections::HashSet<Address>,
}

impl MarkQueue {
    pub fn new() -> Self {
        MarkQueue {
            local: Vec::new(),
            #[cfg(feature = "extreme_assertions")]
            pending_closures: std::collections::HashSet::new(),
        }
    }

    pub fn push_closure(&mut self, p: Address, origin: Option<Address>) {
        #[cfg(feature = "extreme_assertions")]
        if !self.pending_closures.insert(p) {
            log::trace!("extreme_assertions: duplicate mark-queue entry for {p:?} (already pending)");
        }
        self.local.push(Entry::Closure { p, origin });
    }

    pub fn push_array(&mut self, array: Address, start_index: usize) {
        self.local.push(Entry::Array { array, start_index });
    }

    /// Drain-loop pop (spec.md §4.3). When the local stack is empty, the
    /// caller should consult the global URS chain (`GlobalUrs::take_all`)
    /// before concluding marking is complete — mirroring the `NULL_ENTRY`
    /// handling rule.
    pub fn pop(&mut self) -> Option<Entry> {
        let entry = self.local.pop();
        #[cfg(feature = "extreme_assertions")]
        if let Some(Entry::Closure { p, .. }) = entry {
            self.pending_closures.remove(&p);
        }
        entry
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    /// Adopt a batch of entries stolen from the global URS chain as more
    /// local work.
    pub fn adopt(&mut self, blocks: Vec<Vec<Entry>>) {
        for mut block in blocks {
            #[cfg(feature = "extreme_assertions")]
            for entry in &block {
                if let Entry::Closure { p, .. } = entry {
                    self.pending_closures.insert(*p);
                }
            }
            self.local.append(&mut block);
        }
    }

    pub fn len(&self) -> usize {
        self.local.len()
    }
}

impl Default for MarkQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Capacity of one update-remembered-set block before it is spliced into
/// the global chain (spec.md §3, §6 `ALLOCA_CNT`-adjacent tunable; reuses
/// `QUEUE_BLOCK_CAPACITY`).
pub use crate::util::constants::QUEUE_BLOCK_CAPACITY;

/// A single capability's local update remembered set (spec.md §3, §4.5).
/// `push` is the write barrier's only per-overwrite cost on the fast path;
/// splicing a full block into the global chain is the (rare) slow path.
pub struct UpdateRemSet {
    local: Vec<Entry>,
    synced: bool,
}

impl UpdateRemSet {
    pub fn new() -> Self {
        UpdateRemSet {
            local: Vec::with_capacity(QUEUE_BLOCK_CAPACITY),
            synced: false,
        }
    }

    /// Push an entry, splicing the local block into `global` if it just
    /// filled up (spec.md §4.5: "When a mutator's URS block fills, it is
    /// spliced into a global list under a lock, and the mutator's queue
    /// reinitializes with a fresh block").
    pub fn push(&mut self, entry: Entry, global: &GlobalUrs) {
        #[cfg(feature = "extreme_assertions")]
        if let Entry::Closure { p, .. } = entry {
            if self.local.iter().any(|e| matches!(e, Entry::Closure { p: q, .. } if *q == p)) {
                log::trace!("extreme_assertions: redundant URS push for {p:?} in the same unflushed block");
            }
        }
        self.local.push(entry);
        self.synced = false;
        if self.local.len() >= QUEUE_BLOCK_CAPACITY {
            self.flush(global);
        }
    }

    /// Unconditionally splice whatever is locally queued into `global`.
    /// Used both by the fill-triggered flush above and by the final-flush
    /// protocol (spec.md §4.5 step 2), which must collect every
    /// capability's remaining entries regardless of block fill state.
    pub fn flush(&mut self, global: &GlobalUrs) {
        if !self.local.is_empty() {
            let block = std::mem::replace(&mut self.local, Vec::with_capacity(QUEUE_BLOCK_CAPACITY));
            global.splice(block);
        }
        self.synced = true;
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn mark_unsynced(&mut self) {
        self.synced = false;
    }
}

impl Default for UpdateRemSet {
    fn default() -> Self {
        Self::new()
    }
}

/// The global URS chain (spec.md §3, §5 `urs_lock`): a short critical
/// section under a plain mutex, matching the spec's own characterization
/// ("short critical section") rather than a lock-free structure.
pub struct GlobalUrs {
    chain: Mutex<Vec<Vec<Entry>>>,
}

impl GlobalUrs {
    pub fn new() -> Self {
        GlobalUrs {
            chain: Mutex::new(Vec::new()),
        }
    }

    pub fn splice(&self, block: Vec<Entry>) {
        if block.is_empty() {
            return;
        }
        self.chain.lock().unwrap().push(block);
    }

    /// Atomically detach and return the whole chain, for the mark worker
    /// to adopt into its local queue.
    pub fn take_all(&self) -> Vec<Vec<Entry>> {
        std::mem::take(&mut *self.chain.lock().unwrap())
    }

    pub fn is_empty(&self) -> bool {
        self.chain.lock().unwrap().is_empty()
    }
}

impl Default for GlobalUrs {
    fn default() -> Self {
        Self::new()
    }
}
