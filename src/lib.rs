//! A concurrent, non-moving mark-and-sweep collector for the oldest
//! generation of a multi-generational managed runtime.
//!
//! The collector runs almost entirely concurrently with the mutator
//! threads it serves: a short stop-the-world pause takes a root-set
//! snapshot, a background worker traces the heap while mutators keep
//! running behind a write barrier, and a second short pause flushes the
//! barrier's remembered sets before the final sweep. Segments are never
//! moved or compacted; liveness is tracked with a per-block mark bitmap
//! that flips between two non-zero epoch values each cycle.
//!
//! The collector itself knows nothing about closures, thunks, or stacks as
//! concrete Rust types — every type-specific decision (how to find an
//! object's pointer fields, how to stop mutators, which pointers are heap
//! pointers) is delegated to the embedding runtime through the traits in
//! [`vm`]. An embedder implements [`vm::VMBinding`] once and drives
//! everything else through [`gc::NonMovingGc`].

pub mod barrier;
pub mod gc;
pub mod heap;
pub mod mark;
pub mod pool;
pub mod queue;
pub mod segment;
pub mod sweep;
pub mod util;
pub mod vm;
pub mod weak;

#[cfg(any(test, feature = "mock_test"))]
pub mod mock;

pub use gc::{NonMovingGc, SchedState};
pub use heap::Heap;
pub use pool::CapabilityId;
pub use queue::{Entry, GlobalUrs, MarkQueue};
pub use segment::{MarkEpoch, Segment, SegmentMap};
pub use util::{Address, ObjectReference, RawPtr, VMThread};
pub use vm::{
    BlockDescriptor, Field, HeapPredicate, ObjectTag, ObjectVisitor, PauseController, PauseReason, VMBinding,
};
pub use weak::{FixpointLists, ThreadRef, WeakPtr};
