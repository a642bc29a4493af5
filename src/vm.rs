//! Collaborator traits (SPEC_FULL.md §4.9): the seams spec.md §1 scopes out
//! as external to this core — heap-membership/block-descriptor lookup, the
//! stop-the-world pause mechanism, and polymorphic object traversal.
//! Grounded in the teacher crate's `vm::{ObjectModel, Scanning, Collection,
//! ActivePlan}` trait family (`src/vm/*.rs`), which plays exactly this role
//! for `mmtk-core`: one trait per collaborator concern, implemented once by
//! each embedding VM.

use crate::util::address::Address;
use crate::util::opaque::{ObjectReference, RawPtr, VMThread};

/// Runtime type tag used to dispatch `ObjectVisitor::for_each_pointer_field`
/// (spec.md §4.3's type-dispatch policy table). Kept as a closed,
/// exhaustively-matched enum per the Design Note in spec.md §9.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectTag {
    Constructor,
    Primitive,
    Weak,
    Thunk,
    Function,
    ArrayOfPointers,
    SmallArrayOfPointers,
    Indirection,
    BlackHole,
    MutableVariable,
    BlockingQueue,
    PartialApplication,
    GeneralApplication,
    ByteCode,
    TransactionalRecord,
    Stack,
    SelectorThunk,
    WhiteHole,
    /// Pinned memory attached to a capability; never traced (spec.md §4.3:
    /// "cannot contain pointers into the non-moving region by construction").
    Pinned,
}

/// One field visited during traversal: either a pointer the collector must
/// enqueue, or an opaque raw word the collector must ignore.
#[derive(Clone, Copy, Debug)]
pub enum Field {
    Pointer(RawPtr),
    /// A chunked pointer array, enqueued as an `Array` mark-queue entry
    /// rather than one `Field::Pointer` per slot (spec.md §4.3).
    ArrayChunk { array: Address, start_index: usize },
    Raw,
}

/// The external block descriptor for a heap pointer (spec.md §1: "the core
/// consumes ... a `block_descriptor(p)` lookup"). Only the one flag the
/// collector itself ever inspects — invariant 2's non-moving marker — is
/// surfaced here; the rest of a real descriptor (size class, generation,
/// large-object bookkeeping) belongs entirely to the collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub non_moving: bool,
}

/// `is_heap_allocated` / `block_descriptor` (spec.md §1, §6): the minimal
/// surface this crate needs from the rest of the allocator to classify a
/// bare pointer.
pub trait HeapPredicate: Send + Sync {
    fn is_heap_allocated(&self, p: RawPtr) -> bool;
    /// Does the block descriptor for `p` carry the non-moving marker
    /// (spec.md §3 invariant 2)? Debug-mode collaborators may use this to
    /// cross-check `SegmentMap` lookups; production collaborators may
    /// return `true` unconditionally once `is_heap_allocated` holds.
    fn is_non_moving(&self, p: RawPtr) -> bool;
    /// Is `p` a static closure (a CAF)? Static closures have no bitmap and
    /// are deduplicated via a hash set instead (spec.md §3, §4.3).
    fn is_static(&self, p: RawPtr) -> bool;
    /// The full block descriptor lookup (spec.md §1). Used by the mark
    /// engine to report what the descriptor actually says when a pointer
    /// claims non-moving heap membership but `SegmentMap` disagrees — the
    /// fatal fault spec.md §7.1 names explicitly ("a pointer that claims to
    /// be in the non-moving region but whose block descriptor disagrees").
    fn block_descriptor(&self, p: RawPtr) -> BlockDescriptor;
}

/// A reason passed to the external pause mechanism, so logs/telemetry in
/// the collaborator can distinguish why mutators were stopped (spec.md §4.5
/// step 1: `FLUSH_URS`; spec.md §5: root-scan).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PauseReason {
    RootScan,
    FlushUrs,
}

/// The external stop-the-world mechanism (spec.md §1, §5). The scheduler
/// collaborator this trait represents also owns root enumeration (spec.md
/// §2 step 2 "Seed"), since knowing a capability's root set, the static
/// CAF list, and the stable-pointer table is exactly the kind of runtime
/// bookkeeping this core treats as external.
pub trait PauseController: Send + Sync {
    fn stop_all_mutators(&self, reason: PauseReason);
    fn release_all_mutators(&self);
    /// Number of mutator capabilities currently registered. Used by the
    /// flush protocol to know how many URS flushes to wait for (spec.md
    /// §4.5 step 3).
    fn capability_count(&self) -> usize;

    /// Enumerate every root as of right now: per-capability root sets,
    /// static closures, the stable-pointer table (spec.md §2 step 2).
    /// Called with mutators already stopped for the short initial
    /// root-scan (spec.md §5).
    fn for_each_root(&self, visit: &mut dyn FnMut(RawPtr));
}

/// Polymorphic object traversal (spec.md §1, §4.3). Implementations decode
/// whatever info-table / tag scheme the embedding runtime uses and invoke
/// `visit` once per pointer field (or once per array chunk for large
/// pointer arrays).
pub trait ObjectVisitor: Send + Sync {
    fn tag_of(&self, obj: ObjectReference) -> ObjectTag;

    /// Visit every field of `obj` per the type-dispatch table in spec.md
    /// §4.3. Implementations must call `visit` once per pointer field (in
    /// any order local to a single object; cross-object ordering is the
    /// mark engine's responsibility) and must never recurse here — the
    /// mark engine, not the visitor, drives the traversal fixpoint.
    fn for_each_pointer_field(&self, obj: ObjectReference, visit: &mut dyn FnMut(Field));

    /// The stack-dirtiness handshake (spec.md §4.4) applies only to
    /// `ObjectTag::Stack` objects; this hook lets the visitor report the
    /// packed `dirty` word so the mark engine can perform the two-bit
    /// protocol without needing its own side channel into the object
    /// representation.
    fn stack_dirty_flags(&self, obj: ObjectReference) -> &std::sync::atomic::AtomicU8;

    /// Number of slots in a pointer array (spec.md §4.3: arrays are traced
    /// via chunked `Array` mark-queue entries rather than one `Field` per
    /// slot).
    fn array_length(&self, array: ObjectReference) -> usize;

    /// Read slot `index` of a pointer array.
    fn array_slot(&self, array: ObjectReference, index: usize) -> RawPtr;
}

/// Bundles the three collaborator traits into the single type parameter
/// `NonMovingGc` is generic over (spec.md §9 "Global state": one value, one
/// set of references, no scattered collaborator handles). Grounded in the
/// teacher crate's own `VMBinding` supertrait, which bundles
/// `ObjectModel`/`Scanning`/`Collection`/`ActivePlan` the same way for
/// exactly the same reason: most embedders implement every collaborator
/// concern on one type anyway.
pub trait VMBinding: HeapPredicate + PauseController + ObjectVisitor {}

impl<T: HeapPredicate + PauseController + ObjectVisitor> VMBinding for T {}
