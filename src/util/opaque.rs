//! Opaque handles exchanged with the rest of the runtime: object references,
//! raw (possibly tagged) pointers as the mutator sees them, and an opaque
//! per-mutator thread handle. Grounded in the teacher crate's
//! `util::ObjectReference` / `util::opaque_pointer` newtypes.

use crate::util::address::Address;
use std::fmt;

/// A pointer to a heap object, as produced by a mutator. May carry
/// low-order tag bits (the mutator's pointer-tagging scheme is out of scope
/// here; callers that need to interpret tags untag before calling into the
/// collector).
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub struct RawPtr(Address);

impl RawPtr {
    pub const NULL: RawPtr = RawPtr(Address::ZERO);

    #[inline]
    pub fn from_address(addr: Address) -> Self {
        RawPtr(addr)
    }

    #[inline]
    pub fn address(self) -> Address {
        self.0
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Debug for RawPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawPtr({:?})", self.0)
    }
}

/// A validated reference to a heap-allocated, untagged object. Obtained only
/// by untagging and validating a [`RawPtr`] against a [`HeapPredicate`].
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub struct ObjectReference(Address);

impl ObjectReference {
    #[inline]
    pub fn from_raw_address(addr: Address) -> Self {
        debug_assert!(!addr.is_zero());
        ObjectReference(addr)
    }

    #[inline]
    pub fn to_raw_address(self) -> Address {
        self.0
    }
}

impl fmt::Debug for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectReference({:?})", self.0)
    }
}

/// Opaque handle for a mutator's execution context, passed through to
/// collaborator callbacks but never interpreted by the collector itself.
#[derive(Copy, Clone, Eq, Hash, PartialEq, Debug)]
pub struct VMThread(pub usize);
