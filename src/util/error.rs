//! Error handling (spec.md §7). Programming-error faults and resource
//! exhaustion are both fatal; the only recoverable condition is a mid-cycle
//! shutdown, which is represented as collector state rather than an error.

use std::fmt;

/// The collector's one fallible boundary: asking the underlying block
/// allocator for a fresh, aligned group of memory to back a new segment.
/// Everything else the collector does is either infallible or a
/// programming-error fault raised through [`fatal`].
#[derive(thiserror::Error, Debug)]
pub enum GcError {
    #[error("block allocator could not satisfy a request for {requested_bytes} bytes aligned to {align}")]
    SegmentAllocationFailed {
        requested_bytes: usize,
        align: usize,
    },
}

/// Raise a fatal, unrecoverable collector fault: an invariant violation that
/// indicates a bug in the collector or in a collaborator, per spec.md §7.1.
/// Logs at `error!` level before aborting the process via `panic!`, matching
/// the teacher crate's convention of centralizing its fatal-error call sites
/// rather than scattering ad hoc `panic!`s.
#[cold]
#[inline(never)]
pub fn fatal(msg: impl fmt::Display) -> ! {
    log::error!("nonmoving-gc: fatal error: {msg}");
    panic!("nonmoving-gc: fatal error: {msg}");
}
