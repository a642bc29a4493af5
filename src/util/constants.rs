//! Tunable constants (spec.md §6). All are compile-time defaults; `MAX_FREE`
//! additionally honors an environment-variable override the way the teacher
//! crate lets a handful of its own options be tuned from the environment.

use static_assertions::const_assert;

/// Size, in bytes, of one segment. Segments are self-aligned: a segment's
/// start address is always a multiple of `SEGMENT_SIZE`.
pub const SEGMENT_SIZE: usize = 4 << 20; // 4 MiB, matching GHC's NONMOVING_SEGMENT_SIZE order of magnitude.

/// log2(SEGMENT_SIZE).
pub const SEGMENT_SIZE_LOG2: usize = 22;
const_assert!(1usize << SEGMENT_SIZE_LOG2 == SEGMENT_SIZE);

/// Smallest size class, log2(bytes).
pub const MIN_LOG2: usize = 4; // 16 bytes

/// Largest size class handled by the segmented allocator (exclusive of large
/// objects, which are out of scope per spec.md §1).
pub const MAX_LOG2: usize = 12; // 4096 bytes

/// Number of distinct size-class allocator pools.
pub const ALLOCA_CNT: usize = MAX_LOG2 - MIN_LOG2 + 1;

/// Chunk length used when enqueuing large pointer arrays (spec.md §4.3).
pub const MARK_ARRAY_CHUNK_LENGTH: usize = 128;

/// Default high-water mark for the number of wholly-empty segments kept on
/// the global free list before segments are returned to the block allocator
/// (spec.md §3, §4.8; `NONMOVING_MAX_FREE` in the original source).
pub const DEFAULT_MAX_FREE: usize = 16;

pub fn max_free() -> usize {
    std::env::var("NONMOVING_GC_MAX_FREE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_MAX_FREE)
}

/// Number of entries held by one mark-queue / URS block.
pub const QUEUE_BLOCK_CAPACITY: usize = 256;

pub fn block_size_for(size_class: usize) -> usize {
    1usize << (MIN_LOG2 + size_class)
}

pub fn size_class_of(word_size_bytes: usize) -> usize {
    let log2 = ceil_log2(word_size_bytes);
    log2.saturating_sub(MIN_LOG2)
}

/// `ceil(log2(x))` for `x >= 1`.
pub fn ceil_log2(x: usize) -> usize {
    debug_assert!(x >= 1);
    let floor = usize::BITS as usize - 1 - x.leading_zeros() as usize;
    if x.is_power_of_two() {
        floor
    } else {
        floor + 1
    }
}
