use thiserror::Error;

/// Errors reported by the allocator façade. Exhausting the page supply is
/// always recoverable, everything else is an invalid argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("out of memory: the page supply refused to grow the heap")]
    OutOfMemory,
    #[error("invalid alignment {0}: must be a power of two and at least 32")]
    InvalidAlignment(usize),
    #[error("invalid pointer {ptr:#x}: {reason}")]
    InvalidPointer { ptr: usize, reason: InvalidPointer },
}

impl AllocError {
    /// Whether this error was caused by the caller's arguments rather than
    /// by resource exhaustion.
    pub fn is_invalid_argument(&self) -> bool {
        !matches!(self, AllocError::OutOfMemory)
    }
}

/// Reason why a pointer handed back to the allocator was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidPointer {
    #[error("nothing has been allocated yet")]
    Uninitialized,
    #[error("not aligned to 8 bytes")]
    Misaligned,
    #[error("outside of the heap")]
    OutOfBounds,
    #[error("block size is corrupted")]
    BadSize,
    #[error("block is not allocated")]
    NotAllocated,
    #[error("block is already in a quick list")]
    InQuickList,
    #[error("previous block status doesn't match the header")]
    PrevAllocMismatch,
}

/// Inconsistency found while walking the heap. See
/// [`crate::Heap::check_invariants`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("heap corrupted at {offset:#x}: {reason}")]
pub struct HeapCorruption {
    pub offset: usize,
    pub reason: &'static str,
}
