//! Support for strict memory alignment constraints. Every payload handed out
//! by [`Heap::allocate`] is 8-aligned because block sizes and headers are
//! multiples of 8. Anything stricter is obtained by over-allocating and then
//! giving back the misaligned front of the block:
//!
//! ```text
//!  block                           aligned block
//!    |                                   |
//!    v                                   v
//!    +----------------------------------++--------+-----------------------+
//!    |   front (>= MIN_BLOCK_SIZE)      || header | payload % align == 0  |  ...
//!    +----------------------------------++--------+-----------------------+
//!    ^                                   ^
//!    +--- back to the free lists         +--- split to the requested size
//! ```
//!
//! The front must be a valid block on its own, so when the payload is not
//! already aligned it's at least [`MIN_BLOCK_SIZE`] bytes and grows one word
//! at a time until the next payload lands on an aligned offset. Requesting
//! `size + align + MIN_BLOCK_SIZE` bytes guarantees there's always enough room
//! left behind the front.

use crate::{
    allocator::Heap,
    block::{block_size_for, Block, HeapPtr, HEADER_SIZE, MIN_BLOCK_SIZE, WORD_SIZE},
    coalesce,
    error::AllocError,
    header::Header,
    log::LogLevel,
    region::PageSource,
};

/// Alignments accepted by [`Heap::aligned_allocate`]: powers of two no smaller
/// than [`MIN_BLOCK_SIZE`].
#[inline]
pub(crate) fn is_valid_alignment(align: usize) -> bool {
    align.is_power_of_two() && align >= MIN_BLOCK_SIZE
}

impl<S: PageSource> Heap<S> {
    /// Returns a handle to at least `size` bytes whose offset is a multiple of
    /// `align`, or `None` if `size` is 0. `align` must be a power of two and
    /// at least [`MIN_BLOCK_SIZE`].
    pub fn aligned_allocate(&mut self, size: usize, align: usize) -> Result<Option<HeapPtr>, AllocError> {
        if !is_valid_alignment(align) {
            self.log
                .record(LogLevel::Warn, "memalign", "memalign", None, Some(align), "invalid_alignment");
            return Err(AllocError::InvalidAlignment(align));
        }

        if size == 0 {
            return Ok(None);
        }

        let padded = block_size_for(size).and_then(|target| {
            let request = target.checked_add(align)?.checked_add(MIN_BLOCK_SIZE - HEADER_SIZE)?;
            Some((target, request))
        });

        let Some((target, request)) = padded else {
            self.log.record(LogLevel::Warn, "memalign", "memalign", None, Some(size), "oom");
            return Err(AllocError::OutOfMemory);
        };

        let block = self.allocate_block(request, "memalign")?;

        let Some(aligned) = self.trim_front(block, target, align) else {
            self.release(block, "memalign");
            self.log.record(LogLevel::Warn, "memalign", "memalign", None, Some(size), "oom");
            return Err(AllocError::OutOfMemory);
        };

        let mem = self.source.memory_mut();
        let aligned = coalesce::split(&mut self.free_lists, mem, aligned, target);

        self.log.record(
            LogLevel::Trace,
            "memalign",
            "memalign",
            Some(aligned.payload().offset()),
            Some(size),
            "aligned",
        );

        Ok(Some(aligned.payload()))
    }

    /// Frees the front of `block` so that the remaining block has an aligned
    /// payload. Returns `None` without touching anything if what's left
    /// wouldn't fit `target` bytes.
    fn trim_front(&mut self, block: Block, target: usize, align: usize) -> Option<Block> {
        if block.payload().is_aligned_to(align) {
            return Some(block);
        }

        let mem = self.source.memory_mut();
        let header = block.header(mem);
        let total = header.size();

        let mut front = MIN_BLOCK_SIZE;
        while !HeapPtr::from_offset(block.offset() + front + HEADER_SIZE).is_aligned_to(align) {
            front += WORD_SIZE;
        }

        if front > total || total - front < target.max(MIN_BLOCK_SIZE) {
            return None;
        }

        let aligned = Block::at(block.offset() + front);
        aligned.set_header(mem, Header::encode(total - front, true, false, false));
        block.set_header(mem, Header::encode(front, false, header.is_prev_allocated(), false));
        block.write_footer(mem);
        self.free_lists.insert(mem, block);

        Some(aligned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::BlockKind, region::PAGE_SIZE};

    #[test]
    fn valid_alignments() {
        assert!(is_valid_alignment(32));
        assert!(is_valid_alignment(64));
        assert!(is_valid_alignment(PAGE_SIZE));
        assert!(!is_valid_alignment(0));
        assert!(!is_valid_alignment(8));
        assert!(!is_valid_alignment(16));
        assert!(!is_valid_alignment(48));
    }

    #[test]
    fn rejects_bad_alignments() {
        let mut heap = Heap::new();
        assert_eq!(heap.aligned_allocate(8, 16), Err(AllocError::InvalidAlignment(16)));
        assert_eq!(heap.aligned_allocate(8, 96), Err(AllocError::InvalidAlignment(96)));
        assert!(AllocError::InvalidAlignment(16).is_invalid_argument());
        assert_eq!(heap.aligned_allocate(0, 64), Ok(None));
    }

    #[test]
    fn every_power_of_two() {
        let mut heap = Heap::new();
        let mut align = MIN_BLOCK_SIZE;

        while align <= PAGE_SIZE {
            for size in [1, 24, 100, 1000] {
                let ptr = heap.aligned_allocate(size, align).unwrap().unwrap();
                assert!(ptr.is_aligned_to(align), "{ptr:?} not aligned to {align}");
                assert!(heap.usable_size(ptr).unwrap() >= size);
                heap.payload_mut(ptr).unwrap()[..size].fill(0xAB);
                assert_eq!(heap.check_invariants(), Ok(()));
                heap.free(ptr);
            }
            align *= 2;
        }

        assert_eq!(heap.check_invariants(), Ok(()));
    }

    #[test]
    fn front_goes_back_to_free_lists() {
        let mut heap = Heap::new();

        // First payload is at 40, so 64 alignment needs a front block.
        let ptr = heap.aligned_allocate(100, 64).unwrap().unwrap();
        assert_eq!(ptr.offset() % 64, 0);

        let blocks: Vec<_> = heap.blocks().take(3).collect();
        assert_eq!(blocks[0].kind, BlockKind::Free);
        assert_eq!(blocks[1].payload(), ptr);
        assert_eq!(blocks[1].kind, BlockKind::Allocated);
        assert!(!blocks[1].prev_allocated);
        // Front of 88 bytes out of 208 leaves 120, and 8 extra bytes are too
        // few to split off.
        assert_eq!(blocks[0].size, 88);
        assert_eq!(blocks[1].size, 120);
        assert_eq!(blocks[2].kind, BlockKind::Free);
    }

    #[test]
    fn already_aligned_payload_is_split() {
        let mut heap = Heap::new();
        // Payload at 40, block of 56 bytes, next payload at 96 which is
        // 32-aligned.
        heap.allocate(48).unwrap().unwrap();

        let ptr = heap.aligned_allocate(24, 32).unwrap().unwrap();
        assert_eq!(ptr.offset(), 96);
        assert_eq!(heap.usable_size(ptr), Ok(24));
        assert_eq!(heap.check_invariants(), Ok(()));
    }
}
