use std::cmp::Ordering;

use crate::{
    allocator::Heap,
    block::{block_size_for, HeapPtr, HEADER_SIZE},
    coalesce,
    error::AllocError,
    log::LogLevel,
    region::PageSource,
};

/// What a resize has to do with the block, decided by comparing block sizes
/// rather than requested sizes. Asking for 20 bytes instead of 10 needs no
/// work at all since both fit in a [`crate::MIN_BLOCK_SIZE`] block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Resize {
    /// Needs a bigger block, contents are moved.
    Grow,
    /// Block already has the exact size.
    Same,
    /// Block is cut down in place, see [`coalesce::split`].
    Shrink,
}

impl Resize {
    pub fn new(current_size: usize, new_size: usize) -> Self {
        match new_size.cmp(&current_size) {
            Ordering::Greater => Resize::Grow,
            Ordering::Equal => Resize::Same,
            Ordering::Less => Resize::Shrink,
        }
    }

    fn outcome(self) -> &'static str {
        match self {
            Resize::Grow => "grow",
            Resize::Same => "same",
            Resize::Shrink => "shrink",
        }
    }
}

impl<S: PageSource> Heap<S> {
    /// Changes the size of the allocation at `ptr` to `size` bytes and
    /// returns its new handle. Contents are preserved up to the smaller of the
    /// two sizes:
    ///
    /// - Growing allocates a new block, copies the payload and frees the old
    /// one. If that allocation fails the old block is left untouched.
    ///
    /// - Shrinking happens in place, the tail goes back to the free lists
    /// unless it's too small to be a block of its own.
    ///
    /// - A `size` of 0 frees the block and returns `None`.
    ///
    /// Unlike [`Heap::free`], invalid pointers are reported as errors.
    pub fn resize(&mut self, ptr: HeapPtr, size: usize) -> Result<Option<HeapPtr>, AllocError> {
        let block = self.checked(ptr, "realloc")?;

        if size == 0 {
            self.release(block, "realloc");
            self.log.record(LogLevel::Trace, "realloc", "resize", Some(ptr.offset()), Some(0), "free");
            return Ok(None);
        }

        let Some(new_size) = block_size_for(size) else {
            self.log.record(LogLevel::Warn, "realloc", "resize", Some(ptr.offset()), Some(size), "oom");
            return Err(AllocError::OutOfMemory);
        };

        let current_size = block.size(self.source.memory());
        let method = Resize::new(current_size, new_size);

        let new_ptr = match method {
            Resize::Grow => {
                let new_block = self.allocate_block(size, "realloc")?;
                let count = (current_size - HEADER_SIZE).min(size);
                let from = ptr.offset();
                self.source
                    .memory_mut()
                    .copy_within(from..from + count, new_block.payload().offset());
                self.release(block, "realloc");

                new_block.payload()
            }
            Resize::Same => ptr,
            Resize::Shrink => {
                let mem = self.source.memory_mut();
                coalesce::split(&mut self.free_lists, mem, block, new_size).payload()
            }
        };

        self.log.record(
            LogLevel::Trace,
            "realloc",
            "resize",
            Some(new_ptr.offset()),
            Some(size),
            method.outcome(),
        );

        Ok(Some(new_ptr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::{BlockKind, MIN_BLOCK_SIZE},
        config::HeapConfig,
        error::InvalidPointer,
    };

    #[test]
    fn resize_methods() {
        assert_eq!(Resize::new(32, 64), Resize::Grow);
        assert_eq!(Resize::new(64, 64), Resize::Same);
        assert_eq!(Resize::new(64, 32), Resize::Shrink);
    }

    #[test]
    fn grow_moves_contents() {
        let mut heap = Heap::new();
        let ptr = heap.allocate(16).unwrap().unwrap();
        // Keep the neighbour busy so the block can't be reused in place.
        let fence = heap.allocate(16).unwrap().unwrap();
        heap.payload_mut(ptr).unwrap()[..16].copy_from_slice(b"0123456789abcdef");

        let new_ptr = heap.resize(ptr, 200).unwrap().unwrap();
        assert_ne!(new_ptr, ptr);
        assert_eq!(&heap.payload(new_ptr).unwrap()[..16], b"0123456789abcdef");
        assert!(heap.usable_size(new_ptr).unwrap() >= 200);

        // The old block is gone.
        assert!(heap.usable_size(ptr).is_err());
        heap.free(fence);
        assert_eq!(heap.check_invariants(), Ok(()));
    }

    #[test]
    fn same_block_size_keeps_pointer() {
        let mut heap = Heap::new();
        let ptr = heap.allocate(10).unwrap().unwrap();

        assert_eq!(heap.resize(ptr, 20), Ok(Some(ptr)));
        assert_eq!(heap.resize(ptr, 24), Ok(Some(ptr)));
        assert_eq!(heap.usable_size(ptr), Ok(MIN_BLOCK_SIZE - HEADER_SIZE));
    }

    #[test]
    fn shrink_in_place() {
        let mut heap = Heap::new();
        let ptr = heap.allocate(500).unwrap().unwrap();
        let fence = heap.allocate(8).unwrap().unwrap();
        heap.payload_mut(ptr).unwrap()[..4].copy_from_slice(b"abcd");

        assert_eq!(heap.resize(ptr, 100), Ok(Some(ptr)));
        assert_eq!(heap.usable_size(ptr), Ok(104));
        assert_eq!(&heap.payload(ptr).unwrap()[..4], b"abcd");

        // Tail became a free block right after the shrunk one.
        let blocks: Vec<_> = heap.blocks().take(3).map(|info| (info.size, info.kind)).collect();
        assert_eq!(
            blocks,
            vec![(112, BlockKind::Allocated), (400, BlockKind::Free), (32, BlockKind::Allocated)]
        );

        // 112 -> 96 would leave a 16 byte splinter, so nothing changes.
        assert_eq!(heap.resize(ptr, 88), Ok(Some(ptr)));
        assert_eq!(heap.usable_size(ptr), Ok(104));

        heap.free(fence);
        assert_eq!(heap.check_invariants(), Ok(()));
    }

    #[test]
    fn resize_to_zero_frees() {
        let mut heap = Heap::new();
        let ptr = heap.allocate(8).unwrap().unwrap();

        assert_eq!(heap.resize(ptr, 0), Ok(None));
        assert!(matches!(
            heap.resize(ptr, 8),
            Err(AllocError::InvalidPointer {
                reason: InvalidPointer::InQuickList,
                ..
            })
        ));
    }

    #[test]
    fn failed_grow_keeps_original() {
        let mut heap = Heap::with_config(HeapConfig::new().with_max_pages(1));
        let ptr = heap.allocate(100).unwrap().unwrap();
        heap.payload_mut(ptr).unwrap().fill(7);

        assert_eq!(heap.resize(ptr, 8000), Err(AllocError::OutOfMemory));
        assert!(heap.payload(ptr).unwrap().iter().all(|byte| *byte == 7));
        assert_eq!(heap.check_invariants(), Ok(()));
    }

    #[test]
    fn invalid_pointers_are_errors() {
        let mut heap = Heap::new();
        assert!(matches!(
            heap.resize(HeapPtr::from_offset(40), 8),
            Err(AllocError::InvalidPointer {
                reason: InvalidPointer::Uninitialized,
                ..
            })
        ));
    }
}
