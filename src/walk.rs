//! Heap inspection. The heap is self describing: starting right after the
//! prologue, every header tells where the next one is, all the way to the
//! epilogue. Nothing here modifies the heap.

use crate::{
    allocator::Heap,
    block::{read_word, Block, BlockKind, HeapPtr, MIN_BLOCK_SIZE, WORD_SIZE},
    error::HeapCorruption,
    freelist::{bucket_for, NUM_FREE_LISTS},
    header::Header,
    heap::{self, FIRST_BLOCK, PROLOGUE},
    quicklist::{index_for, NUM_QUICK_LISTS},
    region::{PageSource, PAGE_SIZE},
};

/// Snapshot of one block found by [`Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the block header.
    pub offset: usize,
    /// Total block size, header included.
    pub size: usize,
    pub kind: BlockKind,
    /// Value of the `PREV_ALLOC` bit.
    pub prev_allocated: bool,
}

impl BlockInfo {
    /// Handle to the payload of this block.
    pub fn payload(&self) -> HeapPtr {
        Block::at(self.offset).payload()
    }
}

/// Usage numbers computed by [`Heap::stats`]. Byte counts are block sizes,
/// so they include headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub heap_size: usize,
    pub pages: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub quick_blocks: usize,
    pub quick_bytes: usize,
    /// Number of blocks in each segregated free list.
    pub free_list_lengths: [usize; NUM_FREE_LISTS],
    /// Number of blocks parked in each quick list.
    pub quick_list_lengths: [usize; NUM_QUICK_LISTS],
}

impl<S: PageSource> Heap<S> {
    /// Iterates over every block between the prologue and the epilogue in
    /// address order. Yields nothing if the heap is not initialized. The walk
    /// stops early at a block whose size can't be right, use
    /// [`Self::check_invariants`] to find out why.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        let mem = self.source.memory();
        let epilogue = self.initialized.then(|| heap::epilogue(self.source.end()));
        let mut current = epilogue.map(|_| FIRST_BLOCK);

        std::iter::from_fn(move || {
            let block = current?;
            let epilogue = epilogue?;
            if block.offset() >= epilogue.offset() {
                return None;
            }

            let (size, flags) = block.header(mem).decode();
            current = (size >= MIN_BLOCK_SIZE).then(|| block.next(mem));

            Some(BlockInfo {
                offset: block.offset(),
                size,
                kind: block.kind(mem),
                prev_allocated: flags.prev_alloc,
            })
        })
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            heap_size: self.heap_size(),
            pages: self.heap_size() / PAGE_SIZE,
            ..Default::default()
        };

        for info in self.blocks() {
            match info.kind {
                BlockKind::Allocated => {
                    stats.allocated_blocks += 1;
                    stats.allocated_bytes += info.size;
                }
                BlockKind::Free => {
                    stats.free_blocks += 1;
                    stats.free_bytes += info.size;
                }
                BlockKind::Quick => {
                    stats.quick_blocks += 1;
                    stats.quick_bytes += info.size;
                }
            }
        }

        let mem = self.source.memory();
        for (index, length) in stats.free_list_lengths.iter_mut().enumerate() {
            *length = self.free_lists.len(mem, index);
        }

        for (index, length) in stats.quick_list_lengths.iter_mut().enumerate() {
            *length = self.quick_lists.len(index);
        }

        stats
    }

    /// Walks the whole heap and every list checking that:
    ///
    /// - Every block size is a multiple of 8 and at least [`MIN_BLOCK_SIZE`].
    /// - No two plain free blocks are next to each other.
    /// - Every `PREV_ALLOC` bit matches the previous block.
    /// - Plain free blocks, and only those, have a footer equal to the header.
    /// - Prologue and epilogue are allocated.
    /// - Free lists hold exactly the plain free blocks, each in its own size
    /// class, and quick lists hold exactly the quick listed blocks.
    ///
    /// An uninitialized heap is always consistent.
    pub fn check_invariants(&self) -> Result<(), HeapCorruption> {
        if !self.initialized {
            return Ok(());
        }

        let corrupted = |block: Block, reason| HeapCorruption {
            offset: block.offset(),
            reason,
        };

        let mem = self.source.memory();
        let epilogue = heap::epilogue(self.source.end());

        if PROLOGUE.header(mem) != Header::encode(MIN_BLOCK_SIZE, true, true, false) {
            return Err(corrupted(PROLOGUE, "prologue was overwritten"));
        }

        let epilogue_header = epilogue.header(mem);
        if epilogue_header.size() != 0 || !epilogue_header.is_allocated() || epilogue_header.in_quick_list() {
            return Err(corrupted(epilogue, "epilogue was overwritten"));
        }

        let mut block = FIRST_BLOCK;
        let mut prev_allocated = true;
        let mut free_blocks = 0;
        let mut quick_blocks = 0;

        while block.offset() < epilogue.offset() {
            let header = block.header(mem);
            let size = header.size();

            if size < MIN_BLOCK_SIZE || size % WORD_SIZE != 0 {
                return Err(corrupted(block, "invalid block size"));
            }

            if size > epilogue.offset() - block.offset() {
                return Err(corrupted(block, "block runs past the epilogue"));
            }

            if header.is_prev_allocated() != prev_allocated {
                return Err(corrupted(block, "PREV_ALLOC doesn't match the previous block"));
            }

            match block.kind(mem) {
                BlockKind::Free => {
                    if !prev_allocated {
                        return Err(corrupted(block, "two adjacent free blocks"));
                    }
                    if read_word(mem, block.footer(mem)) != header.word() {
                        return Err(corrupted(block, "footer doesn't match header"));
                    }
                    free_blocks += 1;
                }
                BlockKind::Quick => {
                    if index_for(size).is_none() {
                        return Err(corrupted(block, "quick listed block has no quick list size"));
                    }
                    quick_blocks += 1;
                }
                BlockKind::Allocated => {}
            }

            prev_allocated = header.is_allocated();
            block = block.next(mem);
        }

        if epilogue_header.is_prev_allocated() != prev_allocated {
            return Err(corrupted(epilogue, "PREV_ALLOC doesn't match the previous block"));
        }

        let mut linked = 0;
        for index in 0..NUM_FREE_LISTS {
            // Bounded so that a cycle can't hang the check.
            for block in self.free_lists.iter(mem, index).take(free_blocks + 1) {
                if !(FIRST_BLOCK.offset()..epilogue.offset()).contains(&block.offset()) {
                    return Err(corrupted(block, "free list points outside of the heap"));
                }
                if block.kind(mem) != BlockKind::Free {
                    return Err(corrupted(block, "free list holds a block that isn't free"));
                }
                if bucket_for(block.size(mem)) != index {
                    return Err(corrupted(block, "free block is in the wrong size class"));
                }
                linked += 1;
            }
        }

        if linked != free_blocks {
            return Err(corrupted(FIRST_BLOCK, "free lists don't match the free blocks in the heap"));
        }

        let mut parked = 0;
        for index in 0..NUM_QUICK_LISTS {
            let mut length = 0;
            for block in self.quick_lists.iter(mem, index).take(quick_blocks + 1) {
                if !(FIRST_BLOCK.offset()..epilogue.offset()).contains(&block.offset()) {
                    return Err(corrupted(block, "quick list points outside of the heap"));
                }
                if block.kind(mem) != BlockKind::Quick || index_for(block.size(mem)) != Some(index) {
                    return Err(corrupted(block, "quick list holds a block of the wrong kind or size"));
                }
                length += 1;
            }

            if length != self.quick_lists.len(index) || length > self.quick_lists.max() {
                return Err(corrupted(FIRST_BLOCK, "quick list length is out of sync"));
            }
            parked += length;
        }

        if parked != quick_blocks {
            return Err(corrupted(FIRST_BLOCK, "quick lists don't match the quick blocks in the heap"));
        }

        Ok(())
    }
}
