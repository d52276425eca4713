use crate::{
    block::{Block, MIN_BLOCK_SIZE, WORD_SIZE},
    freelist::FreeLists,
    header::Header,
};

/// Number of quick lists. List `i` holds blocks of exactly
/// `MIN_BLOCK_SIZE + 8 * i` bytes.
pub const NUM_QUICK_LISTS: usize = 10;

/// One LIFO stack of blocks of the same size. The links are stored in the
/// blocks themselves, see [`Block::quick_next`].
#[derive(Clone, Copy, Debug)]
struct QuickList {
    first: Option<Block>,
    length: usize,
}

/// Result of [`QuickLists::try_push`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum QuickPush {
    /// The block was parked. `flushed` blocks had to be moved to the free
    /// lists first because the stack was full.
    Pushed { flushed: usize },
    /// No quick list for this size, caller must use the free lists.
    Rejected,
}

/// Cache of recently freed small blocks. Blocks in here keep their `ALLOC`
/// bit and also get `IN_QUICK_LIST`, so for every other part of the
/// allocator they are still in use and nothing coalesces with them:
///
/// ```text
/// lists[0] (32 bytes) -> +-------+    +-------+    +-------+
///                        | Quick | -> | Quick | -> | Quick | -> None
///                        +-------+    +-------+    +-------+
///
/// lists[1] (40 bytes) -> None
///
/// lists[2] (48 bytes) -> +-------+
///                        | Quick | -> None
///                        +-------+
/// ```
///
/// Reusing a block is a pop, freeing one is a push. Coalescing is deferred
/// until a stack overflows and gets flushed.
#[derive(Debug)]
pub(crate) struct QuickLists {
    lists: [QuickList; NUM_QUICK_LISTS],
    /// Capacity of each stack.
    max: usize,
}

/// Quick list for blocks of exactly `size` bytes, if there is one.
pub(crate) fn index_for(size: usize) -> Option<usize> {
    if size < MIN_BLOCK_SIZE || size % WORD_SIZE != 0 {
        return None;
    }

    let index = (size - MIN_BLOCK_SIZE) / WORD_SIZE;
    (index < NUM_QUICK_LISTS).then_some(index)
}

impl QuickLists {
    pub const fn new(max: usize) -> Self {
        const EMPTY: QuickList = QuickList {
            first: None,
            length: 0,
        };

        Self {
            lists: [EMPTY; NUM_QUICK_LISTS],
            max,
        }
    }

    /// Pops the most recently freed block of exactly `size` bytes. The block
    /// comes back with `ALLOC` set and `IN_QUICK_LIST` cleared.
    pub fn try_pop(&mut self, mem: &mut [u8], size: usize) -> Option<Block> {
        let list = &mut self.lists[index_for(size)?];
        let block = list.first?;

        list.first = block.quick_next(mem);
        list.length -= 1;

        let header = block.header(mem);
        block.set_header(
            mem,
            Header::encode(header.size(), true, header.is_prev_allocated(), false),
        );

        Some(block)
    }

    /// Parks an allocated `block` in its quick list, flushing the list into
    /// `free_lists` first if it's full.
    pub fn try_push(&mut self, free_lists: &mut FreeLists, mem: &mut [u8], block: Block) -> QuickPush {
        let Some(index) = index_for(block.size(mem)).filter(|_| self.max > 0) else {
            return QuickPush::Rejected;
        };

        let flushed = if self.lists[index].length >= self.max {
            self.flush(free_lists, mem, index)
        } else {
            0
        };

        // Flushing may have freed the previous block and cleared PREV_ALLOC.
        let header = block.header(mem);
        let list = &mut self.lists[index];
        block.set_header(
            mem,
            Header::encode(header.size(), true, header.is_prev_allocated(), true),
        );
        block.set_quick_next(mem, list.first);
        list.first = Some(block);
        list.length += 1;

        QuickPush::Pushed { flushed }
    }

    /// Moves every block of list `index` to the free lists, coalescing each
    /// one with its neighbours. Returns how many blocks were moved.
    fn flush(&mut self, free_lists: &mut FreeLists, mem: &mut [u8], index: usize) -> usize {
        let mut flushed = 0;

        while let Some(block) = self.lists[index].first {
            self.lists[index].first = block.quick_next(mem);

            let header = block.header(mem);
            block.set_header(
                mem,
                Header::encode(header.size(), false, header.is_prev_allocated(), false),
            );
            block.write_footer(mem);
            free_lists.insert(mem, block);
            flushed += 1;
        }

        self.lists[index].length = 0;
        flushed
    }

    /// Blocks currently parked in list `index`, most recent first.
    pub fn iter<'a>(&'a self, mem: &'a [u8], index: usize) -> impl Iterator<Item = Block> + 'a {
        let mut current = self.lists[index].first;

        std::iter::from_fn(move || {
            let block = current?;
            current = block.quick_next(mem);
            Some(block)
        })
    }

    /// Length of list `index` as tracked by the list itself.
    pub fn len(&self, index: usize) -> usize {
        self.lists[index].length
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockKind;

    /// Prologue, `count` allocated blocks of `size` bytes and an epilogue.
    fn allocated_blocks(count: usize, size: usize) -> (Vec<u8>, Vec<Block>) {
        let mut mem = vec![0u8; MIN_BLOCK_SIZE + count * size + 8];
        Block::at(0).set_header(&mut mem, Header::encode(MIN_BLOCK_SIZE, true, true, false));

        let blocks: Vec<_> = (0..count)
            .map(|i| Block::at(MIN_BLOCK_SIZE + i * size))
            .collect();
        for block in &blocks {
            block.set_header(&mut mem, Header::encode(size, true, true, false));
        }
        Block::at(MIN_BLOCK_SIZE + count * size).set_header(&mut mem, Header::encode(0, true, true, false));

        (mem, blocks)
    }

    #[test]
    fn exact_size_classes() {
        assert_eq!(index_for(32), Some(0));
        assert_eq!(index_for(40), Some(1));
        assert_eq!(index_for(104), Some(9));
        assert_eq!(index_for(112), None);
        assert_eq!(index_for(24), None);
        assert_eq!(index_for(36), None);
    }

    #[test]
    fn lifo_push_and_pop() {
        let (mut mem, blocks) = allocated_blocks(3, 48);
        let mut free_lists = FreeLists::new();
        let mut quick = QuickLists::new(5);

        for block in &blocks {
            assert_eq!(quick.try_push(&mut free_lists, &mut mem, *block), QuickPush::Pushed { flushed: 0 });
            assert_eq!(block.kind(&mem), BlockKind::Quick);
        }
        assert_eq!(quick.len(2), 3);
        assert_eq!(quick.iter(&mem, 2).collect::<Vec<_>>(), vec![blocks[2], blocks[1], blocks[0]]);

        assert_eq!(quick.try_pop(&mut mem, 48), Some(blocks[2]));
        assert_eq!(blocks[2].kind(&mem), BlockKind::Allocated);
        assert_eq!(quick.try_pop(&mut mem, 40), None);
        assert_eq!(quick.try_pop(&mut mem, 48), Some(blocks[1]));
        assert_eq!(quick.try_pop(&mut mem, 48), Some(blocks[0]));
        assert_eq!(quick.try_pop(&mut mem, 48), None);
        assert_eq!(quick.len(2), 0);
    }

    #[test]
    fn big_blocks_are_rejected() {
        let (mut mem, blocks) = allocated_blocks(1, 128);
        let mut free_lists = FreeLists::new();
        let mut quick = QuickLists::new(5);

        assert_eq!(quick.try_push(&mut free_lists, &mut mem, blocks[0]), QuickPush::Rejected);
        assert_eq!(blocks[0].kind(&mem), BlockKind::Allocated);

        let mut disabled = QuickLists::new(0);
        let (mut mem, blocks) = allocated_blocks(1, 32);
        assert_eq!(disabled.try_push(&mut free_lists, &mut mem, blocks[0]), QuickPush::Rejected);
    }

    #[test]
    fn overflow_flushes_and_coalesces() {
        let (mut mem, blocks) = allocated_blocks(4, 32);
        let mut free_lists = FreeLists::new();
        let mut quick = QuickLists::new(3);

        for block in &blocks[..3] {
            quick.try_push(&mut free_lists, &mut mem, *block);
        }

        // Fourth push flushes the three adjacent blocks, which merge into a
        // single 96 byte free block.
        let push = quick.try_push(&mut free_lists, &mut mem, blocks[3]);
        assert_eq!(push, QuickPush::Pushed { flushed: 3 });
        assert_eq!(quick.len(0), 1);
        assert_eq!(blocks[3].kind(&mem), BlockKind::Quick);

        let merged = free_lists.search(&mem, 96);
        assert_eq!(merged, Some(blocks[0]));
        assert_eq!(blocks[0].size(&mem), 96);
        assert_eq!(blocks[0].kind(&mem), BlockKind::Free);
        assert!(!blocks[3].header(&mem).is_prev_allocated());
    }

    #[test]
    fn pushed_block_sees_flushed_neighbour() {
        let (mut mem, blocks) = allocated_blocks(3, 32);
        let mut free_lists = FreeLists::new();
        let mut quick = QuickLists::new(1);

        quick.try_push(&mut free_lists, &mut mem, blocks[0]);
        quick.try_push(&mut free_lists, &mut mem, blocks[1]);
        assert_eq!(blocks[0].kind(&mem), BlockKind::Free);
        assert_eq!(blocks[1].kind(&mem), BlockKind::Quick);
        assert!(!blocks[1].header(&mem).is_prev_allocated());

        // Flushing blocks[1] must merge it backwards into blocks[0].
        quick.try_push(&mut free_lists, &mut mem, blocks[2]);
        assert_eq!(blocks[0].size(&mem), 64);
        assert_eq!(blocks[0].kind(&mem), BlockKind::Free);
        assert_eq!(free_lists.search(&mem, 32), Some(blocks[0]));
        assert!(!blocks[2].header(&mem).is_prev_allocated());
    }
}
