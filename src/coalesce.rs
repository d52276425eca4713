//! Block merging and splitting. These are the inverse of each other: split
//! carves an allocated block out of a bigger free one, coalesce glues free
//! neighbours back together so free space never stays fragmented across
//! operations.

use crate::{
    block::{Block, MIN_BLOCK_SIZE},
    freelist::FreeLists,
    header::Header,
};

/// Status of the two neighbours of a block about to be freed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Situation {
    BothAllocated,
    NextFree,
    PrevFree,
    BothFree,
}

/// Classifies the neighbours of `block`. The previous block is known through
/// our own `PREV_ALLOC` bit, the next one through its header. Quick listed
/// blocks count as allocated.
pub(crate) fn situation(mem: &[u8], block: Block) -> Situation {
    let prev_free = !block.header(mem).is_prev_allocated();
    let next_free = block.next(mem).header(mem).is_plain_free();

    match (prev_free, next_free) {
        (false, false) => Situation::BothAllocated,
        (false, true) => Situation::NextFree,
        (true, false) => Situation::PrevFree,
        (true, true) => Situation::BothFree,
    }
}

/// Merges `block` with its free neighbours:
///
/// ```text
/// +-------------+-------------+-------------+
/// |  A (free)   |  B (block)  |  C (free)   |
/// +-------------+-------------+-------------+
///
///                     |
///                     v
///
/// +-----------------------------------------+
/// |         A (size A + B + C, free)        |
/// +-----------------------------------------+
/// ```
///
/// Absorbed neighbours are unlinked from their buckets and their headers are
/// wiped. `block` itself must not be linked. The result gets a free header,
/// a footer, and the block after it gets its `PREV_ALLOC` bit cleared.
pub(crate) fn coalesce(lists: &mut FreeLists, mem: &mut [u8], block: Block) -> Block {
    let header = block.header(mem);
    let mut merged = block;
    let mut size = header.size();
    let mut prev_alloc = header.is_prev_allocated();

    match situation(mem, block) {
        Situation::BothAllocated => {}
        Situation::NextFree => {
            let next = block.next(mem);
            lists.remove(mem, next);
            size += next.size(mem);
            next.set_header(mem, Header::EMPTY);
        }
        Situation::PrevFree => {
            let prev = block.prev(mem);
            lists.remove(mem, prev);
            size += prev.size(mem);
            prev_alloc = prev.header(mem).is_prev_allocated();
            block.set_header(mem, Header::EMPTY);
            merged = prev;
        }
        Situation::BothFree => {
            let prev = block.prev(mem);
            let next = block.next(mem);
            lists.remove(mem, prev);
            lists.remove(mem, next);
            size += prev.size(mem) + next.size(mem);
            prev_alloc = prev.header(mem).is_prev_allocated();
            block.set_header(mem, Header::EMPTY);
            next.set_header(mem, Header::EMPTY);
            merged = prev;
        }
    }

    merged.set_header(mem, Header::encode(size, false, prev_alloc, false));
    merged.write_footer(mem);
    merged.next(mem).set_prev_allocated(mem, false);

    merged
}

/// Cuts `block` down to `size` bytes if the remainder can stand on its own:
///
/// ```text
/// +-----------------------------------------+
/// |               block (free)              |
/// +-----------------------------------------+
///
///                     |
///                     v
///
/// +-------------------+---------------------+
/// |  block (alloc)    |  remainder (free)   |
/// +-------------------+---------------------+
/// ```
///
/// The remainder goes to the free lists. If it would be smaller than
/// [`MIN_BLOCK_SIZE`] nothing is split and the caller gets the whole block.
/// Either way the returned block is marked allocated with its original
/// `PREV_ALLOC` bit. `block` must not be linked in any list.
pub(crate) fn split(lists: &mut FreeLists, mem: &mut [u8], block: Block, size: usize) -> Block {
    let header = block.header(mem);
    let total = header.size();
    let prev_alloc = header.is_prev_allocated();

    debug_assert!(total >= size, "cannot split {total} bytes into {size}");

    if total - size < MIN_BLOCK_SIZE {
        block.set_header(mem, Header::encode(total, true, prev_alloc, false));
        return block;
    }

    block.set_header(mem, Header::encode(size, true, prev_alloc, false));

    let remainder = block.next(mem);
    remainder.set_header(mem, Header::encode(total - size, false, true, false));
    remainder.write_footer(mem);
    lists.insert(mem, remainder);

    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::BlockKind, block::read_word, freelist::bucket_for};

    const PROLOGUE: Block = Block::at(0);

    /// Prologue, the given blocks back to back and an epilogue. `blocks` are
    /// `(size, allocated)` pairs. Free blocks get footers but are not linked.
    fn lay_out(blocks: &[(usize, bool)]) -> (Vec<u8>, Vec<Block>) {
        let total: usize = blocks.iter().map(|(size, _)| size).sum();
        let mut mem = vec![0u8; MIN_BLOCK_SIZE + total + 8];
        PROLOGUE.set_header(&mut mem, Header::encode(MIN_BLOCK_SIZE, true, true, false));

        let mut offset = MIN_BLOCK_SIZE;
        let mut prev_alloc = true;
        let mut handles = Vec::new();
        for (size, alloc) in blocks {
            let block = Block::at(offset);
            block.set_header(&mut mem, Header::encode(*size, *alloc, prev_alloc, false));
            if !alloc {
                block.write_footer(&mut mem);
            }
            handles.push(block);
            prev_alloc = *alloc;
            offset += size;
        }
        Block::at(offset).set_header(&mut mem, Header::encode(0, true, prev_alloc, false));

        (mem, handles)
    }

    /// Links every free block, bypassing coalescing like a consistent heap
    /// would have them.
    fn link_free(lists: &mut FreeLists, mem: &mut [u8], blocks: &[Block]) {
        for block in blocks {
            if block.kind(mem) == BlockKind::Free {
                let next = block.next(mem);
                let header = next.header(mem);
                // Pretend the neighbour is allocated so insert doesn't merge.
                next.set_header(mem, Header::from_word(header.word() | 1));
                lists.insert(mem, *block);
                next.set_header(mem, header);
            }
        }
    }

    #[test]
    fn situations() {
        let (mem, blocks) = lay_out(&[(64, true), (64, true), (64, false), (64, true), (64, false)]);

        assert_eq!(situation(&mem, blocks[0]), Situation::BothAllocated);
        assert_eq!(situation(&mem, blocks[1]), Situation::NextFree);
        assert_eq!(situation(&mem, blocks[3]), Situation::BothFree);
    }

    #[test]
    fn merge_both_neighbours() {
        let (mut mem, blocks) = lay_out(&[(64, false), (96, true), (128, false), (32, true)]);
        let mut lists = FreeLists::new();
        link_free(&mut lists, &mut mem, &blocks);

        // Free the middle block by hand and coalesce it.
        blocks[1].set_header(&mut mem, Header::encode(96, false, false, false));
        blocks[1].write_footer(&mut mem);
        let merged = lists.insert(&mut mem, blocks[1]);

        assert_eq!(merged, blocks[0]);
        assert_eq!(merged.size(&mem), 64 + 96 + 128);
        assert_eq!(read_word(&mem, merged.footer(&mem)), merged.header(&mem).word());
        assert!(merged.header(&mem).is_prev_allocated());
        assert_eq!(blocks[1].header(&mem), Header::EMPTY);
        assert_eq!(blocks[2].header(&mem), Header::EMPTY);

        // The block after the merged one knows its predecessor is free.
        assert_eq!(merged.next(&mem), blocks[3]);
        assert!(!blocks[3].header(&mem).is_prev_allocated());

        let bucket: Vec<_> = lists.iter(&mem, bucket_for(288)).collect();
        assert_eq!(bucket, vec![merged]);
        assert_eq!(lists.len(&mem, bucket_for(64)), 0);
        assert_eq!(lists.len(&mem, bucket_for(128)), 0);
    }

    #[test]
    fn merge_forward_only() {
        let (mut mem, blocks) = lay_out(&[(64, true), (64, false)]);
        let mut lists = FreeLists::new();
        link_free(&mut lists, &mut mem, &blocks);

        blocks[0].set_header(&mut mem, Header::encode(64, false, true, false));
        let merged = lists.insert(&mut mem, blocks[0]);

        assert_eq!(merged, blocks[0]);
        assert_eq!(merged.size(&mem), 128);
        assert_eq!(merged.next(&mem).header(&mem).size(), 0);
        assert!(!merged.next(&mem).header(&mem).is_prev_allocated());
    }

    #[test]
    fn quick_listed_neighbours_are_not_merged() {
        let (mut mem, blocks) = lay_out(&[(64, true), (32, true)]);
        blocks[1].set_header(&mut mem, Header::encode(32, true, true, true));

        blocks[0].set_header(&mut mem, Header::encode(64, false, true, false));
        assert_eq!(situation(&mem, blocks[0]), Situation::BothAllocated);

        let mut lists = FreeLists::new();
        let merged = lists.insert(&mut mem, blocks[0]);
        assert_eq!(merged.size(&mem), 64);
        assert_eq!(blocks[1].kind(&mem), BlockKind::Quick);
        assert!(!blocks[1].header(&mem).is_prev_allocated());
    }

    #[test]
    fn split_leaves_free_remainder() {
        let (mut mem, blocks) = lay_out(&[(256, false), (32, true)]);
        let mut lists = FreeLists::new();

        let block = split(&mut lists, &mut mem, blocks[0], 64);
        let header = block.header(&mem);
        assert_eq!(header.size(), 64);
        assert!(header.is_allocated());
        assert!(header.is_prev_allocated());

        let remainder = block.next(&mem);
        assert_eq!(remainder.size(&mem), 192);
        assert_eq!(remainder.kind(&mem), BlockKind::Free);
        assert!(remainder.header(&mem).is_prev_allocated());
        assert_eq!(lists.search(&mem, 192), Some(remainder));
        assert!(!blocks[1].header(&mem).is_prev_allocated());
    }

    #[test]
    fn split_avoids_splinters() {
        let (mut mem, blocks) = lay_out(&[(88, false), (32, true)]);
        let mut lists = FreeLists::new();

        // 88 - 64 = 24 bytes would be a splinter.
        let block = split(&mut lists, &mut mem, blocks[0], 64);
        assert_eq!(block.size(&mem), 88);
        assert_eq!(block.kind(&mem), BlockKind::Allocated);
        assert_eq!(lists.search(&mem, MIN_BLOCK_SIZE), None);

        // Exactly MIN_BLOCK_SIZE left over is fine.
        let (mut mem, blocks) = lay_out(&[(96, false), (32, true)]);
        let block = split(&mut lists, &mut mem, blocks[0], 64);
        assert_eq!(block.size(&mem), 64);
        assert_eq!(block.next(&mem).size(&mem), MIN_BLOCK_SIZE);
    }
}
