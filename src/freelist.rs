use crate::{
    block::{Block, BlockKind, MIN_BLOCK_SIZE},
    coalesce,
};

/// Number of segregated free lists.
pub const NUM_FREE_LISTS: usize = 10;

/// See [`FreeLists`]. A link either points to one of the sentinel heads,
/// which live outside of the heap, or to a free block inside it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Link {
    Head(usize),
    Block(Block),
}

impl Link {
    /// Block offsets are always multiples of 8, so a set low bit can only
    /// mean a sentinel head.
    const HEAD_TAG: u64 = 1;

    #[inline]
    const fn encode(self) -> u64 {
        match self {
            Link::Head(index) => ((index as u64) << 3) | Self::HEAD_TAG,
            Link::Block(block) => block.offset() as u64,
        }
    }

    #[inline]
    const fn decode(word: u64) -> Self {
        if word & Self::HEAD_TAG != 0 {
            Link::Head((word >> 3) as usize)
        } else {
            Link::Block(Block::at(word as usize))
        }
    }
}

/// Links of a sentinel head.
#[derive(Clone, Copy, Debug)]
struct Links {
    next: Link,
    prev: Link,
}

/// Segregated free list index. Each bucket is a circular doubly linked list
/// with a dummy head that never holds data. The links of free blocks are
/// stored in their own body (see [`Block::free_next`]), only the heads are
/// stored here:
///
/// ```text
///                +--------------------------------------------------+
///                v                                                  |
/// heads[i] -> +------+     +-------+     +-------+     +-------+    |
///             | Head | <-> | Free  | <-> | Free  | <-> | Free  | ---+
///             +------+     +-------+     +-------+     +-------+
/// ```
///
/// Bucket 0 holds blocks of exactly [`MIN_BLOCK_SIZE`] bytes, bucket `i` in
/// `1..N-1` holds sizes in `(MIN * 2^(i-1), MIN * 2^i]` and the last bucket
/// holds everything bigger than that.
#[derive(Debug)]
pub(crate) struct FreeLists {
    heads: [Links; NUM_FREE_LISTS],
}

/// Size class of a free block of `size` bytes.
pub(crate) fn bucket_for(size: usize) -> usize {
    debug_assert!(size >= MIN_BLOCK_SIZE);

    if size <= MIN_BLOCK_SIZE {
        return 0;
    }

    let mut max = MIN_BLOCK_SIZE;
    for index in 1..NUM_FREE_LISTS - 1 {
        max *= 2;
        if size <= max {
            return index;
        }
    }

    NUM_FREE_LISTS - 1
}

impl FreeLists {
    /// Empty index, every head points to itself.
    pub const fn new() -> Self {
        let mut heads = [Links {
            next: Link::Head(0),
            prev: Link::Head(0),
        }; NUM_FREE_LISTS];

        let mut index = 0;
        while index < NUM_FREE_LISTS {
            heads[index] = Links {
                next: Link::Head(index),
                prev: Link::Head(index),
            };
            index += 1;
        }

        Self { heads }
    }

    fn next_of(&self, mem: &[u8], link: Link) -> Link {
        match link {
            Link::Head(index) => self.heads[index].next,
            Link::Block(block) => Link::decode(block.free_next(mem)),
        }
    }

    fn prev_of(&self, mem: &[u8], link: Link) -> Link {
        match link {
            Link::Head(index) => self.heads[index].prev,
            Link::Block(block) => Link::decode(block.free_prev(mem)),
        }
    }

    fn set_next(&mut self, mem: &mut [u8], link: Link, next: Link) {
        match link {
            Link::Head(index) => self.heads[index].next = next,
            Link::Block(block) => block.set_free_next(mem, next.encode()),
        }
    }

    fn set_prev(&mut self, mem: &mut [u8], link: Link, prev: Link) {
        match link {
            Link::Head(index) => self.heads[index].prev = prev,
            Link::Block(block) => block.set_free_prev(mem, prev.encode()),
        }
    }

    /// Coalesces `block` with its free neighbours and pushes the result at
    /// the head of its bucket. `block` must have a free header and must not
    /// be linked anywhere yet. Returns the block that was actually linked,
    /// which starts earlier than `block` if it was merged backwards.
    pub fn insert(&mut self, mem: &mut [u8], block: Block) -> Block {
        let block = coalesce::coalesce(self, mem, block);
        self.push(mem, block);

        block
    }

    /// Links `block` at the head of its bucket without coalescing.
    fn push(&mut self, mem: &mut [u8], block: Block) {
        debug_assert_eq!(block.kind(mem), BlockKind::Free);

        let head = Link::Head(bucket_for(block.size(mem)));
        let first = self.next_of(mem, head);
        let link = Link::Block(block);

        self.set_next(mem, link, first);
        self.set_prev(mem, link, head);
        self.set_prev(mem, first, link);
        self.set_next(mem, head, link);
    }

    /// Unlinks `block` from whatever bucket holds it.
    pub fn remove(&mut self, mem: &mut [u8], block: Block) {
        let link = Link::Block(block);
        let prev = self.prev_of(mem, link);
        let next = self.next_of(mem, link);

        self.set_next(mem, prev, next);
        self.set_prev(mem, next, prev);
    }

    /// First fit search. Scans buckets in ascending order starting from the
    /// size class of `min_size` and returns the first block that can hold
    /// `min_size` bytes. The block is still linked, see [`Self::remove`].
    pub fn search(&self, mem: &[u8], min_size: usize) -> Option<Block> {
        (bucket_for(min_size)..NUM_FREE_LISTS)
            .find_map(|index| self.iter(mem, index).find(|block| block.size(mem) >= min_size))
    }

    /// Blocks in bucket `index`, in list order.
    pub fn iter<'a>(&'a self, mem: &'a [u8], index: usize) -> impl Iterator<Item = Block> + 'a {
        let mut current = self.heads[index].next;

        std::iter::from_fn(move || match current {
            Link::Head(_) => None,
            Link::Block(block) => {
                current = self.next_of(mem, current);
                Some(block)
            }
        })
    }

    /// Number of blocks in bucket `index`.
    pub fn len(&self, mem: &[u8], index: usize) -> usize {
        self.iter(mem, index).count()
    }
}
