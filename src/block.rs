use std::fmt;

use crate::header::Header;

/// Every piece of metadata is one machine word, and every block size is a
/// multiple of this value.
pub(crate) const WORD_SIZE: usize = 8;

/// Block header size in bytes. See [`Header`].
pub(crate) const HEADER_SIZE: usize = WORD_SIZE;

/// Minimum block size in bytes. A free block needs room for its header, the
/// two free list links and its footer:
///
/// ```text
/// +----------------------------+
/// | header                     |  8 bytes
/// +----------------------------+
/// | next free block            |  8 bytes
/// +----------------------------+
/// | prev free block            |  8 bytes
/// +----------------------------+
/// | footer (copy of header)    |  8 bytes
/// +----------------------------+
/// ```
pub const MIN_BLOCK_SIZE: usize = 4 * WORD_SIZE;

/// Handle to a payload returned by the allocator. This is the byte offset of
/// the first payload byte from the start of the managed region, not a raw
/// address, so the region can be any [`crate::PageSource`] and validating a
/// handle is just a couple of range checks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapPtr(usize);

impl HeapPtr {
    /// Builds a handle from a raw offset. Nothing is checked here, the
    /// allocator validates handles whenever they are given back to it.
    #[inline]
    pub const fn from_offset(offset: usize) -> Self {
        HeapPtr(offset)
    }

    /// Offset of the payload within the managed region.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0
    }

    /// Whether the payload offset is a multiple of `align`.
    #[inline]
    pub const fn is_aligned_to(self, align: usize) -> bool {
        self.0 % align == 0
    }
}

impl fmt::Debug for HeapPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapPtr({:#x})", self.0)
    }
}

/// What the body of a block currently holds. This is never stored anywhere,
/// it's derived from the header flags:
///
/// ```text
/// ALLOC  IN_QUICK_LIST   body
///   0         0          free list links + footer      -> Free
///   1         0          client payload                -> Allocated
///   1         1          quick list link + payload     -> Quick
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Allocated,
    Free,
    Quick,
}

/// Handle to a block: the offset of its header within the managed region.
/// All the accessors need the region bytes, since the block doesn't own any
/// of its memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Block(usize);

/// Reads the word located at `at`.
#[inline]
pub(crate) fn read_word(mem: &[u8], at: usize) -> u64 {
    let mut bytes = [0; WORD_SIZE];
    bytes.copy_from_slice(&mem[at..at + WORD_SIZE]);
    u64::from_ne_bytes(bytes)
}

/// Writes `word` at `at`.
#[inline]
pub(crate) fn write_word(mem: &mut [u8], at: usize, word: u64) {
    mem[at..at + WORD_SIZE].copy_from_slice(&word.to_ne_bytes());
}

/// Size of the block needed to hand out `request` payload bytes: header
/// included, rounded up to a multiple of 8 and never below
/// [`MIN_BLOCK_SIZE`]. Returns `None` if the computation overflows.
pub(crate) fn block_size_for(request: usize) -> Option<usize> {
    let size = request.checked_add(HEADER_SIZE)?.max(MIN_BLOCK_SIZE);

    Some(size.checked_add(WORD_SIZE - 1)? & !(WORD_SIZE - 1))
}

impl Block {
    #[inline]
    pub const fn at(offset: usize) -> Self {
        Block(offset)
    }

    #[inline]
    pub const fn offset(self) -> usize {
        self.0
    }

    /// Block that owns the payload pointed to by `ptr`, or `None` if there
    /// can't be a header before it.
    #[inline]
    pub fn from_payload(ptr: HeapPtr) -> Option<Self> {
        ptr.offset().checked_sub(HEADER_SIZE).map(Block)
    }

    /// First payload byte, right after the header.
    #[inline]
    pub const fn payload(self) -> HeapPtr {
        HeapPtr(self.0 + HEADER_SIZE)
    }

    #[inline]
    pub fn header(self, mem: &[u8]) -> Header {
        Header::from_word(read_word(mem, self.0))
    }

    #[inline]
    pub fn set_header(self, mem: &mut [u8], header: Header) {
        write_word(mem, self.0, header.word());
    }

    #[inline]
    pub fn size(self, mem: &[u8]) -> usize {
        self.header(mem).size()
    }

    pub fn kind(self, mem: &[u8]) -> BlockKind {
        let header = self.header(mem);

        if header.in_quick_list() {
            BlockKind::Quick
        } else if header.is_allocated() {
            BlockKind::Allocated
        } else {
            BlockKind::Free
        }
    }

    /// Block located right after this one in memory.
    #[inline]
    pub fn next(self, mem: &[u8]) -> Block {
        Block(self.0 + self.size(mem))
    }

    /// Block located right before this one in memory. Only free blocks have
    /// footers, so this can only be called when `PREV_ALLOC` is clear.
    pub fn prev(self, mem: &[u8]) -> Block {
        debug_assert!(
            !self.header(mem).is_prev_allocated(),
            "previous block of {:#x} has no footer",
            self.0
        );

        Block(self.0 - self.prev_footer(mem).size())
    }

    /// Footer of the previous block, which is the word right before our
    /// header. Garbage unless the previous block is plain free.
    #[inline]
    pub fn prev_footer(self, mem: &[u8]) -> Header {
        Header::from_word(read_word(mem, self.0 - WORD_SIZE))
    }

    /// Offset of the last word of this block.
    #[inline]
    pub fn footer(self, mem: &[u8]) -> usize {
        self.0 + self.size(mem) - WORD_SIZE
    }

    /// Copies the header into the footer slot.
    pub fn write_footer(self, mem: &mut [u8]) {
        let header = self.header(mem);
        debug_assert!(header.is_plain_free(), "only free blocks carry footers");

        write_word(mem, self.0 + header.size() - WORD_SIZE, header.word());
    }

    /// Updates the `PREV_ALLOC` bit, keeping the footer in sync if this block
    /// has one. The epilogue has size 0 and never gets a footer.
    pub fn set_prev_allocated(self, mem: &mut [u8], prev_alloc: bool) {
        let header = self.header(mem).with_prev_allocated(prev_alloc);
        self.set_header(mem, header);

        if header.is_plain_free() && header.size() > 0 {
            self.write_footer(mem);
        }
    }

    // Free list body. Free blocks reuse the first two payload words for the
    // links of the segregated free list they belong to.

    #[inline]
    pub fn free_next(self, mem: &[u8]) -> u64 {
        debug_assert_eq!(self.kind(mem), BlockKind::Free);
        read_word(mem, self.0 + HEADER_SIZE)
    }

    #[inline]
    pub fn free_prev(self, mem: &[u8]) -> u64 {
        debug_assert_eq!(self.kind(mem), BlockKind::Free);
        read_word(mem, self.0 + HEADER_SIZE + WORD_SIZE)
    }

    #[inline]
    pub fn set_free_next(self, mem: &mut [u8], link: u64) {
        debug_assert_eq!(self.kind(mem), BlockKind::Free);
        write_word(mem, self.0 + HEADER_SIZE, link);
    }

    #[inline]
    pub fn set_free_prev(self, mem: &mut [u8], link: u64) {
        debug_assert_eq!(self.kind(mem), BlockKind::Free);
        write_word(mem, self.0 + HEADER_SIZE + WORD_SIZE, link);
    }

    // Quick list body. Quick listed blocks only need a single link to the
    // next block in their stack. Offset 0 is the prologue, which can never be
    // quick listed, so we use it as the end of the stack.

    pub fn quick_next(self, mem: &[u8]) -> Option<Block> {
        debug_assert_eq!(self.kind(mem), BlockKind::Quick);
        match read_word(mem, self.0 + HEADER_SIZE) as usize {
            0 => None,
            offset => Some(Block(offset)),
        }
    }

    pub fn set_quick_next(self, mem: &mut [u8], next: Option<Block>) {
        debug_assert_eq!(self.kind(mem), BlockKind::Quick);
        let word = next.map_or(0, |block| block.0 as u64);
        write_word(mem, self.0 + HEADER_SIZE, word);
    }
}
