//! Block metadata codec. Every block starts with one 64 bit word that stores
//! the block size and three status flags. Sizes are always multiples of 8, so
//! the low 3 bits of the size are always zero and we can reuse them:
//!
//! ```text
//!  63                                                3   2   1   0
//! +---------------------------------------------------+---+---+---+
//! |                      block size                    | Q | P | A |
//! +---------------------------------------------------+---+---+---+
//!
//! A = ALLOC          block is in use (or otherwise not free list eligible)
//! P = PREV_ALLOC     block that precedes this one in memory is allocated
//! Q = IN_QUICK_LIST  block is parked in a quick list stack
//! ```
//!
//! Free blocks that are not quick listed also store a copy of this word at
//! their very end (the footer), see [`crate::block`].

/// Block is in use by a client, the prologue/epilogue, or a quick list.
pub(crate) const ALLOC: u64 = 0b001;

/// The block located immediately before this one is allocated.
pub(crate) const PREV_ALLOC: u64 = 0b010;

/// Block is currently stored in a quick list stack.
pub(crate) const IN_QUICK_LIST: u64 = 0b100;

/// All the flag bits. Everything else belongs to the size.
pub(crate) const FLAGS_MASK: u64 = ALLOC | PREV_ALLOC | IN_QUICK_LIST;

/// Decoded flag bits of a [`Header`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Flags {
    pub alloc: bool,
    pub prev_alloc: bool,
    pub in_quick_list: bool,
}

/// Packed header (or footer) word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Header(u64);

impl Header {
    /// Header of a zero sized block with no flags. Used to wipe headers of
    /// blocks that have been absorbed by a neighbour.
    pub const EMPTY: Self = Header(0);

    /// Packs `size` and the given flags into a single word. `size` must be a
    /// multiple of 8.
    #[inline]
    pub const fn encode(size: usize, alloc: bool, prev_alloc: bool, in_quick_list: bool) -> Self {
        debug_assert!((size as u64) & FLAGS_MASK == 0, "block size must be 8 byte aligned");

        let mut word = size as u64;
        if alloc {
            word |= ALLOC;
        }
        if prev_alloc {
            word |= PREV_ALLOC;
        }
        if in_quick_list {
            word |= IN_QUICK_LIST;
        }

        Header(word)
    }

    /// Builds a header from a word read out of the heap.
    #[inline]
    pub const fn from_word(word: u64) -> Self {
        Header(word)
    }

    /// Raw word as stored in the heap.
    #[inline]
    pub const fn word(self) -> u64 {
        self.0
    }

    /// Unpacks the header into its size and flags.
    pub fn decode(self) -> (usize, Flags) {
        let flags = Flags {
            alloc: self.is_allocated(),
            prev_alloc: self.is_prev_allocated(),
            in_quick_list: self.in_quick_list(),
        };

        (self.size(), flags)
    }

    #[inline]
    pub const fn size(self) -> usize {
        (self.0 & !FLAGS_MASK) as usize
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & ALLOC != 0
    }

    #[inline]
    pub const fn is_prev_allocated(self) -> bool {
        self.0 & PREV_ALLOC != 0
    }

    #[inline]
    pub const fn in_quick_list(self) -> bool {
        self.0 & IN_QUICK_LIST != 0
    }

    /// Free and not quick listed. Only these blocks carry a footer and only
    /// these blocks can be absorbed by the coalescer.
    #[inline]
    pub const fn is_plain_free(self) -> bool {
        self.0 & (ALLOC | IN_QUICK_LIST) == 0
    }

    /// Same header with the `PREV_ALLOC` bit set to `prev_alloc`.
    #[inline]
    pub const fn with_prev_allocated(self, prev_alloc: bool) -> Self {
        if prev_alloc {
            Header(self.0 | PREV_ALLOC)
        } else {
            Header(self.0 & !PREV_ALLOC)
        }
    }
}
