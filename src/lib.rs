//! Segregated free list allocator with boundary tags.
//!
//! The allocator manages a single contiguous region obtained one page at a
//! time from a [`PageSource`]. Blocks carry a one word header packing their
//! size and three status bits, free blocks also carry a copy of it at their
//! end (the footer) so they can be merged in constant time with whatever
//! block is freed after them. Free blocks are indexed by size class in
//! [`NUM_FREE_LISTS`] doubly linked lists, and recently freed small blocks are
//! cached in [`NUM_QUICK_LISTS`] LIFO stacks of exact sizes.
//!
//! Start with [`Heap`] for a single threaded allocator that hands out
//! [`HeapPtr`] offsets, or [`LockedHeap`] to use it as the global allocator.
//! The modules build on each other in this order: [`header`], [`block`],
//! [`region`], [`freelist`], [`quicklist`], [`coalesce`], [`heap`],
//! [`allocator`].

mod alignment;
mod allocator;
mod block;
mod coalesce;
mod config;
mod error;
mod freelist;
mod header;
mod heap;
mod log;
mod platform;
mod quicklist;
mod realloc;
mod region;
mod walk;

pub use allocator::{Heap, LockedHeap};
pub use block::{BlockKind, HeapPtr, MIN_BLOCK_SIZE};
pub use config::{HeapConfig, DEFAULT_LOG_LEVEL, DEFAULT_MAX_PAGES, DEFAULT_QUICK_LIST_MAX};
pub use error::{AllocError, HeapCorruption, InvalidPointer};
pub use freelist::NUM_FREE_LISTS;
pub use log::{EventLog, LogLevel, LogRecord, EVENT_LOG_CAPACITY};
pub use quicklist::NUM_QUICK_LISTS;
pub use region::{PageSource, Region, PAGE_SIZE};
pub use walk::{BlockInfo, HeapStats};
