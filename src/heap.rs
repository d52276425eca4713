//! Heap bookkeeping. The managed region always looks like this once it has
//! been initialized:
//!
//! ```text
//!  0          32                                               end - 8   end
//!  +----------+-------+-------+- - - - - - - - - - - -+-------+----------+
//!  | prologue | block | block |          ...          | block | epilogue |
//!  +----------+-------+-------+- - - - - - - - - - - -+-------+----------+
//! ```
//!
//! The prologue is a permanently allocated block of [`MIN_BLOCK_SIZE`] bytes
//! and the epilogue is a permanently allocated header of size 0. Neither of
//! them can ever be merged, so coalescing never needs bounds checks. Every
//! time the heap grows, the old epilogue becomes the header of the new page.

use crate::{
    allocator::Heap,
    block::{Block, HEADER_SIZE, MIN_BLOCK_SIZE},
    error::AllocError,
    header::Header,
    log::LogLevel,
    region::PageSource,
};

pub(crate) const PROLOGUE: Block = Block::at(0);

/// First block after the prologue.
pub(crate) const FIRST_BLOCK: Block = Block::at(MIN_BLOCK_SIZE);

/// Lowest payload offset that can ever be handed out.
pub(crate) const FIRST_PAYLOAD: usize = MIN_BLOCK_SIZE + HEADER_SIZE;

/// Epilogue of a heap that ends at `end`.
#[inline]
pub(crate) const fn epilogue(end: usize) -> Block {
    Block::at(end - HEADER_SIZE)
}

impl<S: PageSource> Heap<S> {
    /// Requests the first page and lays down the prologue, one free block
    /// spanning the rest of the page and the epilogue. Does nothing if the
    /// heap is already initialized.
    pub fn initialize_if_needed(&mut self) -> Result<(), AllocError> {
        if self.initialized {
            return Ok(());
        }

        if !self.source.grow() {
            self.log.record(LogLevel::Warn, "heap", "heap_grow_failed", None, None, "oom");
            return Err(AllocError::OutOfMemory);
        }

        let end = self.source.end();
        let mem = self.source.memory_mut();

        PROLOGUE.set_header(mem, Header::encode(MIN_BLOCK_SIZE, true, true, false));
        FIRST_BLOCK.set_header(mem, Header::encode(end - MIN_BLOCK_SIZE - HEADER_SIZE, false, true, false));
        FIRST_BLOCK.write_footer(mem);
        epilogue(end).set_header(mem, Header::encode(0, true, false, false));
        self.free_lists.insert(mem, FIRST_BLOCK);

        self.initialized = true;
        self.log.record(LogLevel::Info, "heap", "heap_init", None, Some(end), "ok");

        Ok(())
    }

    /// Extends the heap by one page:
    ///
    /// ```text
    ///                        old epilogue
    ///                             |
    ///                             v
    /// +-------+------------+------+          +-------+------------+----------------------+------+
    /// |  ...  | last block | EPI  |   --->   |  ...  | last block |  new block (free)    | EPI  |
    /// +-------+------------+------+          +-------+------------+----------------------+------+
    /// ```
    ///
    /// The new block inherits the `PREV_ALLOC` bit of the old epilogue and is
    /// inserted in the free lists, so it merges with the last block if that
    /// one is free. Returns `false` and leaves everything untouched if the
    /// page source refuses to grow. On an uninitialized heap this is the same
    /// as [`Self::initialize_if_needed`].
    pub fn grow_by_one_page(&mut self) -> bool {
        if !self.initialized {
            return self.initialize_if_needed().is_ok();
        }

        let old_end = self.source.end();
        if !self.source.grow() {
            self.log.record(LogLevel::Warn, "heap", "heap_grow_failed", None, Some(old_end), "oom");
            return false;
        }

        let end = self.source.end();
        let mem = self.source.memory_mut();

        let block = epilogue(old_end);
        let prev_alloc = block.header(mem).is_prev_allocated();
        block.set_header(mem, Header::encode(end - old_end, false, prev_alloc, false));
        block.write_footer(mem);
        epilogue(end).set_header(mem, Header::encode(0, true, false, false));
        let merged = self.free_lists.insert(mem, block);

        self.log.record(
            LogLevel::Debug,
            "heap",
            "heap_grow",
            Some(merged.payload().offset()),
            Some(end),
            "ok",
        );

        true
    }
}
