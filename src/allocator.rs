use std::{
    alloc::{GlobalAlloc, Layout},
    mem, process,
    ptr,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{
    block::{block_size_for, Block, HeapPtr, HEADER_SIZE, MIN_BLOCK_SIZE, WORD_SIZE},
    coalesce,
    config::HeapConfig,
    error::{AllocError, InvalidPointer},
    freelist::FreeLists,
    header::Header,
    heap::{self, FIRST_BLOCK, FIRST_PAYLOAD},
    log::{EventLog, LogLevel},
    quicklist::{QuickLists, QuickPush},
    region::{PageSource, Region, PAGE_SIZE},
};

/// This is the main allocator. Once you've read [`crate::header`],
/// [`crate::block`], [`crate::freelist`], [`crate::quicklist`] and
/// [`crate::coalesce`], this is where the circle gets completed:
///
/// ```text
///                       +---------------+
///  allocate(size) ----> |  quick lists  | --- exact size hit ----------+
///                       +---------------+                              |
///                               | miss                                 |
///                               v                                      v
///                       +---------------+                       +-------------+
///                       |  free lists   | --- first fit ------> |    split    | ---> HeapPtr
///                       +---------------+                       +-------------+
///                               | miss                                 |
///                               v                                      | remainder
///                       +---------------+                              v
///                       | grow one page | ---> retry            free lists (coalesced)
///                       +---------------+
///
///                       +---------------+
///  free(ptr) ---------> |  quick lists  | --- full? flush into free lists, then push
///                       +---------------+
///                               | no quick list for this size
///                               v
///                        coalesce + free lists
/// ```
///
/// All the memory comes from a [`PageSource`] and every handle is an offset
/// into it (see [`HeapPtr`]). This struct is not thread safe and needs mutable
/// borrows to operate, see [`LockedHeap`] for a version that can be shared.
///
/// # Examples
///
/// ```rust
/// use segalloc::Heap;
///
/// let mut heap = Heap::new();
/// let ptr = heap.allocate(100).unwrap().unwrap();
///
/// heap.payload_mut(ptr).unwrap()[..5].copy_from_slice(b"hello");
/// assert_eq!(&heap.payload(ptr).unwrap()[..5], b"hello");
///
/// heap.free(ptr);
/// assert!(heap.check_invariants().is_ok());
/// ```
pub struct Heap<S: PageSource = Region> {
    pub(crate) source: S,
    /// Whether the prologue, epilogue and first free block have been laid
    /// down. Nothing is requested from the source until the first
    /// allocation.
    pub(crate) initialized: bool,
    pub(crate) free_lists: FreeLists,
    pub(crate) quick_lists: QuickLists,
    pub(crate) log: EventLog,
    pub(crate) config: HeapConfig,
}

impl Heap<Region> {
    /// Heap with the default [`HeapConfig`].
    pub const fn new() -> Self {
        Self::with_config(HeapConfig::new())
    }

    /// Heap backed by a [`Region`] limited to `config.max_pages` pages.
    pub const fn with_config(config: HeapConfig) -> Self {
        Self {
            source: Region::with_max_pages(config.max_pages),
            initialized: false,
            free_lists: FreeLists::new(),
            quick_lists: QuickLists::new(config.quick_list_max),
            log: EventLog::new(config.log_level),
            config,
        }
    }
}

impl Default for Heap<Region> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: PageSource> Heap<S> {
    /// Heap that takes its pages from `source`. `config.max_pages` is ignored,
    /// the source decides when to stop growing.
    pub fn with_source(source: S, config: HeapConfig) -> Self {
        Self {
            source,
            initialized: false,
            free_lists: FreeLists::new(),
            quick_lists: QuickLists::new(config.quick_list_max),
            log: EventLog::new(config.log_level),
            config,
        }
    }

    /// Returns a handle to at least `size` writable bytes, or `None` if `size`
    /// is 0. Fails only if the page source can't provide enough memory.
    pub fn allocate(&mut self, size: usize) -> Result<Option<HeapPtr>, AllocError> {
        if size == 0 {
            return Ok(None);
        }

        let block = self.allocate_block(size, "malloc")?;

        Ok(Some(block.payload()))
    }

    /// Allocation algorithm shared by every operation that needs a new block.
    /// `op` is only used for logging.
    pub(crate) fn allocate_block(&mut self, size: usize, op: &'static str) -> Result<Block, AllocError> {
        if let Err(err) = self.initialize_if_needed() {
            self.log.record(LogLevel::Warn, op, "alloc", None, Some(size), "oom");
            return Err(err);
        }

        let Some(block_size) = block_size_for(size) else {
            self.log.record(LogLevel::Warn, op, "alloc", None, Some(size), "oom");
            return Err(AllocError::OutOfMemory);
        };

        let mem = self.source.memory_mut();
        let (block, outcome) = match self.quick_lists.try_pop(mem, block_size) {
            Some(block) => (block, "quick_list_hit"),
            None => match self.take_free_block(block_size) {
                Ok(block) => (block, "free_list_hit"),
                Err(err) => {
                    self.log.record(LogLevel::Warn, op, "alloc", None, Some(size), "oom");
                    return Err(err);
                }
            },
        };

        let mem = self.source.memory_mut();
        block.next(mem).set_prev_allocated(mem, true);

        self.log.record(
            LogLevel::Trace,
            op,
            "alloc",
            Some(block.payload().offset()),
            Some(size),
            outcome,
        );

        Ok(block)
    }

    /// Finds a free block of at least `size` bytes, growing the heap until
    /// one shows up or the page source gives up. The block comes back split
    /// and marked allocated.
    fn take_free_block(&mut self, size: usize) -> Result<Block, AllocError> {
        loop {
            let mem = self.source.memory_mut();
            if let Some(block) = self.free_lists.search(mem, size) {
                self.free_lists.remove(mem, block);
                return Ok(coalesce::split(&mut self.free_lists, mem, block, size));
            }

            if !self.grow_by_one_page() {
                return Err(AllocError::OutOfMemory);
            }
        }
    }

    /// Deallocates `ptr`.
    ///
    /// # Panics
    ///
    /// If `ptr` is not a live allocation of this heap. Use [`Self::try_free`]
    /// to get an error instead.
    pub fn free(&mut self, ptr: HeapPtr) {
        if let Err(err) = self.try_free(ptr) {
            invalid_free(err);
        }
    }

    /// Same as [`Self::free`] but reports invalid pointers as
    /// [`AllocError::InvalidPointer`] instead of panicking.
    pub fn try_free(&mut self, ptr: HeapPtr) -> Result<(), AllocError> {
        let block = self.checked(ptr, "free")?;
        self.release(block, "free");

        Ok(())
    }

    /// Gives a validated block back. Small blocks are parked in a quick list,
    /// everything else is coalesced into the free lists.
    pub(crate) fn release(&mut self, block: Block, op: &'static str) {
        let mem = self.source.memory_mut();
        let size = block.size(mem);

        match self.quick_lists.try_push(&mut self.free_lists, mem, block) {
            QuickPush::Pushed { flushed } => {
                if flushed > 0 {
                    self.log.record(LogLevel::Debug, op, "quick_list_flush", None, Some(size), "flushed");
                }
                self.log.record(
                    LogLevel::Trace,
                    op,
                    "free",
                    Some(block.payload().offset()),
                    Some(size),
                    "quick_list",
                );
            }
            QuickPush::Rejected => {
                let header = block.header(mem);
                block.set_header(mem, Header::encode(size, false, header.is_prev_allocated(), false));
                block.write_footer(mem);
                self.free_lists.insert(mem, block);
                self.log.record(
                    LogLevel::Trace,
                    op,
                    "free",
                    Some(block.payload().offset()),
                    Some(size),
                    "free_list",
                );
            }
        }
    }

    /// Validates `ptr`, logging rejections.
    pub(crate) fn checked(&mut self, ptr: HeapPtr, op: &'static str) -> Result<Block, AllocError> {
        self.validate(ptr).map_err(|reason| {
            self.log.record(LogLevel::Error, op, "invalid_pointer", Some(ptr.offset()), None, "rejected");
            AllocError::InvalidPointer {
                ptr: ptr.offset(),
                reason,
            }
        })
    }

    /// Checks that `ptr` is the payload of a live allocated block. The checks
    /// only rely on the block's own header and, when the previous block is
    /// supposed to be free, on its footer:
    ///
    /// ```text
    ///              prev footer   header                   epilogue
    ///                   |           |                        |
    ///                   v           v                        v
    /// +-----------------+-----------+-----------------+- - - +------+
    /// |   prev (free)   |  HEADER   |  payload        |      | EPI  |
    /// +-----------------+-----------+-----------------+- - - +------+
    ///                               ^
    ///                               |
    ///                              ptr
    /// ```
    pub(crate) fn validate(&self, ptr: HeapPtr) -> Result<Block, InvalidPointer> {
        if !self.initialized {
            return Err(InvalidPointer::Uninitialized);
        }

        if !ptr.is_aligned_to(WORD_SIZE) {
            return Err(InvalidPointer::Misaligned);
        }

        let mem = self.source.memory();
        let epilogue = heap::epilogue(self.source.end());

        if ptr.offset() < FIRST_PAYLOAD || ptr.offset() >= epilogue.offset() {
            return Err(InvalidPointer::OutOfBounds);
        }

        let block = Block::at(ptr.offset() - HEADER_SIZE);
        let header = block.header(mem);

        if header.size() < MIN_BLOCK_SIZE {
            return Err(InvalidPointer::BadSize);
        }

        if header.size() > epilogue.offset() - block.offset() {
            return Err(InvalidPointer::OutOfBounds);
        }

        if header.in_quick_list() {
            return Err(InvalidPointer::InQuickList);
        }

        if !header.is_allocated() {
            return Err(InvalidPointer::NotAllocated);
        }

        if !header.is_prev_allocated() {
            let footer = block.prev_footer(mem);
            let prev_size = footer.size();

            if prev_size < MIN_BLOCK_SIZE || prev_size > block.offset() - FIRST_BLOCK.offset() {
                return Err(InvalidPointer::PrevAllocMismatch);
            }

            let prev = Block::at(block.offset() - prev_size);
            if !footer.is_plain_free() || prev.header(mem) != footer {
                return Err(InvalidPointer::PrevAllocMismatch);
            }
        }

        Ok(block)
    }

    /// Payload bytes of a live allocation. The slice can be longer than the
    /// requested size, see [`Self::usable_size`].
    pub fn payload(&self, ptr: HeapPtr) -> Result<&[u8], AllocError> {
        let block = self.validated(ptr)?;
        let mem = self.source.memory();
        let end = block.offset() + block.size(mem);

        Ok(&mem[ptr.offset()..end])
    }

    /// Mutable version of [`Self::payload`].
    pub fn payload_mut(&mut self, ptr: HeapPtr) -> Result<&mut [u8], AllocError> {
        let block = self.validated(ptr)?;
        let mem = self.source.memory_mut();
        let end = block.offset() + block.size(mem);

        Ok(&mut mem[ptr.offset()..end])
    }

    /// Number of bytes that can be written through `ptr`.
    pub fn usable_size(&self, ptr: HeapPtr) -> Result<usize, AllocError> {
        let block = self.validated(ptr)?;

        Ok(block.size(self.source.memory()) - HEADER_SIZE)
    }

    /// Like [`Self::checked`] without logging, for the read only accessors.
    fn validated(&self, ptr: HeapPtr) -> Result<Block, AllocError> {
        self.validate(ptr).map_err(|reason| AllocError::InvalidPointer {
            ptr: ptr.offset(),
            reason,
        })
    }

    /// Total bytes obtained from the page source so far, sentinels included.
    pub fn heap_size(&self) -> usize {
        self.source.end()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Takes every record out of the event log, leaving an empty one behind.
    pub fn drain_log(&mut self) -> EventLog {
        let fresh = EventLog::new(self.log.min_level());
        mem::replace(&mut self.log, fresh)
    }
}

/// Fatal path for [`Heap::free`].
#[cold]
#[track_caller]
fn invalid_free(err: AllocError) -> ! {
    panic!("free: {err}")
}

/// [`Heap`] behind a [`Mutex`], usable as the global allocator:
///
/// ```no_run
/// use segalloc::LockedHeap;
///
/// #[global_allocator]
/// static ALLOCATOR: LockedHeap = LockedHeap::new();
///
/// fn main() {
///     let num = Box::new(5);
///     assert_eq!(*num, 5);
/// }
/// ```
///
/// Handles are translated to real addresses through [`Region::address_of`].
/// Since the region reserves its whole page limit upfront, addresses never
/// move and alignment of offsets carries over to addresses up to
/// [`PAGE_SIZE`]. Bigger alignments are refused.
pub struct LockedHeap {
    heap: Mutex<Heap<Region>>,
}

impl LockedHeap {
    pub const fn new() -> Self {
        Self::with_config(HeapConfig::new())
    }

    pub const fn with_config(config: HeapConfig) -> Self {
        Self {
            heap: Mutex::new(Heap::with_config(config)),
        }
    }

    /// Exclusive access to the underlying heap. A panic while the lock was
    /// held doesn't make the heap unusable, every operation leaves it
    /// consistent before anything can panic.
    pub fn lock(&self) -> MutexGuard<'_, Heap<Region>> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LockedHeap {
    fn default() -> Self {
        Self::new()
    }
}

/// Real address of `ptr`, or null if it can't be translated.
fn address_of(heap: &Heap<Region>, ptr: HeapPtr) -> *mut u8 {
    heap.source()
        .address_of(ptr)
        .map_or(ptr::null_mut(), |address| address.as_ptr())
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut heap = self.lock();

        let result = if layout.align() <= WORD_SIZE {
            heap.allocate(layout.size())
        } else if layout.align() <= PAGE_SIZE {
            heap.aligned_allocate(layout.size(), layout.align().max(MIN_BLOCK_SIZE))
        } else {
            return ptr::null_mut();
        };

        match result {
            Ok(Some(ptr)) => address_of(&heap, ptr),
            _ => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, address: *mut u8, _layout: Layout) {
        let mut heap = self.lock();

        let ptr = heap.source().offset_of(address);
        let freed = match ptr {
            Some(ptr) => heap.try_free(ptr),
            None => Err(AllocError::InvalidPointer {
                ptr: address as usize,
                reason: InvalidPointer::OutOfBounds,
            }),
        };

        // Unwinding out of the global allocator is not allowed.
        if freed.is_err() {
            process::abort();
        }
    }

    unsafe fn realloc(&self, address: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // Resized blocks only keep the default alignment.
        if layout.align() > WORD_SIZE {
            let new_layout = Layout::from_size_align_unchecked(new_size, layout.align());
            let new_address = self.alloc(new_layout);
            if !new_address.is_null() {
                ptr::copy_nonoverlapping(address, new_address, layout.size().min(new_size));
                self.dealloc(address, layout);
            }
            return new_address;
        }

        let mut heap = self.lock();
        let Some(ptr) = heap.source().offset_of(address) else {
            process::abort();
        };

        match heap.resize(ptr, new_size) {
            Ok(Some(ptr)) => address_of(&heap, ptr),
            Ok(None) | Err(AllocError::OutOfMemory) => ptr::null_mut(),
            Err(_) => process::abort(),
        }
    }
}
