use std::{ptr::NonNull, slice};

use crate::{block::HeapPtr, config::DEFAULT_MAX_PAGES, platform};

/// Unit in bytes by which the managed region grows.
pub const PAGE_SIZE: usize = 4096;

/// External page supply. The allocator never talks to the kernel directly,
/// it asks its page source for one more page at a time and addresses
/// everything by offset from the start of [`PageSource::memory`].
///
/// ```text
///  0                                                        end()
///  +-----------+-----------+-----------+- - - - - - - - - - -+
///  |  page 0   |  page 1   |  page 2   |  not yet granted    |
///  +-----------+-----------+-----------+- - - - - - - - - - -+
/// ```
///
/// Implementations must keep previously granted bytes intact when growing.
pub trait PageSource {
    /// Extends the region by exactly [`PAGE_SIZE`] bytes. Returns `false`
    /// (and changes nothing) when no more pages are available.
    fn grow(&mut self) -> bool;

    /// Current end of the region. Always a multiple of [`PAGE_SIZE`].
    fn end(&self) -> usize;

    /// All the bytes granted so far, `end()` bytes in total.
    fn memory(&self) -> &[u8];

    /// Mutable view of [`PageSource::memory`].
    fn memory_mut(&mut self) -> &mut [u8];
}

/// Default [`PageSource`]. The whole page limit is reserved from the platform
/// the first time the region grows, then pages are handed out one by one, so
/// the region never moves and offsets can be translated to real addresses.
/// See [`crate::LockedHeap`].
///
/// The reservation is returned to the platform when the region is dropped.
#[derive(Debug)]
pub struct Region {
    /// Start of the reservation, `None` until the first page is requested.
    base: Option<NonNull<u8>>,
    /// Length of the reservation in bytes.
    reserved: usize,
    /// Bytes granted to the heap so far.
    len: usize,
    /// Maximum number of pages this region will ever grant.
    max_pages: usize,
}

// The region owns its memory and is only reachable through `&mut` or a
// `Mutex`, see `LockedHeap`.
unsafe impl Send for Region {}

impl Region {
    /// Region limited to [`DEFAULT_MAX_PAGES`] pages.
    pub const fn new() -> Self {
        Self::with_max_pages(DEFAULT_MAX_PAGES)
    }

    /// Region that grants at most `max_pages` pages. Nothing is reserved
    /// until the first call to [`PageSource::grow`].
    pub const fn with_max_pages(max_pages: usize) -> Self {
        Self {
            base: None,
            reserved: 0,
            len: 0,
            max_pages,
        }
    }

    /// Number of pages granted so far.
    pub fn pages(&self) -> usize {
        self.len / PAGE_SIZE
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Address of offset 0, or `None` if nothing has been reserved yet.
    pub fn base(&self) -> Option<NonNull<u8>> {
        self.base
    }

    /// Real address of `ptr`, if it falls within the granted pages.
    pub fn address_of(&self, ptr: HeapPtr) -> Option<NonNull<u8>> {
        let base = self.base?;
        if ptr.offset() >= self.len {
            return None;
        }

        // SAFETY: in bounds of the reservation, checked above.
        Some(unsafe { NonNull::new_unchecked(base.as_ptr().add(ptr.offset())) })
    }

    /// Inverse of [`Self::address_of`].
    pub fn offset_of(&self, address: *const u8) -> Option<HeapPtr> {
        let base = self.base?.as_ptr() as usize;
        let offset = (address as usize).checked_sub(base)?;

        (offset < self.len).then_some(HeapPtr::from_offset(offset))
    }

    /// Reserves room for `max_pages` pages, rounded up to the platform page
    /// size.
    fn reserve(&mut self) -> Option<NonNull<u8>> {
        let page_size = platform::page_size();
        let length = self
            .max_pages
            .checked_mul(PAGE_SIZE)?
            .checked_add(page_size - 1)?
            / page_size
            * page_size;

        let base = unsafe { platform::request_memory(length)? };
        self.base = Some(base);
        self.reserved = length;

        Some(base)
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::new()
    }
}

impl PageSource for Region {
    fn grow(&mut self) -> bool {
        if self.pages() >= self.max_pages {
            return false;
        }

        if self.base.is_none() && self.reserve().is_none() {
            return false;
        }

        self.len += PAGE_SIZE;
        true
    }

    #[inline]
    fn end(&self) -> usize {
        self.len
    }

    fn memory(&self) -> &[u8] {
        match self.base {
            // SAFETY: the first `len` bytes of the reservation are ours and
            // the borrow of `self` keeps anyone else from writing to them.
            Some(base) => unsafe { slice::from_raw_parts(base.as_ptr(), self.len) },
            None => &[],
        }
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        match self.base {
            // SAFETY: see `memory`.
            Some(base) => unsafe { slice::from_raw_parts_mut(base.as_ptr(), self.len) },
            None => &mut [],
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Some(base) = self.base.take() {
            unsafe { platform::return_memory(base, self.reserved) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_one_page_at_a_time() {
        let mut region = Region::with_max_pages(3);
        assert_eq!(region.end(), 0);
        assert!(region.memory().is_empty());
        assert!(region.base().is_none());

        for pages in 1..=3 {
            assert!(region.grow());
            assert_eq!(region.end(), pages * PAGE_SIZE);
            assert_eq!(region.memory().len(), pages * PAGE_SIZE);
            assert_eq!(region.pages(), pages);
        }

        // Limit reached, nothing changes.
        assert!(!region.grow());
        assert_eq!(region.end(), 3 * PAGE_SIZE);
    }

    #[test]
    fn contents_survive_growth() {
        let mut region = Region::with_max_pages(2);
        assert!(region.grow());
        region.memory_mut()[..PAGE_SIZE].fill(69);
        let base = region.base();

        assert!(region.grow());
        assert_eq!(region.base(), base);
        assert!(region.memory()[..PAGE_SIZE].iter().all(|byte| *byte == 69));
    }

    #[test]
    fn base_is_page_aligned() {
        let mut region = Region::with_max_pages(1);
        assert!(region.grow());
        let base = region.base().map(|base| base.as_ptr() as usize);
        assert_eq!(base.map(|base| base % PAGE_SIZE), Some(0));
    }

    #[test]
    fn translates_addresses() {
        let mut region = Region::with_max_pages(1);
        assert_eq!(region.offset_of(std::ptr::null()), None);
        assert!(region.grow());

        let ptr = HeapPtr::from_offset(40);
        let address = region.address_of(ptr).map(|address| address.as_ptr() as *const u8);
        assert_eq!(address.and_then(|address| region.offset_of(address)), Some(ptr));
        assert_eq!(region.address_of(HeapPtr::from_offset(PAGE_SIZE)), None);
        assert_eq!(region.offset_of(std::ptr::null()), None);
    }

    #[test]
    fn zero_page_limit() {
        let mut region = Region::with_max_pages(0);
        assert!(!region.grow());
        assert_eq!(region.end(), 0);
    }
}
