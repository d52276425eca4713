use std::ptr::NonNull;

/// Abstraction for platform specific memory handling. The region only needs
/// to reserve one contiguous chunk of memory up front and give it back when
/// it's dropped, it doesn't care about the APIs offered by the underlying
/// kernel or libraries.
trait PlatformSpecificMemory {
    /// Requests a memory region where `length` bytes can be written safely.
    /// The returned address is aligned to [`page_size`].
    unsafe fn request_memory(length: usize) -> Option<NonNull<u8>>;

    /// Returns `length` bytes starting from `address` to the underlying
    /// kernel. `address` and `length` must match a previous request.
    unsafe fn return_memory(address: NonNull<u8>, length: usize);

    /// Virtual memory page size in bytes.
    fn page_size() -> usize;
}

/// Zero sized type that implements [`PlatformSpecificMemory`] for each OS.
pub(crate) struct Platform;

/// Virtual memory page size of the machine. Not to be confused with
/// [`crate::PAGE_SIZE`], which is the unit the heap grows by.
#[inline]
pub(crate) fn page_size() -> usize {
    Platform::page_size()
}

/// Convenience wrapper for [`PlatformSpecificMemory::request_memory`].
///
/// # Safety
///
/// `length` must be a non zero multiple of [`page_size`].
#[inline]
pub(crate) unsafe fn request_memory(length: usize) -> Option<NonNull<u8>> {
    Platform::request_memory(length)
}

/// Convenience wrapper for [`PlatformSpecificMemory::return_memory`].
///
/// # Safety
///
/// `address` and `length` must come from a previous call to
/// [`request_memory`] and the memory must not be used afterwards.
#[inline]
pub(crate) unsafe fn return_memory(address: NonNull<u8>, length: usize) {
    Platform::return_memory(address, length)
}

#[cfg(all(unix, not(miri)))]
mod unix {
    use std::{
        ptr::{self, NonNull},
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::{Platform, PlatformSpecificMemory};

    /// Cached result of `sysconf`, 0 until the first call.
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Option<NonNull<u8>> {
            // Memory protection. Read-Write only.
            let protection = libc::PROT_READ | libc::PROT_WRITE;

            // Memory should be private to our process and not mapped to any
            // file. Pages are only backed by physical memory once touched, so
            // reserving the whole limit up front is cheap.
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            match libc::mmap(ptr::null_mut(), length, protection, flags, -1, 0) {
                libc::MAP_FAILED => None,
                address => NonNull::new(address.cast()),
            }
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            // Nothing sensible to do if this fails, the mapping stays valid
            // and is released when the process exits.
            libc::munmap(address.as_ptr().cast(), length);
        }

        fn page_size() -> usize {
            match PAGE_SIZE.load(Ordering::Relaxed) {
                0 => {
                    let size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };
                    let size = if size <= 0 { 4096 } else { size as usize };
                    PAGE_SIZE.store(size, Ordering::Relaxed);
                    size
                }
                size => size,
            }
        }
    }
}

#[cfg(any(not(unix), miri))]
mod fallback {
    //! Without `mmap` (other platforms, or Miri which has no FFI support) we
    //! use the global allocator to mock low level memory management. Memory is
    //! zeroed like fresh anonymous mappings are. A region that is never
    //! returned shows up as leaked memory.

    use std::{alloc, ptr::NonNull};

    use super::{Platform, PlatformSpecificMemory};

    fn to_layout(length: usize) -> Option<alloc::Layout> {
        alloc::Layout::from_size_align(length, Platform::page_size()).ok()
    }

    impl PlatformSpecificMemory for Platform {
        unsafe fn request_memory(length: usize) -> Option<NonNull<u8>> {
            NonNull::new(alloc::alloc_zeroed(to_layout(length)?))
        }

        unsafe fn return_memory(address: NonNull<u8>, length: usize) {
            if let Some(layout) = to_layout(length) {
                alloc::dealloc(address.as_ptr(), layout);
            }
        }

        fn page_size() -> usize {
            4096
        }
    }
}
