use crate::log::LogLevel;

/// Configuration settings for a [`crate::Heap`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    /// Maximum number of pages the default [`crate::Region`] will grant.
    /// Allocations that don't fit once this limit is reached fail with
    /// [`crate::AllocError::OutOfMemory`].
    pub max_pages: usize,
    /// Capacity of each quick list. Freeing a block into a full quick list
    /// flushes the whole list into the free lists first. 0 disables quick
    /// lists entirely.
    pub quick_list_max: usize,
    /// Records below this level are not stored in the event log.
    pub log_level: LogLevel,
}

pub const DEFAULT_MAX_PAGES: usize = 100;
pub const DEFAULT_QUICK_LIST_MAX: usize = 5;
pub const DEFAULT_LOG_LEVEL: LogLevel = LogLevel::Trace;

impl HeapConfig {
    /// The default configuration. A `const fn` so that it can be used to
    /// build a `static` [`crate::LockedHeap`].
    pub const fn new() -> Self {
        HeapConfig {
            max_pages: DEFAULT_MAX_PAGES,
            quick_list_max: DEFAULT_QUICK_LIST_MAX,
            log_level: DEFAULT_LOG_LEVEL,
        }
    }

    pub const fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub const fn with_quick_list_max(mut self, quick_list_max: usize) -> Self {
        self.quick_list_max = quick_list_max;
        self
    }

    pub const fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}
