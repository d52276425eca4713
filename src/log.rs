//! Structured lifecycle records. The allocator can't use a logger that
//! allocates (it might be the global allocator itself), so records are plain
//! `Copy` structs kept in a fixed size ring buffer owned by the heap. Once the
//! ring is full the oldest records are overwritten.

/// Number of records kept by an [`EventLog`].
pub const EVENT_LOG_CAPACITY: usize = 256;

/// Severity of a [`LogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// One allocator lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecord {
    /// Monotonic sequence number, never reused by the same log.
    pub seq: u64,
    /// Severity level.
    pub level: LogLevel,
    /// Public operation that produced the record (`malloc`, `free`,
    /// `realloc`, `memalign`, `heap`).
    pub op: &'static str,
    /// Event kind (`alloc`, `free`, `heap_grow`, `quick_list_flush`, ...).
    pub event: &'static str,
    /// Payload offset involved in the event.
    pub ptr: Option<usize>,
    /// Size involved in the event. Requested bytes or block size depending
    /// on the event.
    pub size: Option<usize>,
    /// Machine readable outcome label.
    pub outcome: &'static str,
}

/// Bounded ring of [`LogRecord`]s.
#[derive(Debug, Clone)]
pub struct EventLog {
    records: [Option<LogRecord>; EVENT_LOG_CAPACITY],
    /// Slot where the next record goes.
    head: usize,
    /// Number of records currently stored.
    len: usize,
    next_seq: u64,
    min_level: LogLevel,
}

impl EventLog {
    pub const fn new(min_level: LogLevel) -> Self {
        Self {
            records: [None; EVENT_LOG_CAPACITY],
            head: 0,
            len: 0,
            next_seq: 1,
            min_level,
        }
    }

    /// Stores a record unless `level` is below the configured minimum.
    pub fn record(
        &mut self,
        level: LogLevel,
        op: &'static str,
        event: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        outcome: &'static str,
    ) {
        if level < self.min_level {
            return;
        }

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        self.records[self.head] = Some(LogRecord {
            seq,
            level,
            op,
            event,
            ptr,
            size,
            outcome,
        });
        self.head = (self.head + 1) % EVENT_LOG_CAPACITY;
        self.len = (self.len + 1).min(EVENT_LOG_CAPACITY);
    }

    /// Records from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LogRecord> + '_ {
        let start = (self.head + EVENT_LOG_CAPACITY - self.len) % EVENT_LOG_CAPACITY;

        (0..self.len).filter_map(move |i| self.records[(start + i) % EVENT_LOG_CAPACITY].as_ref())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Removes every record. Sequence numbers keep counting.
    pub fn clear(&mut self) {
        self.records = [None; EVENT_LOG_CAPACITY];
        self.head = 0;
        self.len = 0;
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }
}
