//! Allocator tuning knobs.

use crate::header::{ALIGNMENT, MIN_BLOCK_SIZE};

/// Configuration of a [`SegMalloc`](crate::SegMalloc) instance.
///
/// ```
/// use seg_malloc::Config;
///
/// let config = Config::new().with_chunk_size(4096).with_heap_checks(false);
/// assert_eq!(config.chunk_size(), 4096);
/// assert!(!config.heap_checks());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    chunk_size: usize,
    heap_checks: bool,
}

impl Config {
    /// Minimum number of bytes requested from the grower whenever the heap runs out of free blocks.
    pub const DEFAULT_CHUNK_SIZE: usize = 400;

    /// The default configuration. Automatic heap checks are on in debug builds only.
    pub const fn new() -> Self {
        Config {
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            heap_checks: cfg!(debug_assertions),
        }
    }

    /// Sets the minimum heap growth increment.
    /// The value is rounded up to the allocator alignment and to at least one minimal block.
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        let chunk_size = if chunk_size < MIN_BLOCK_SIZE {
            MIN_BLOCK_SIZE
        } else {
            chunk_size
        };
        self.chunk_size = match chunk_size.checked_next_multiple_of(ALIGNMENT) {
            Some(size) => size,
            None => usize::MAX & !(ALIGNMENT - 1),
        };
        self
    }

    /// Turns the consistency check around every mutating operation on or off.
    pub const fn with_heap_checks(mut self, heap_checks: bool) -> Self {
        self.heap_checks = heap_checks;
        self
    }

    #[inline]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    pub const fn heap_checks(&self) -> bool {
        self.heap_checks
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}
