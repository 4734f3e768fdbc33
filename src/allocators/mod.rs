//! The [`SegMalloc`] allocator.

pub mod seg_malloc;

pub use seg_malloc::{HeapStats, SegMalloc, Violation};
