//! Error types returned by the allocator and its growers.

use thiserror::Error;

/// Reasons an allocation request can fail. All of them are recoverable,
/// the heap is left exactly as it was before the failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("zero sized allocation requested")]
    ZeroSize,
    #[error("a request of {requested} bytes exceeds the largest representable block")]
    TooLarge { requested: usize },
    #[error("{count} elements of {elem_size} bytes overflow the address space")]
    Overflow { count: usize, elem_size: usize },
    #[error("growing the heap by {bytes} bytes would exceed the maximum heap size")]
    HeapLimit { bytes: usize },
    #[error("couldn't grow the heap by {bytes} bytes")]
    OutOfMemory {
        bytes: usize,
        #[source]
        source: GrowError,
    },
}

/// Reasons a [`Grower`](crate::growers::Grower) can refuse to grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GrowError {
    #[error("the buffer has no room for {requested} more bytes")]
    Exhausted { requested: usize },
    #[error("moving the program break failed with os error {code}")]
    Os { code: i32 },
    #[error("grown region starts at {found:#x} instead of continuing the heap at {expected:#x}")]
    NotContiguous { expected: usize, found: usize },
    #[error("grown region at {addr:#x} is not aligned")]
    Misaligned { addr: usize },
}
