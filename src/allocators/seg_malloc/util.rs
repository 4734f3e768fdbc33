//! Utility functions specific to the [`SegMalloc`](super::SegMalloc) allocator.

use crate::error::AllocError;
use crate::header::{ALIGNMENT, BLOCK_OVERHEAD, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
use crate::util::find_divisible;

/// Turns a requested payload size into the size of the block that can hold it:
/// room for the header and footer, rounded up to [`ALIGNMENT`], and never smaller than
/// [`MIN_BLOCK_SIZE`]. Returns [`AllocError::TooLarge`] if no block can be that big.
#[inline]
pub fn adjust_size(requested: usize) -> Result<usize, AllocError> {
    match requested
        .checked_add(BLOCK_OVERHEAD)
        .and_then(|size| find_divisible(size, ALIGNMENT))
    {
        Some(size) if size <= MAX_BLOCK_SIZE => Ok(size.max(MIN_BLOCK_SIZE)),
        _ => Err(AllocError::TooLarge { requested }),
    }
}

/// Payload bytes of a block of `block_size` bytes.
#[inline(always)]
pub const fn payload_size(block_size: usize) -> usize {
    block_size - BLOCK_OVERHEAD
}
