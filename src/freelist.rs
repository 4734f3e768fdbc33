//! Defines the [`Buckets`] registry of segregated free lists.
//!
//! Each bucket is a doubly-linked list threaded through the payloads of the free blocks
//! it holds (see [`Heap::prev_free`] and [`Heap::next_free`]). Only the heads live
//! outside of the heap.

use core::ops::RangeInclusive;

use crate::block::{BlockRef, Heap};
use crate::header::MAX_BLOCK_SIZE;

pub const NUM_BUCKETS: usize = 18;

/// Inclusive upper size limit of every bucket but the last, which takes everything larger.
/// Small sizes are spaced evenly, larger ones double.
const BUCKET_LIMITS: [usize; NUM_BUCKETS - 1] = [
    24, 48, 72, 96, 120, 144, 168, 192, 216, 240, 480, 960, 1920, 3840, 7680, 15360, 30720,
];

/// Returns the bucket holding free blocks of `size` bytes.
///
/// The mapping is a monotonic step function, so a request can only be satisfied by its own
/// bucket or the ones after it.
#[inline]
pub fn bucket_index(size: usize) -> usize {
    BUCKET_LIMITS.partition_point(|&limit| limit < size)
}

/// Returns the sizes that map to bucket `index`.
///
/// # Panics
/// Panics if `index >= NUM_BUCKETS`.
pub fn bucket_range(index: usize) -> RangeInclusive<usize> {
    assert!(index < NUM_BUCKETS, "bucket {index} doesn't exist");
    let low = match index {
        0 => 0,
        i => BUCKET_LIMITS[i - 1] + 1,
    };
    let high = BUCKET_LIMITS.get(index).copied().unwrap_or(MAX_BLOCK_SIZE);
    low..=high
}

#[derive(Debug)]
pub struct Buckets {
    heads: [Option<BlockRef>; NUM_BUCKETS],
}

impl Buckets {
    /// Creates a registry where every bucket is empty.
    #[inline]
    pub const fn new() -> Self {
        Buckets {
            heads: [None; NUM_BUCKETS],
        }
    }

    /// Returns the head of bucket `index` or `None` if the bucket is empty.
    #[inline]
    pub fn head(&self, index: usize) -> Option<BlockRef> {
        self.heads[index]
    }

    /// Pushes `block` to the front of bucket `index`.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// This function is unsafe since it assumes that `block` is a free block on `heap`
    /// that isn't part of any list yet.
    pub unsafe fn insert(&mut self, heap: &mut Heap, index: usize, block: BlockRef) {
        debug_assert!(heap.is_free(block), "Only free blocks can be listed.");
        debug_assert_eq!(bucket_index(heap.size_of(block)), index);

        let old_head = self.heads[index];
        heap.set_prev_free(block, None);
        heap.set_next_free(block, old_head);
        if let Some(old_head) = old_head {
            heap.set_prev_free(old_head, Some(block));
        }
        self.heads[index] = Some(block);
    }

    /// Removes `block` from the bucket its size maps to and clears its links.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// This function is unsafe since it assumes that `block` is part of that bucket,
    /// i.e. its size did not change since it was inserted.
    pub unsafe fn remove(&mut self, heap: &mut Heap, block: BlockRef) {
        let index = bucket_index(heap.size_of(block));
        let prev = heap.prev_free(block);
        let next = heap.next_free(block);
        match prev {
            None => {
                debug_assert_eq!(self.heads[index], Some(block), "Unlinked block isn't listed.");
                self.heads[index] = next;
            }
            Some(prev) => heap.set_next_free(prev, next),
        }
        if let Some(next) = next {
            heap.set_prev_free(next, prev);
        }
        heap.set_prev_free(block, None);
        heap.set_next_free(block, None);
    }

    /// Counts the blocks in bucket `index`.
    ///
    /// # Safety
    /// This function is unsafe since it assumes that the bucket is well formed.
    pub unsafe fn len(&self, heap: &Heap, index: usize) -> usize {
        let mut count = 0;
        let mut p = self.heads[index];
        while let Some(block) = p {
            count += 1;
            p = heap.next_free(block);
        }
        count
    }
}

impl Default for Buckets {
    fn default() -> Self {
        Buckets::new()
    }
}
