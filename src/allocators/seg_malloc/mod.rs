//! A single-threaded segregated-fit memory allocator.
//!
// For a general view of the allocator's operational semantics see the [`crate`] level documentation.
//
// # Additional implementation notes
// ## Adjusted sizes
// Every private function that takes a `size` expects an *adjusted* block size, that is
// a request plus header and footer, rounded up to `ALIGNMENT` and at least `MIN_BLOCK_SIZE`.
// Public entry points adjust requests via `util::adjust_size` before anything else happens,
// so an oversized request never touches the heap.
//
// ## Free blocks and buckets
// A block is listed in exactly one bucket, the one `bucket_index` maps its size to,
// for exactly as long as it is free. `Buckets::remove` finds that bucket through the block
// size, which is why a block is always unlinked *before* its tags are rewritten with a
// new size.

use core::fmt;
use core::ptr::{copy_nonoverlapping, NonNull};

use tracing::{debug, error, instrument, Level};

use self::util::{adjust_size, payload_size};
use crate::block::{BlockRef, Heap, FIRST_BLOCK, INITIAL_HEAP_SIZE, MAX_HEAP_SIZE, PROLOGUE, PROLOGUE_SIZE};
use crate::config::Config;
use crate::error::AllocError;
use crate::freelist::{bucket_index, Buckets, NUM_BUCKETS};
use crate::growers::Grower;
use crate::header::{Tag, ALIGNMENT, MIN_BLOCK_SIZE};

mod check;
mod util;

pub use self::check::Violation;

/// A single-threaded memory allocator managing one heap obtained from a [`Grower`].
///
/// ```
/// use seg_malloc::growers::ArenaGrower;
/// use seg_malloc::SegMalloc;
///
/// let mut buf = vec![0_u64; 1024];
/// let mut allocator = SegMalloc::with_grower(ArenaGrower::new(&mut buf));
///
/// let p = allocator.allocate(100).unwrap();
/// assert_eq!(p.as_ptr() as usize % seg_malloc::ALIGNMENT, 0);
/// unsafe { allocator.release(Some(p)) };
/// assert!(allocator.check(false).is_ok());
/// ```
pub struct SegMalloc<G: Grower> {
    grower: G,
    config: Config,
    heap: Heap,
    buckets: Buckets,
    initialized: bool,
}

/// A snapshot of the heap, gathered by walking every block and every bucket.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Bytes obtained from the grower.
    pub heap_size: usize,
    /// Bytes covered by blocks, the prologue included.
    pub block_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    /// Allocated blocks, not counting the prologue and epilogue.
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    /// Number of free blocks listed in every bucket.
    pub bucket_lengths: [usize; NUM_BUCKETS],
}

impl<G: Grower + fmt::Debug> fmt::Debug for SegMalloc<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegMalloc")
            .field("grower", &self.grower)
            .field("config", &self.config)
            .field("heap", &self.heap)
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl<G: Grower> SegMalloc<G> {
    /// Creates an allocator with the default [`Config`] on top of `grower`.
    /// No memory is requested until the first allocation or an explicit [`init`](SegMalloc::init).
    pub const fn with_grower(grower: G) -> Self {
        Self::with_config(grower, Config::new())
    }

    pub const fn with_config(grower: G, config: Config) -> Self {
        SegMalloc {
            grower,
            config,
            heap: Heap::empty(),
            buckets: Buckets::new(),
            initialized: false,
        }
    }

    #[inline]
    pub fn config(&self) -> Config {
        self.config
    }

    #[inline]
    pub fn grower(&self) -> &G {
        &self.grower
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Lays out the prologue and epilogue and grows the heap by one chunk.
    ///
    /// Calling `init` on an initialized allocator does nothing. Allocating initializes
    /// lazily, so calling `init` up front is optional.
    #[instrument(level = "info", skip(self), err(level = Level::WARN))]
    pub fn init(&mut self) -> Result<(), AllocError> {
        if self.initialized {
            return Ok(());
        }

        let start = self
            .grower
            .grow(INITIAL_HEAP_SIZE)
            .and_then(|start| self.heap.claim(start, INITIAL_HEAP_SIZE).map(|()| start))
            .map_err(|source| {
                error!(%source, "Couldn't obtain the initial heap.");
                AllocError::OutOfMemory {
                    bytes: INITIAL_HEAP_SIZE,
                    source,
                }
            })?;

        unsafe {
            // Padding word, it puts every payload on an `ALIGNMENT` boundary.
            self.heap.set_tag(0, Tag::new(0, false));
            self.heap.set_block(PROLOGUE, PROLOGUE_SIZE, true);
            self.heap.set_tag(Heap::header_at(FIRST_BLOCK), Tag::new(0, true));
        }
        self.initialized = true;
        debug!(heap_start = ?start, "Heap initialized.");

        self.extend_heap(self.config.chunk_size())?;
        self.check_heap("init");
        Ok(())
    }

    /// Allocates a block with room for at least `size` bytes.
    /// Returns `None` if `size` is 0 or the request can not be satisfied.
    #[inline]
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.try_allocate(size).ok()
    }

    /// Like [`allocate`](SegMalloc::allocate) but reports why an allocation failed.
    #[instrument(level = "info", skip(self), ret(level = Level::INFO), err(level = Level::WARN))]
    pub fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }
        let adjusted = adjust_size(size)?;
        debug!(adjusted, "Size adjusted.");

        if !self.initialized {
            self.init()?;
        }
        self.check_heap("allocate");

        let block = match unsafe { self.find_fit(adjusted) } {
            Some(block) => {
                debug!(?block, "Found free block to accommodate the request.");
                block
            }
            None => {
                debug!("No free block fits, requesting heap growth.");
                self.extend_heap(adjusted.max(self.config.chunk_size()))?
            }
        };

        unsafe { self.place(block, adjusted) };
        self.check_heap("allocate");
        Ok(unsafe { self.heap.payload_pointer(block) })
    }

    /// Releases the allocation at `ptr`; releasing `None` does nothing.
    ///
    /// # Safety
    /// `ptr` has to be `None` or a pointer returned by this allocator that was not released since.
    #[instrument(level = "info", skip(self))]
    pub unsafe fn release(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(ptr) = ptr else {
            return;
        };
        debug_assert!(self.initialized, "Nothing was allocated yet.");
        self.check_heap("release");

        let block = self.heap.block_from_payload(ptr);
        debug_assert!(!self.heap.is_free(block), "Block is already free.");

        self.heap.mark(block, true);
        let block = self.coalesce(block);
        let index = bucket_index(self.heap.size_of(block));
        self.buckets.insert(&mut self.heap, index, block);
        debug!(?block, index, "Listed released block.");

        self.check_heap("release");
    }

    /// Moves the allocation at `ptr` into a block with room for `size` bytes.
    ///
    /// * `size == 0` releases `ptr` and returns `None`,
    /// * `ptr == None` is the same as [`allocate(size)`](SegMalloc::allocate),
    /// * otherwise the contents are copied to a fresh block (up to the smaller of both sizes)
    ///   and the old block is released. If no fresh block can be obtained `None` is returned
    ///   and the old allocation stays untouched.
    ///
    /// # Safety
    /// Same as [`release`](SegMalloc::release).
    #[inline]
    pub unsafe fn reallocate(&mut self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        self.try_reallocate(ptr, size).ok().flatten()
    }

    /// Like [`reallocate`](SegMalloc::reallocate) but reports why the fresh allocation failed.
    ///
    /// # Safety
    /// Same as [`release`](SegMalloc::release).
    #[instrument(level = "info", skip(self), ret(level = Level::INFO), err(level = Level::WARN))]
    pub unsafe fn try_reallocate(
        &mut self,
        ptr: Option<NonNull<u8>>,
        size: usize,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        if size == 0 {
            self.release(ptr);
            return Ok(None);
        }
        let Some(old) = ptr else {
            return self.try_allocate(size).map(Some);
        };

        let old_size = self.usable_size(old);
        let new = self.try_allocate(size)?;
        let copied = old_size.min(size);
        copy_nonoverlapping(old.as_ptr(), new.as_ptr(), copied);
        debug!(copied, "Copied contents into the new block.");
        self.release(Some(old));
        Ok(Some(new))
    }

    /// Allocates room for `count` elements of `elem_size` bytes and zeroes it.
    #[inline]
    pub fn zero_allocate(&mut self, count: usize, elem_size: usize) -> Option<NonNull<u8>> {
        self.try_zero_allocate(count, elem_size).ok()
    }

    /// Like [`zero_allocate`](SegMalloc::zero_allocate) but reports why the allocation failed.
    /// A product of `count` and `elem_size` that overflows is an error, not a wrap-around.
    #[instrument(level = "info", skip(self), ret(level = Level::INFO), err(level = Level::WARN))]
    pub fn try_zero_allocate(&mut self, count: usize, elem_size: usize) -> Result<NonNull<u8>, AllocError> {
        let size = count
            .checked_mul(elem_size)
            .ok_or(AllocError::Overflow { count, elem_size })?;
        let ptr = self.try_allocate(size)?;
        unsafe {
            let block = self.heap.block_from_payload(ptr);
            let len = payload_size(self.heap.size_of(block));
            self.heap.zero(block.offset(), len);
        }
        Ok(ptr)
    }

    /// Returns how many bytes the allocation at `ptr` can hold,
    /// which is at least as many as were requested.
    ///
    /// # Safety
    /// `ptr` has to be a live allocation of this allocator.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        let block = self.heap.block_from_payload(ptr);
        let header = self.heap.header(block);
        debug_assert!(header.is_allocated(), "{ptr:?} is not allocated.");
        payload_size(header.size())
    }

    /// Walks the heap and every bucket and summarizes what it finds.
    ///
    /// The walk trusts the block tags, run [`check`](SegMalloc::check) first on a heap
    /// that might be corrupt.
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            heap_size: self.heap.len(),
            ..HeapStats::default()
        };
        if !self.initialized {
            return stats;
        }

        stats.block_bytes = PROLOGUE_SIZE;
        let mut block = FIRST_BLOCK;
        unsafe {
            loop {
                let header = self.heap.header(block);
                if header.size() == 0 {
                    break;
                }
                stats.block_bytes += header.size();
                if header.is_free() {
                    stats.free_blocks += 1;
                    stats.free_bytes += header.size();
                } else {
                    stats.allocated_blocks += 1;
                    stats.allocated_bytes += header.size();
                }
                block = self.heap.next_physical(block);
            }
            for (index, len) in stats.bucket_lengths.iter_mut().enumerate() {
                *len = self.buckets.len(&self.heap, index);
            }
        }
        stats
    }
}

impl<G: Grower> SegMalloc<G> {
    /// Returns the first block in the first non-empty bucket (starting at the bucket of `size`)
    /// that is at least `size` bytes large.
    ///
    /// # Safety
    /// This function is unsafe since it assumes that `size` is adjusted
    /// and that the buckets are well formed.
    unsafe fn find_fit(&self, size: usize) -> Option<BlockRef> {
        for index in bucket_index(size)..NUM_BUCKETS {
            let mut p = self.buckets.head(index);
            while let Some(block) = p {
                if self.heap.size_of(block) >= size {
                    return Some(block);
                }
                p = self.heap.next_free(block);
            }
        }
        None
    }

    /// Carves an allocated block of `size` bytes out of the free `block`,
    /// relisting the remainder if it is large enough to be a block of its own.
    ///
    /// # Safety
    /// This function is unsafe since it assumes that `block` is a listed free block
    /// of at least `size` bytes and that `size` is adjusted.
    #[instrument(level = "debug", skip(self))]
    unsafe fn place(&mut self, block: BlockRef, size: usize) {
        let block_size = self.heap.size_of(block);
        debug_assert!(block_size >= size, "{block:?} is too small.");
        debug_assert_eq!(size % ALIGNMENT, 0);

        self.buckets.remove(&mut self.heap, block);

        let remainder = block_size - size;
        if remainder >= MIN_BLOCK_SIZE {
            self.heap.set_block(block, size, true);
            let rest = self.heap.next_physical(block);
            self.heap.set_block(rest, remainder, false);
            self.buckets.insert(&mut self.heap, bucket_index(remainder), rest);
            debug!(?rest, remainder, "Split off a free remainder.");
        } else {
            self.heap.set_block(block, block_size, true);
            debug!(
                slack = remainder,
                "No space for a free remainder, handing out the whole block."
            );
        }
    }

    /// Merges the free `block` with its free physical neighbors and returns the merged block.
    /// Absorbed neighbors are removed from their buckets, the result is not listed.
    ///
    /// # Safety
    /// This function is unsafe since it assumes that `block` is a free block that
    /// isn't part of any bucket.
    #[instrument(level = "debug", skip(self), ret(level = Level::DEBUG))]
    unsafe fn coalesce(&mut self, block: BlockRef) -> BlockRef {
        let heap = &mut self.heap;
        let prev = heap.prev_physical(block);
        let next = heap.next_physical(block);
        let mut size = heap.size_of(block);

        match (heap.is_free(prev), heap.is_free(next)) {
            (false, false) => {
                debug!("Neither neighbor is free, nothing to merge.");
                block
            }
            (false, true) => {
                size += heap.size_of(next);
                self.buckets.remove(heap, next);
                heap.set_block(block, size, false);
                debug!(?next, size, "Merged with the next block.");
                block
            }
            (true, false) => {
                size += heap.size_of(prev);
                self.buckets.remove(heap, prev);
                heap.set_block(prev, size, false);
                debug!(?prev, size, "Merged with the previous block.");
                prev
            }
            (true, true) => {
                size += heap.size_of(prev) + heap.size_of(next);
                self.buckets.remove(heap, prev);
                self.buckets.remove(heap, next);
                heap.set_block(prev, size, false);
                debug!(?prev, ?next, size, "Merged with both neighbors.");
                prev
            }
        }
    }

    /// Grows the heap by `size` bytes and turns the new space into a free block,
    /// merged with a free block that ended at the old heap end. The block is listed
    /// and returned.
    ///
    /// On failure nothing about the heap changes.
    #[instrument(level = "debug", skip(self), ret(level = Level::DEBUG), err(Debug, level = Level::ERROR))]
    fn extend_heap(&mut self, size: usize) -> Result<BlockRef, AllocError> {
        debug_assert_eq!(size % ALIGNMENT, 0);
        debug_assert!(self.initialized);

        if size > MAX_HEAP_SIZE - self.heap.len() {
            return Err(AllocError::HeapLimit { bytes: size });
        }
        let start = self
            .grower
            .grow(size)
            .and_then(|start| self.heap.claim(start, size).map(|()| start))
            .map_err(|source| AllocError::OutOfMemory { bytes: size, source })?;
        debug!(?start, size, "Heap growth successful.");

        unsafe {
            // The new block starts where the old epilogue was, its header replaces the epilogue.
            let block = self.heap.block_from_payload(start);
            self.heap.set_block(block, size, false);
            let epilogue = self.heap.next_physical(block);
            self.heap.set_tag(Heap::header_at(epilogue), Tag::new(0, true));

            let block = self.coalesce(block);
            let index = bucket_index(self.heap.size_of(block));
            self.buckets.insert(&mut self.heap, index, block);
            Ok(block)
        }
    }

    /// Runs the consistency checker if automatic checks are enabled.
    ///
    /// # Panics
    /// Panics if the heap is corrupt, continuing could silently corrupt user data.
    fn check_heap(&self, op: &'static str) {
        if !self.config.heap_checks() || !self.initialized {
            return;
        }
        if let Err(violations) = self.check(false) {
            for violation in &violations {
                error!(op, %violation, "Heap consistency violation.");
            }
            panic!(
                "heap consistency check failed around {op} with {} violation(s), first: {}",
                violations.len(),
                violations[0]
            );
        }
    }
}

#[cfg(test)]
mod tests;
