//! A single-threaded segregated-fit memory allocator written in Rust.
//!
//! The allocator manages one contiguous heap that only ever grows, the way a classic
//! `sbrk`-based `malloc` does. It is written to be read: every step of the block layout
//! and of the bookkeeping is documented, and a consistency checker can verify the whole
//! heap after every operation.
//!
//! # Usage
//! ```
//! use seg_malloc::growers::ArenaGrower;
//! use seg_malloc::{Config, SegMalloc};
//!
//! let mut buf = vec![0_u64; 4096];
//! let mut allocator =
//!     SegMalloc::with_config(ArenaGrower::new(&mut buf), Config::new().with_heap_checks(true));
//!
//! let p = allocator.allocate(24).unwrap();
//! let q = unsafe { allocator.reallocate(Some(p), 200) }.unwrap();
//! unsafe { allocator.release(Some(q)) };
//!
//! let stats = allocator.stats();
//! assert_eq!(stats.allocated_blocks, 0);
//! assert_eq!(stats.free_blocks, 1);
//! ```
//!
//! # Mode of operation
//! - When an allocation is requested its size is *adjusted*: room for a header and a
//!   footer is added and the result is rounded up to [`ALIGNMENT`].
//!   The adjusted size picks a [bucket](#buckets) and the search walks that bucket and every
//!   larger one, taking the first block that is big enough. If the block is larger than
//!   needed, the rest is split off as a new free block.
//! - If no block fits, the heap is grown by its [grower](#growers). The new space
//!   is merged with a free block that ended at the old heap end before it is used.
//! - On release the block is marked free and merged with its free neighbors right away,
//!   so two free blocks are never adjacent. The result is pushed to the front of its bucket.
//!
//! Below are the abstractions the allocator uses on the heap:
//!
//! ## Blocks
//! The heap is divided into blocks. Each block starts with a header and ends with a footer
//! holding the same [`Tag`]: the block size and whether it is allocated. In between lies
//! the payload handed out to the user. The footer lets a block find its *previous*
//! neighbor in constant time, which is what makes immediate merging cheap.
//!
//! The heap starts with a padding word and an allocated *prologue* block and ends with an
//! allocated zero-sized *epilogue* header. Neither is ever merged, which spares the merge
//! logic any edge cases at the heap boundaries.
//!
//! ## Buckets
//! Free blocks are kept in [`NUM_BUCKETS`] doubly-linked lists, each covering a range of
//! sizes (see [`bucket_range`]). The links live inside the payloads of the free blocks
//! themselves, so free blocks cost no memory beyond the blocks. This is also why no block
//! is smaller than [`MIN_BLOCK_SIZE`].
//!
//! ## Growers
//! A grower is the allocator's source of memory. [`SegMalloc`] is generic over it:
//! anything that implements [`Grower`] (anything acting as a contiguous buffer that can
//! grow at its end) can back the heap. [`ArenaGrower`] hands out a borrowed buffer and
//! [`BrkGrower`] moves the program break.
//!
//! # Limits
//! Tags and links are 32-bit words, so a heap is at most 4 GiB large. Memory is never
//! given back to the grower, and the allocator is not thread safe: every operation
//! takes `&mut self`.
//!
//! [`Grower`]: growers::Grower
//! [`ArenaGrower`]: growers::ArenaGrower
//! [`BrkGrower`]: growers::BrkGrower

pub use crate::allocators::{HeapStats, SegMalloc, Violation};
pub use crate::block::HEAP_OVERHEAD;
pub use crate::config::Config;
pub use crate::error::{AllocError, GrowError};
pub use crate::freelist::{bucket_index, bucket_range, NUM_BUCKETS};
pub use crate::header::{Tag, ALIGNMENT, BLOCK_OVERHEAD, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

pub mod allocators;
mod block;
mod config;
mod error;
mod freelist;
pub mod growers;
mod header;
mod util;
