//! The heap arena and the block-level operations defined on top of it.
//!
//! The heap is one contiguous byte region handed out by a [`Grower`](crate::growers::Grower).
//! Blocks are never referred to by Rust references, instead a [`BlockRef`] holds
//! the offset of a block's payload from the start of the heap and every read or
//! write goes through the typed accessors of [`Heap`].
//!
//! ```text
//!            header         payload (links while free)          footer
//!   ... | size | a |  prev_free | next_free | ...  | size | a | ...
//!                  ^ BlockRef
//! ```

use core::fmt;
use core::ptr::NonNull;

use static_assertions::const_assert;

use crate::error::GrowError;
use crate::header::{Tag, ALIGNMENT, BLOCK_OVERHEAD, LINK_SIZE, TAG_SIZE};

/// Size of the prologue block, a header and a footer with nothing in between.
pub const PROLOGUE_SIZE: usize = BLOCK_OVERHEAD;

/// Padding word + prologue + epilogue header.
pub const INITIAL_HEAP_SIZE: usize = TAG_SIZE + PROLOGUE_SIZE + TAG_SIZE;

/// Bytes of the heap no block accounts for: the leading padding word and the epilogue header.
pub const HEAP_OVERHEAD: usize = TAG_SIZE + TAG_SIZE;

/// Heap offsets are stored in `u32` links, so the heap can never outgrow them.
pub const MAX_HEAP_SIZE: usize = (u32::MAX as usize) & !(ALIGNMENT - 1);

/// The prologue sits right after the padding word that aligns every payload.
pub const PROLOGUE: BlockRef = BlockRef((TAG_SIZE + TAG_SIZE) as u32);

/// The first real block starts where the initial epilogue used to be.
pub const FIRST_BLOCK: BlockRef = BlockRef((INITIAL_HEAP_SIZE) as u32);

const_assert!(INITIAL_HEAP_SIZE % ALIGNMENT == 0);
const_assert!(PROLOGUE.0 as usize % ALIGNMENT == 0);

/// Offset of a block's payload from the heap base.
///
/// A `BlockRef` is never 0 (the padding word lives there),
/// which lets links encode "no block" as 0.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockRef(u32);

impl BlockRef {
    #[inline(always)]
    pub const fn offset(self) -> usize {
        self.0 as usize
    }

    /// # Panics
    /// Panics in debug builds if `offset` does not fit a heap offset.
    #[inline(always)]
    pub fn from_offset(offset: usize) -> BlockRef {
        debug_assert!(offset <= MAX_HEAP_SIZE);
        BlockRef(offset as u32)
    }

    #[inline(always)]
    fn encode_link(link: Option<BlockRef>) -> u32 {
        link.map_or(0, |b| b.0)
    }

    #[inline(always)]
    fn decode_link(word: u32) -> Option<BlockRef> {
        (word != 0).then_some(BlockRef(word))
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockRef(+{:#x})", self.0)
    }
}

/// The grown heap region.
///
/// `Heap` does not own its bytes, the grower does. It only remembers where they start
/// and how many of them were handed to the allocator.
pub struct Heap {
    base: NonNull<u8>,
    len: usize,
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

impl Heap {
    /// A heap that has not been grown yet.
    pub const fn empty() -> Heap {
        Heap {
            base: NonNull::dangling(),
            len: 0,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The absolute address of `offset`, used for diagnostics.
    #[inline(always)]
    pub fn address(&self, offset: usize) -> usize {
        self.base.as_ptr() as usize + offset
    }

    /// Appends `size` freshly grown bytes starting at `start` to the heap.
    ///
    /// The first region fixes the heap base, every later one has to continue
    /// exactly where the heap currently ends.
    pub fn claim(&mut self, start: NonNull<u8>, size: usize) -> Result<(), GrowError> {
        if self.is_empty() {
            if start.as_ptr() as usize % ALIGNMENT != 0 {
                return Err(GrowError::Misaligned {
                    addr: start.as_ptr() as usize,
                });
            }
            self.base = start;
        } else if start.as_ptr() as usize != self.address(self.len) {
            return Err(GrowError::NotContiguous {
                expected: self.address(self.len),
                found: start.as_ptr() as usize,
            });
        }
        self.len += size;
        Ok(())
    }

    //---------------raw words---------------//

    /// # Safety
    /// `at..at + 4` has to lie within the heap and `at` has to be 4-byte aligned.
    #[inline(always)]
    unsafe fn word(&self, at: usize) -> u32 {
        debug_assert!(at + TAG_SIZE <= self.len, "read at {at:#x} past heap end {:#x}", self.len);
        debug_assert_eq!(at % TAG_SIZE, 0);
        self.base.as_ptr().add(at).cast::<u32>().read()
    }

    /// # Safety
    /// Same as [`word`](Heap::word).
    #[inline(always)]
    unsafe fn set_word(&mut self, at: usize, value: u32) {
        debug_assert!(at + TAG_SIZE <= self.len, "write at {at:#x} past heap end {:#x}", self.len);
        debug_assert_eq!(at % TAG_SIZE, 0);
        self.base.as_ptr().add(at).cast::<u32>().write(value)
    }

    /// Bounds-checked read that never touches memory outside the heap.
    #[inline]
    pub fn try_word(&self, at: usize) -> Option<u32> {
        if at % TAG_SIZE != 0 || at.checked_add(TAG_SIZE)? > self.len {
            return None;
        }
        Some(unsafe { self.word(at) })
    }

    /// Bounds-checked read of the tag stored at byte offset `at`.
    #[inline]
    pub fn try_tag(&self, at: usize) -> Option<Tag> {
        self.try_word(at).map(Tag::decode)
    }

    /// # Safety
    /// `at` has to be the offset of a header or footer inside the heap.
    #[inline(always)]
    pub unsafe fn tag(&self, at: usize) -> Tag {
        Tag::decode(self.word(at))
    }

    /// # Safety
    /// `at` has to be the offset of a header or footer inside the heap.
    #[inline(always)]
    pub unsafe fn set_tag(&mut self, at: usize, tag: Tag) {
        self.set_word(at, tag.encode())
    }

    /// Writes zeroes over `len` bytes starting at `at`.
    ///
    /// # Safety
    /// The range has to lie within the heap.
    pub unsafe fn zero(&mut self, at: usize, len: usize) {
        debug_assert!(at + len <= self.len);
        self.base.as_ptr().add(at).write_bytes(0, len)
    }

    //---------------block encoding---------------//

    #[inline(always)]
    fn debug_check_block(&self, block: BlockRef) {
        debug_assert!(
            block.offset() >= PROLOGUE.offset() && block.offset() <= self.len,
            "{block:?} is outside of the heap (len {:#x})",
            self.len
        );
        debug_assert_eq!(block.offset() % ALIGNMENT, 0, "{block:?} is misaligned");
    }

    /// Offset of the block header.
    #[inline(always)]
    pub fn header_at(block: BlockRef) -> usize {
        block.offset() - TAG_SIZE
    }

    /// Offset of the block footer, given the block size.
    #[inline(always)]
    pub fn footer_at(block: BlockRef, size: usize) -> usize {
        block.offset() + size - BLOCK_OVERHEAD
    }

    /// # Safety
    /// `block` has to point to a block inside the grown heap.
    #[inline(always)]
    pub unsafe fn header(&self, block: BlockRef) -> Tag {
        self.debug_check_block(block);
        self.tag(Self::header_at(block))
    }

    /// # Safety
    /// `block` has to point to a non-epilogue block inside the grown heap.
    #[inline(always)]
    pub unsafe fn footer(&self, block: BlockRef) -> Tag {
        let size = self.header(block).size();
        debug_assert!(size >= BLOCK_OVERHEAD, "The epilogue has no footer.");
        self.tag(Self::footer_at(block, size))
    }

    /// # Safety
    /// `block` has to point to a block inside the grown heap.
    #[inline(always)]
    pub unsafe fn size_of(&self, block: BlockRef) -> usize {
        self.header(block).size()
    }

    /// # Safety
    /// `block` has to point to a block inside the grown heap.
    #[inline(always)]
    pub unsafe fn is_free(&self, block: BlockRef) -> bool {
        self.header(block).is_free()
    }

    /// Writes the same tag to the header and the footer of `block`.
    ///
    /// # Safety
    /// `block..block + size` has to be heap memory that is not part of any live allocation.
    #[inline(always)]
    pub unsafe fn set_block(&mut self, block: BlockRef, size: usize, allocated: bool) {
        self.debug_check_block(block);
        let tag = Tag::new(size, allocated);
        self.set_tag(Self::header_at(block), tag);
        self.set_tag(Self::footer_at(block, size), tag);
    }

    /// Flips the allocation flag of `block` in both of its tags.
    ///
    /// # Safety
    /// `block` has to point to a non-epilogue block inside the grown heap.
    #[inline(always)]
    pub unsafe fn mark(&mut self, block: BlockRef, free: bool) {
        let tag = self.header(block);
        debug_assert_eq!(tag, self.footer(block), "{block:?} has mismatched tags");
        let tag = tag.with_allocated(!free);
        self.set_tag(Self::header_at(block), tag);
        self.set_tag(Self::footer_at(block, tag.size()), tag);
    }

    /// The block physically following `block`, found through its header.
    ///
    /// # Safety
    /// `block` has to point to a non-epilogue block inside the grown heap.
    #[inline(always)]
    pub unsafe fn next_physical(&self, block: BlockRef) -> BlockRef {
        BlockRef::from_offset(block.offset() + self.size_of(block))
    }

    /// The block physically preceding `block`, found through the previous footer.
    ///
    /// # Safety
    /// `block` has to point to a block after the prologue.
    #[inline(always)]
    pub unsafe fn prev_physical(&self, block: BlockRef) -> BlockRef {
        self.debug_check_block(block);
        debug_assert!(block > PROLOGUE, "The prologue has no predecessor.");
        let prev_size = self.tag(block.offset() - BLOCK_OVERHEAD).size();
        BlockRef::from_offset(block.offset() - prev_size)
    }

    /// # Safety
    /// `block` has to point to a block inside the grown heap.
    #[inline(always)]
    pub unsafe fn payload_pointer(&self, block: BlockRef) -> NonNull<u8> {
        self.debug_check_block(block);
        NonNull::new_unchecked(self.base.as_ptr().add(block.offset()))
    }

    /// # Safety
    /// `ptr` has to be a payload pointer previously produced by [`payload_pointer`](Heap::payload_pointer).
    #[inline(always)]
    pub unsafe fn block_from_payload(&self, ptr: NonNull<u8>) -> BlockRef {
        let addr = ptr.as_ptr() as usize;
        debug_assert!(
            addr >= self.base.as_ptr() as usize,
            "{ptr:?} lies below the heap base {:?}",
            self.base
        );
        let block = BlockRef::from_offset(addr - self.base.as_ptr() as usize);
        self.debug_check_block(block);
        block
    }

    //---------------free links---------------//

    /// # Safety
    /// `block` has to be a free block inside the grown heap.
    #[inline(always)]
    pub unsafe fn prev_free(&self, block: BlockRef) -> Option<BlockRef> {
        BlockRef::decode_link(self.word(block.offset()))
    }

    /// # Safety
    /// `block` has to be a free block inside the grown heap.
    #[inline(always)]
    pub unsafe fn next_free(&self, block: BlockRef) -> Option<BlockRef> {
        BlockRef::decode_link(self.word(block.offset() + LINK_SIZE))
    }

    /// # Safety
    /// `block` has to be a free block inside the grown heap.
    #[inline(always)]
    pub unsafe fn set_prev_free(&mut self, block: BlockRef, link: Option<BlockRef>) {
        self.set_word(block.offset(), BlockRef::encode_link(link))
    }

    /// # Safety
    /// `block` has to be a free block inside the grown heap.
    #[inline(always)]
    pub unsafe fn set_next_free(&mut self, block: BlockRef, link: Option<BlockRef>) {
        self.set_word(block.offset() + LINK_SIZE, BlockRef::encode_link(link))
    }

    /// Bounds-checked link read for the consistency checker: `(prev_free, next_free)`.
    pub fn try_links(&self, block: BlockRef) -> Option<(Option<BlockRef>, Option<BlockRef>)> {
        let prev = self.try_word(block.offset())?;
        let next = self.try_word(block.offset() + LINK_SIZE)?;
        Some((BlockRef::decode_link(prev), BlockRef::decode_link(next)))
    }
}
