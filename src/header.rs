//! Defines the [`Tag`] struct (the boundary tag written at both ends of a block)
//! and the layout constants every other module builds on.

use core::fmt;
use core::mem::size_of;

use static_assertions::const_assert;

/// Alignment of every payload and of every block size.
pub const ALIGNMENT: usize = 8;

/// Size of one encoded tag, i.e. of a block header or footer.
pub const TAG_SIZE: usize = size_of::<u32>();

/// Size of one intrusive free-list link (a heap offset).
pub const LINK_SIZE: usize = size_of::<u32>();

/// Header plus footer.
pub const BLOCK_OVERHEAD: usize = 2 * TAG_SIZE;

/// The smallest block that can still hold both free-list links once it is freed.
pub const MIN_BLOCK_SIZE: usize =
    (BLOCK_OVERHEAD + 2 * LINK_SIZE + ALIGNMENT - 1) & !(ALIGNMENT - 1);

/// The low bits of an encoded tag that are not part of the size.
const FLAG_MASK: u32 = (ALIGNMENT - 1) as u32;
const ALLOCATED_BIT: u32 = 1;

/// The largest block size an encoded tag can represent.
pub const MAX_BLOCK_SIZE: usize = (u32::MAX & !FLAG_MASK) as usize;

const_assert!(ALIGNMENT.is_power_of_two());
const_assert!(MIN_BLOCK_SIZE % ALIGNMENT == 0);
const_assert!(MIN_BLOCK_SIZE >= BLOCK_OVERHEAD + 2 * LINK_SIZE);
// The allocation flag has to fit below the size bits.
const_assert!(ALLOCATED_BIT < ALIGNMENT as u32);

/// The `(size, allocated)` pair stored in a block header and, redundantly, in its footer.
///
/// # Encoding
/// A tag is stored as a single native-endian `u32` word: `size | allocated`.
/// Since every size is a multiple of [`ALIGNMENT`] the three low bits of the size
/// are always zero and bit 0 is free to hold the allocation flag.
/// [`decode`](Tag::decode) masks those three bits off again, so stray bits 1 and 2
/// never leak into the size.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    size: u32,
    allocated: bool,
}

impl Tag {
    /// Creates a tag for a block of `size` bytes.
    ///
    /// `size` has to be a multiple of [`ALIGNMENT`] no larger than [`MAX_BLOCK_SIZE`],
    /// this is only checked in debug builds.
    #[inline(always)]
    pub fn new(size: usize, allocated: bool) -> Tag {
        debug_assert_eq!(size % ALIGNMENT, 0, "size should be a multiple of {ALIGNMENT}.");
        debug_assert!(size <= MAX_BLOCK_SIZE, "size {size} is not representable.");
        Tag {
            size: size as u32,
            allocated,
        }
    }

    #[inline(always)]
    pub const fn encode(self) -> u32 {
        self.size | (self.allocated as u32)
    }

    #[inline(always)]
    pub const fn decode(word: u32) -> Tag {
        Tag {
            size: word & !FLAG_MASK,
            allocated: word & ALLOCATED_BIT != 0,
        }
    }

    /// Total block size, header and footer included.
    #[inline(always)]
    pub const fn size(&self) -> usize {
        self.size as usize
    }

    #[inline(always)]
    pub const fn is_allocated(&self) -> bool {
        self.allocated
    }

    #[inline(always)]
    pub const fn is_free(&self) -> bool {
        !self.allocated
    }

    /// Returns the same tag with the allocation flag replaced.
    #[inline(always)]
    pub const fn with_allocated(self, allocated: bool) -> Tag {
        Tag {
            size: self.size,
            allocated,
        }
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[size:{},alloc:{}]", self.size, self.allocated as u8)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
