//! [`Grower`] trait and structures that implement it.
//!
//! The [`Grower`] trait is the memory-growth primitive [`SegMalloc`](crate::SegMalloc) sits on:
//! anything that acts as a contiguous buffer which can be extended at its end.

use core::fmt;
use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::NonNull;

use libc::{c_void, intptr_t, sbrk};
use tracing::{debug, warn};

use crate::error::GrowError;
use crate::header::ALIGNMENT;
use crate::util::align_offset;

/// A trait for types that act as if they were a contiguous growable buffer.
///
/// # Safety
/// Implementors must guarantee that
/// * every successful [`grow`](Grower::grow) hands out exactly `size` bytes that
///   nothing else reads or writes for as long as the grower is alive,
/// * the first region is aligned to [`ALIGNMENT`] and every later region starts where the
///   previous one ended,
/// * moving the grower does not invalidate the handed-out memory (growers reference
///   their buffers rather than own them inline).
pub unsafe trait Grower {
    /// Extends the buffer by exactly `size` bytes and returns the start of the new bytes.
    /// `grow(0)` returns the current end of the buffer without growing it.
    fn grow(&mut self, size: usize) -> Result<NonNull<u8>, GrowError>;

    /// Returns the first and the last (inclusive) byte handed out so far,
    /// or `None` if nothing was grown yet.
    fn bounds(&self) -> Option<(NonNull<u8>, NonNull<u8>)>;
}

unsafe impl<T: Grower + ?Sized> Grower for &mut T {
    fn grow(&mut self, size: usize) -> Result<NonNull<u8>, GrowError> {
        (**self).grow(size)
    }

    fn bounds(&self) -> Option<(NonNull<u8>, NonNull<u8>)> {
        (**self).bounds()
    }
}

/// A grower that hands out a borrowed buffer piece by piece, like a simulated `sbrk`
/// with a fixed maximum heap.
///
/// The buffer is borrowed as `u64`s, which guarantees its alignment.
///
/// ```
/// use seg_malloc::growers::{ArenaGrower, Grower};
///
/// let mut buf = vec![0_u64; 64];
/// let mut arena = ArenaGrower::new(&mut buf);
/// let start = arena.grow(16).unwrap();
/// assert_eq!(arena.grow(0).unwrap().as_ptr(), start.as_ptr().wrapping_add(16));
/// assert!(arena.grow(64 * 8).is_err());
/// ```
pub struct ArenaGrower<'a> {
    start: NonNull<u8>,
    capacity: usize,
    used: usize,
    _buf: PhantomData<&'a mut [u64]>,
}

impl<'a> ArenaGrower<'a> {
    /// Creates a grower over `buf`. Nothing is handed out until the first [`grow`](Grower::grow).
    pub fn new(buf: &'a mut [u64]) -> Self {
        ArenaGrower {
            start: NonNull::from(&mut *buf).cast(),
            capacity: buf.len() * size_of::<u64>(),
            used: 0,
            _buf: PhantomData,
        }
    }

    /// Total bytes the arena can hand out.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far.
    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }
}

impl fmt::Debug for ArenaGrower<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaGrower")
            .field("start", &self.start)
            .field("capacity", &self.capacity)
            .field("used", &self.used)
            .finish()
    }
}

unsafe impl Grower for ArenaGrower<'_> {
    fn grow(&mut self, size: usize) -> Result<NonNull<u8>, GrowError> {
        if size > self.capacity - self.used {
            return Err(GrowError::Exhausted { requested: size });
        }
        // `used <= capacity`, so the pointer stays inside (or one past) the buffer.
        let heap_end = unsafe { self.start.add(self.used) };
        self.used += size;
        Ok(heap_end)
    }

    fn bounds(&self) -> Option<(NonNull<u8>, NonNull<u8>)> {
        if self.used == 0 {
            return None;
        }
        Some((self.start, unsafe { self.start.add(self.used - 1) }))
    }
}

/// A grower that uses [`libc::sbrk`] to extend the process's data segment.
///
/// Growth that does not continue the previously grown region (because somebody else
/// moved the program break in between) is reported as [`GrowError::NotContiguous`].
#[derive(Debug)]
pub struct BrkGrower {
    heap_start: Option<NonNull<u8>>,
    heap_end: Option<NonNull<u8>>,
}

impl BrkGrower {
    /// # Safety
    /// Callers must make sure that nothing lowers the program break below memory
    /// this grower handed out, for as long as that memory is in use.
    #[inline(always)]
    pub const unsafe fn new() -> Self {
        BrkGrower {
            heap_start: None,
            heap_end: None,
        }
    }

    /// Moves the break by `increment` bytes and returns the old break.
    fn move_break(increment: usize) -> Result<NonNull<u8>, GrowError> {
        let increment =
            intptr_t::try_from(increment).map_err(|_| GrowError::Exhausted { requested: increment })?;
        let old_break = unsafe { sbrk(increment) };
        if old_break == usize::MAX as *mut c_void {
            let code = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            warn!(increment, code, "sbrk failed.");
            return Err(GrowError::Os { code });
        }
        NonNull::new(old_break.cast()).ok_or(GrowError::Os { code: 0 })
    }

    /// Finds the initial break and pads it up to [`ALIGNMENT`].
    fn try_init(&mut self) -> Result<NonNull<u8>, GrowError> {
        debug_assert!(self.heap_end.is_none());
        let current = Self::move_break(0)?;
        let pad = align_offset(current.as_ptr() as usize, ALIGNMENT).ok_or(GrowError::Misaligned {
            addr: current.as_ptr() as usize,
        })?;
        if pad != 0 {
            let old_break = Self::move_break(pad)?;
            if old_break != current {
                return Err(GrowError::NotContiguous {
                    expected: current.as_ptr() as usize,
                    found: old_break.as_ptr() as usize,
                });
            }
        }
        let heap_start = unsafe { current.add(pad) };
        debug!(?heap_start, pad, "Initialized program break grower.");
        self.heap_start = Some(heap_start);
        self.heap_end = Some(heap_start);
        Ok(heap_start)
    }
}

unsafe impl Grower for BrkGrower {
    fn grow(&mut self, size: usize) -> Result<NonNull<u8>, GrowError> {
        let heap_end = match self.heap_end {
            Some(end) => end,
            None => self.try_init()?,
        };
        if size == 0 {
            return Ok(heap_end);
        }
        let old_break = Self::move_break(size)?;
        if old_break != heap_end {
            return Err(GrowError::NotContiguous {
                expected: heap_end.as_ptr() as usize,
                found: old_break.as_ptr() as usize,
            });
        }
        self.heap_end = Some(unsafe { heap_end.add(size) });
        Ok(heap_end)
    }

    fn bounds(&self) -> Option<(NonNull<u8>, NonNull<u8>)> {
        match (self.heap_start, self.heap_end) {
            (Some(start), Some(end)) if end > start => Some((start, unsafe { end.sub(1) })),
            _ => None,
        }
    }
}
