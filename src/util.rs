//! Utility functions.

/// Returns the number of bytes needed to move `addr` up to the next multiple of `align`
/// or `None` if that multiple lies beyond the address space.
///
/// # Panics
/// Panics if `align` is not a power-of-two.
#[inline]
pub(crate) fn align_offset(addr: usize, align: usize) -> Option<usize> {
    assert!(align.is_power_of_two(), "align should be a power of two.");
    let offset = addr.wrapping_neg() & (align - 1);
    addr.checked_add(offset).map(|_| offset)
}

/// Returns the smallest integer `z` such that `z ≥ x` and `z = y.k` for some integer `k`.
/// or `None` if that integer can not be contained in a `usize`.
///
/// # Panics
/// Panics if `y` is 0.
#[inline]
pub(crate) fn find_divisible(x: usize, y: usize) -> Option<usize> {
    if x % y == 0 {
        Some(x)
    } else {
        ((x / y) * y).checked_add(y)
    }
}
