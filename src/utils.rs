//! Helper functions that don't particularly belong to any concrete module of the allocator.

/// It aligns `to_be_aligned` using `alignment`, which must be a power of two.
///
/// Used to round block sizes up to [`crate::block::ALIGN`] and region reservations up to
/// the page size.
pub const fn align(to_be_aligned: usize, alignment: usize) -> usize {
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around on huge inputs.
pub fn checked_align(to_be_aligned: usize, alignment: usize) -> Option<usize> {
    to_be_aligned
        .checked_add(alignment - 1)
        .map(|value| value & !(alignment - 1))
}
