use std::{marker::PhantomData, ptr::NonNull};

use crate::{block::ALIGN, error::AllocError, utils::align};

/// Source of the linear memory a [`crate::Heap`] manages.
///
/// The heap never gives memory back and never asks for it to move. It only asks for
/// more at the high end, like `sbrk` would:
///
/// ```text
///  first grow_by          second grow_by        third grow_by
/// +--------------------+----------------------+-----------------+
/// |                    |                      |                 |  ---> grows this way
/// +--------------------+----------------------+-----------------+
/// ^                    ^                      ^
/// start #1             start #2               start #3
/// ```
///
/// Implementations must uphold:
/// - every returned span is readable and writable for `len` bytes;
/// - spans are contiguous: each call returns the end of the previous span;
/// - the first span starts on an [`ALIGN`] boundary.
pub trait RegionProvider {
    /// Extends the region by `len` bytes and returns the start of the new bytes.
    /// Fails with [`AllocError::OutOfMemory`] if the region cannot grow.
    fn grow_by(&mut self, len: usize) -> Result<NonNull<u8>, AllocError>;
}

impl<P: RegionProvider + ?Sized> RegionProvider for &mut P {
    fn grow_by(&mut self, len: usize) -> Result<NonNull<u8>, AllocError> {
        (**self).grow_by(len)
    }
}

impl<P: RegionProvider + ?Sized> RegionProvider for Box<P> {
    fn grow_by(&mut self, len: usize) -> Result<NonNull<u8>, AllocError> {
        (**self).grow_by(len)
    }
}

/// Provider that hands out a caller supplied buffer, front to back.
///
/// Useful when the memory is already there (a static array, an arena obtained from
/// somewhere else) and for tests that want to run out of memory deterministically.
/// Leading bytes are skipped if the buffer does not start on an [`ALIGN`] boundary.
pub struct BufferProvider<'a> {
    start: NonNull<u8>,
    capacity: usize,
    brk: usize,
    marker: PhantomData<&'a mut [u8]>,
}

impl<'a> BufferProvider<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        let addr = buffer.as_mut_ptr() as usize;
        let skip = (align(addr, ALIGN) - addr).min(buffer.len());

        unsafe {
            Self {
                start: NonNull::new_unchecked(buffer.as_mut_ptr().add(skip)),
                capacity: buffer.len() - skip,
                brk: 0,
                marker: PhantomData,
            }
        }
    }

    /// Total bytes this provider can hand out.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> usize {
        self.brk
    }
}

impl RegionProvider for BufferProvider<'_> {
    fn grow_by(&mut self, len: usize) -> Result<NonNull<u8>, AllocError> {
        if len > self.capacity - self.brk {
            return Err(AllocError::OutOfMemory { requested: len });
        }

        let start = unsafe { self.start.add(self.brk) };
        self.brk += len;

        Ok(start)
    }
}
