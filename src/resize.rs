//! Growing and shrinking live allocations.

use std::ptr::{self, NonNull};

use crate::{
    block::{Block, OVERHEAD},
    error::AllocError,
    heap::{Heap, debug_assert_live},
    provider::RegionProvider,
};

impl<P: RegionProvider> Heap<P> {
    /// Resizes the allocation at `ptr` to hold at least `size` bytes, keeping its
    /// contents up to the smaller of the old and new sizes.
    ///
    /// - `size == 0` frees `ptr` and returns `None`.
    /// - `ptr == None` is the same as [`Heap::allocate`].
    /// - If the block is already big enough, `ptr` is returned as is. Shrinking never
    ///   gives the excess back.
    /// - Otherwise free physical neighbors are absorbed when that is enough, in this
    ///   order: the previous block, the next block, both. Absorbing the previous block
    ///   moves the contents down to its start.
    /// - As a last resort the contents are copied to a new allocation and `ptr` is
    ///   freed. If that allocation fails, `None` is returned and `ptr` stays valid and
    ///   untouched.
    ///
    /// **SAFETY**: a present `ptr` must be a live allocation of this heap, and the
    /// caller must not use it again unless this returns `None` for a non-zero `size`.
    pub unsafe fn resize(&mut self, ptr: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.allocate(size);
        };

        if size == 0 {
            unsafe { self.free(ptr) };
            return None;
        }

        match unsafe { self.try_resize(ptr, size) } {
            Ok(new) => {
                log::trace!("Heap::resize({ptr:p}, {size}) -> {new:p}");
                Some(new)
            }
            Err(err) => {
                log::warn!("Heap::resize({ptr:p}, {size}) failed, block left in place: {err}");
                None
            }
        }
    }

    unsafe fn try_resize(&mut self, ptr: NonNull<u8>, size: usize) -> Result<NonNull<u8>, AllocError> {
        unsafe {
            let block = Block::from_payload(ptr);
            debug_assert_live(block);

            let old_size = block.size();
            let needed = size
                .checked_add(OVERHEAD)
                .ok_or(AllocError::TooLarge { requested: size })?;

            if old_size >= needed {
                return Ok(ptr);
            }

            let prev_free = block.prev_tag().is_free();
            let next = block.next();
            let next_free = next.tag().is_free();

            let prev_size = if prev_free { block.prev_tag().size() } else { 0 };
            let next_size = if next_free { next.size() } else { 0 };

            if prev_free && prev_size + old_size >= needed {
                let prev = block.prev();
                self.free_list.remove(prev);

                Ok(self.slide_into(prev, block, prev_size + old_size))
            } else if next_free && old_size + next_size >= needed {
                self.free_list.remove(next);
                block.set_tags(old_size + next_size, true);

                log::trace!("Heap::resize({ptr:p}, {size}): absorbed next neighbor in place");
                Ok(ptr)
            } else if prev_free && next_free && prev_size + old_size + next_size >= needed {
                let prev = block.prev();
                self.free_list.remove(prev);
                self.free_list.remove(next);

                Ok(self.slide_into(prev, block, prev_size + old_size + next_size))
            } else {
                self.relocate(block, size)
            }
        }
    }

    /// Turns the unlinked free `prev` plus everything up to the end of the merged span
    /// into one allocated block of `size` bytes starting at `prev`, moving the contents
    /// of `block` down to it.
    ///
    /// ```text
    ///  before: | prev (free) | block (contents) | [next (free)] |
    ///  after:  | contents    |            allocated            |
    /// ```
    unsafe fn slide_into(&mut self, prev: Block, block: Block, size: usize) -> NonNull<u8> {
        unsafe {
            // The ranges overlap whenever the contents are longer than `prev`.
            ptr::copy(
                block.payload().as_ptr(),
                prev.payload().as_ptr(),
                block.usable_size(),
            );
            prev.set_tags(size, true);

            log::trace!("Heap::resize: absorbed previous neighbor, {block:?} moved to {prev:?}");
            prev.payload()
        }
    }

    /// Allocates elsewhere, copies and frees the old block. The old block is only
    /// freed once the new one exists.
    unsafe fn relocate(&mut self, block: Block, size: usize) -> Result<NonNull<u8>, AllocError> {
        unsafe {
            let new = self.try_allocate(size)?;

            let len = block.usable_size().min(size);
            ptr::copy_nonoverlapping(block.payload().as_ptr(), new.as_ptr(), len);

            log::debug!("Heap::resize: moved {len} bytes from {block:?} to {new:p}");

            self.free(block.payload());

            Ok(new)
        }
    }
}
