//! Finding room for a request and carving it out.

use std::ptr::NonNull;

use crate::{
    block::{ALIGN, Block, MIN_BLOCK_SIZE, MIN_PAYLOAD, OVERHEAD},
    error::AllocError,
    freelist::CLASSES,
    heap::Heap,
    provider::RegionProvider,
    utils::checked_align,
};

/// Block size needed to serve a request of `size` payload bytes: the payload plus
/// both tags, rounded up to [`ALIGN`], and never less than [`MIN_BLOCK_SIZE`].
/// `None` if that does not fit in the address space.
pub(crate) fn adjust_size(size: usize) -> Option<usize> {
    if size <= MIN_PAYLOAD {
        return Some(MIN_BLOCK_SIZE);
    }

    size.checked_add(OVERHEAD)
        .and_then(|size| checked_align(size, ALIGN))
        .filter(|&size| size <= isize::MAX as usize)
}

impl<P: RegionProvider> Heap<P> {
    /// Returns a pointer to at least `size` writable bytes aligned to [`ALIGN`], or
    /// `None` if `size` is zero or the region cannot grow any further.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }

        match self.try_allocate(size) {
            Ok(ptr) => {
                log::trace!("Heap::allocate({size}) -> {ptr:p}");
                Some(ptr)
            }
            Err(err) => {
                log::warn!("Heap::allocate({size}) failed: {err}");
                None
            }
        }
    }

    pub(crate) fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        let adjusted = adjust_size(size).ok_or(AllocError::TooLarge { requested: size })?;

        let block = match self.find_fit(adjusted) {
            Some(block) => block,
            None => {
                // Grow by at least a chunk so that a run of small requests doesn't call
                // into the provider every time.
                let grow = adjusted.max(self.config.chunk_bytes());
                log::debug!("Heap::allocate({size}): no fit for {adjusted} bytes, growing by {grow}");

                self.extend(grow)?
            }
        };

        unsafe { self.place(block, adjusted) };

        Ok(block.payload())
    }

    /// Looks for a free block of at least `adjusted` bytes.
    ///
    /// The search starts at the class `adjusted` maps to (or at the lowest class that
    /// may hold anything, if that is higher) and moves up one class at a time. Inside
    /// a class only the first `probe_limit` entries are looked at. Lists are sorted by
    /// size, so the first hit is the tightest one among those probed. A better fit
    /// deeper in the list may be missed, in exchange the search cost is bounded by
    /// `CLASSES * probe_limit` no matter how many free blocks there are.
    pub(crate) fn find_fit(&mut self, adjusted: usize) -> Option<Block> {
        if self.free_list.is_empty() {
            return None;
        }

        let hint = self.free_list.lowest_class();
        let start = hint.max(self.free_list.class_of(adjusted));

        // While every class since the hint was empty the hint can move past them.
        let mut empty_since_hint = start == hint;

        for class in start..CLASSES {
            let list = self.free_list.class(class);

            if list.is_empty() {
                if empty_since_hint && class + 1 < CLASSES {
                    self.free_list.raise_lowest_class(class + 1);
                }
                continue;
            }
            empty_since_hint = false;

            for block in list.iter().take(self.config.probe_limit) {
                if unsafe { block.size() } >= adjusted {
                    return Some(block);
                }
            }
        }

        None
    }

    /// Marks `adjusted` bytes at the start of the free `block` as allocated. If what is
    /// left can still hold a block, it is split off and goes back to the free lists.
    ///
    /// ```text
    ///  before: |                    free (size)                    |
    ///  after:  |   allocated (adjusted)   |  free (size - adjusted) |
    /// ```
    ///
    /// **SAFETY**: `block` must be a linked free block of at least `adjusted` bytes.
    pub(crate) unsafe fn place(&mut self, block: Block, adjusted: usize) {
        unsafe {
            let size = block.size();
            debug_assert!(size >= adjusted);

            self.free_list.remove(block);

            if size - adjusted >= MIN_BLOCK_SIZE {
                block.set_tags(adjusted, true);

                // The block after the remainder was after `block` before, so it can't
                // be free and there is nothing to coalesce.
                let rest = block.next();
                rest.set_tags(size - adjusted, false);
                self.free_list.insert(rest);
            } else {
                block.set_tags(size, true);
            }
        }
    }
}
