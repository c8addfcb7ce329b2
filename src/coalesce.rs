//! Returning blocks to the heap.

use std::ptr::NonNull;

use crate::{
    block::Block,
    heap::{Heap, debug_assert_live},
    provider::RegionProvider,
};

impl<P: RegionProvider> Heap<P> {
    /// Gives the allocation at `ptr` back to the heap.
    ///
    /// **SAFETY**: `ptr` must have been returned by [`Heap::allocate`] or
    /// [`Heap::resize`] on this heap and not been freed or resized since. Anything
    /// else is undefined behavior; debug builds assert on the obvious cases.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        unsafe {
            let block = Block::from_payload(ptr);
            debug_assert_live(block);

            block.set_tags(block.size(), false);
            let merged = self.coalesce(block);

            log::trace!("Heap::free({ptr:p}): {merged:?} is now free ({} bytes)", merged.size());
        }
    }

    /// Merges the free, unlinked `block` with whichever physical neighbors are free and
    /// links the result into the free lists. Returns the merged block.
    ///
    /// ```text
    ///  prev free, next free:   | prev | block | next |  ->  |        prev        |
    ///  next free:              | a    | block | next |  ->  | a    |    block    |
    ///  prev free:              | prev | block | a    |  ->  |    prev    | a    |
    ///  neither:                | a    | block | a    |  ->  unchanged
    /// ```
    ///
    /// The prologue and epilogue are allocated, so neither end of the region needs a
    /// special case.
    ///
    /// **SAFETY**: `block` must be a free block of this heap that is not linked yet.
    pub(crate) unsafe fn coalesce(&mut self, block: Block) -> Block {
        unsafe {
            let prev_free = block.prev_tag().is_free();
            let next = block.next();
            let next_free = next.tag().is_free();

            let mut size = block.size();

            let merged = match (prev_free, next_free) {
                (true, true) => {
                    let prev = block.prev();
                    self.free_list.remove(prev);
                    self.free_list.remove(next);

                    size += prev.size() + next.size();
                    prev.set_tags(size, false);
                    prev
                }
                (false, true) => {
                    self.free_list.remove(next);

                    size += next.size();
                    block.set_tags(size, false);
                    block
                }
                (true, false) => {
                    let prev = block.prev();
                    self.free_list.remove(prev);

                    size += prev.size();
                    prev.set_tags(size, false);
                    prev
                }
                (false, false) => block,
            };

            self.free_list.insert(merged);

            merged
        }
    }
}
