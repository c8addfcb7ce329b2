use std::{marker::PhantomData, ptr::NonNull};

use crate::block::Block;

/// Nullable pointer to a free [`Block`]. One machine word, `None` is stored as null.
pub(crate) type Link = Option<Block>;

/// Links of a free block. They live in the first two words of the block's payload,
/// which the caller no longer owns once the block is free:
///
/// ```text
/// +--------+--------+--------+----------------------+--------+
/// | header |  prev  |  next  |   (unused payload)   | footer |
/// +--------+--------+--------+----------------------+--------+
///          ^
///          block pointer
/// ```
///
/// The links are navigational only. A block never owns its neighbors in the list.
#[repr(C)]
pub(crate) struct Node {
    /// Previous free block of the same size class.
    pub prev: Link,
    /// Next free block of the same size class.
    pub next: Link,
}

impl Block {
    #[inline]
    fn node(self) -> *mut Node {
        self.payload().as_ptr().cast()
    }

    pub unsafe fn prev_free(self) -> Link {
        unsafe { (*self.node()).prev }
    }

    pub unsafe fn next_free(self) -> Link {
        unsafe { (*self.node()).next }
    }

    unsafe fn set_prev_free(self, prev: Link) {
        unsafe { (*self.node()).prev = prev }
    }

    unsafe fn set_next_free(self, next: Link) {
        unsafe { (*self.node()).next = next }
    }
}

/// Doubly linked list of free blocks sorted by ascending size.
///
/// The list does not own its head either: the head is one word of the size class
/// table embedded in the heap, and `ClassList` is just a typed view over that slot.
/// Because we *are* the allocator, nothing here allocates. Every node is written
/// inside the block it describes.
pub(crate) struct ClassList {
    head: NonNull<Link>,
}

pub(crate) struct Iter<'a> {
    current: Link,
    marker: PhantomData<&'a ClassList>,
}

impl ClassList {
    /// **SAFETY**: `head` must point to a writable, initialized list head whose
    /// entries are all free blocks of a live heap.
    pub unsafe fn from_slot(head: NonNull<Link>) -> Self {
        Self { head }
    }

    #[inline]
    pub fn first(&self) -> Link {
        unsafe { self.head.read() }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.first().is_none()
    }

    /// Links `block` just before the first entry whose size is at least its own, so
    /// that the list stays sorted and the first fit found by a forward scan is also
    /// the tightest one in this list.
    ///
    /// **SAFETY**: `block` must be a free block with valid tags that is not linked
    /// into any list.
    pub unsafe fn insert_sorted(&mut self, block: Block) {
        unsafe {
            let size = block.size();

            let mut prev: Link = None;
            let mut current = self.first();

            while let Some(entry) = current {
                if entry.size() >= size {
                    break;
                }
                prev = Some(entry);
                current = entry.next_free();
            }

            block.node().write(Node { prev, next: current });

            match prev {
                Some(prev) => prev.set_next_free(Some(block)),
                None => self.head.write(Some(block)),
            }

            if let Some(next) = current {
                next.set_prev_free(Some(block));
            }
        }
    }

    /// Splices `block` out using its own links.
    ///
    /// **SAFETY**: `block` must currently be linked into this list.
    pub unsafe fn remove(&mut self, block: Block) {
        unsafe {
            let Node { prev, next } = block.node().read();

            match prev {
                Some(prev) => prev.set_next_free(next),
                None => self.head.write(next),
            }

            if let Some(next) = next {
                next.set_prev_free(prev);
            }
        }
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            current: self.first(),
            marker: PhantomData,
        }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;

        unsafe {
            self.current = block.next_free();
        }

        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{ALIGN, WORD};
    use crate::utils::align;

    #[repr(C, align(8))]
    struct Arena([u8; 1024]);

    /// Lays out consecutive free blocks of the given sizes and returns them.
    unsafe fn carve(arena: &mut Arena, sizes: &[usize]) -> Vec<Block> {
        let mut blocks = Vec::new();
        unsafe {
            let mut ptr = arena.0.as_mut_ptr().add(align(WORD, ALIGN));
            for &size in sizes {
                let block = Block::from_payload(NonNull::new_unchecked(ptr));
                block.set_tags(size, false);
                blocks.push(block);
                ptr = ptr.add(size);
            }
        }
        blocks
    }

    fn sizes(list: &ClassList) -> Vec<usize> {
        list.iter().map(|block| unsafe { block.size() }).collect()
    }

    #[test]
    fn new_list_is_empty() {
        let mut slot: Link = None;
        let list = unsafe { ClassList::from_slot(NonNull::from(&mut slot)) };

        assert!(list.is_empty());
        assert!(list.iter().next().is_none());
    }

    #[test]
    fn insert_keeps_ascending_order() {
        let mut arena = Arena([0; 1024]);
        let mut slot: Link = None;

        unsafe {
            let blocks = carve(&mut arena, &[96, 32, 160, 64, 96]);
            let mut list = ClassList::from_slot(NonNull::from(&mut slot));

            for &block in &blocks {
                list.insert_sorted(block);
            }

            assert_eq!(sizes(&list), vec![32, 64, 96, 96, 160]);

            // Equal sizes: the newcomer goes in front of the existing entry.
            let order: Vec<Block> = list.iter().collect();
            assert_eq!(order[2], blocks[4]);
            assert_eq!(order[3], blocks[0]);

            // Back links mirror forward links.
            for pair in order.windows(2) {
                assert_eq!(pair[1].prev_free(), Some(pair[0]));
            }
            assert_eq!(order[0].prev_free(), None);
        }
    }

    #[test]
    fn remove_head_middle_and_tail() {
        let mut arena = Arena([0; 1024]);
        let mut slot: Link = None;

        unsafe {
            let blocks = carve(&mut arena, &[32, 64, 96, 128]);
            let mut list = ClassList::from_slot(NonNull::from(&mut slot));

            for &block in &blocks {
                list.insert_sorted(block);
            }

            list.remove(blocks[1]);
            assert_eq!(sizes(&list), vec![32, 96, 128]);

            list.remove(blocks[0]);
            assert_eq!(sizes(&list), vec![96, 128]);
            assert_eq!(list.first(), Some(blocks[2]));
            assert_eq!(blocks[2].prev_free(), None);

            list.remove(blocks[3]);
            assert_eq!(sizes(&list), vec![96]);
            assert_eq!(blocks[2].next_free(), None);

            list.remove(blocks[2]);
            assert!(list.is_empty());
        }
    }
}
