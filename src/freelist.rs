use std::ptr::NonNull;

use crate::{
    block::Block,
    list::{ClassList, Link},
};

/// Number of size classes. The last class collects every block too big for the others.
pub const CLASSES: usize = 8;

/// Segregated free lists.
///
/// Free blocks are grouped by size into [`CLASSES`] buckets, each one a [`ClassList`]
/// sorted by ascending size. The heads of those lists live in the *size class table*,
/// which is stored inside the heap itself, in the payload of the prologue block:
///
/// ```text
///  prologue block                                                   free blocks
/// +-----+----+----+----+----+----+----+----+----+-----+
/// | hdr | c0 | c1 | c2 | c3 | c4 | c5 | c6 | c7 | ftr |
/// +-----+-|--+----+-|--+----+----+----+----+----+-----+
///         |         |
///         |         +--> [ 7000 ] <-> [ 9100 ]
///         +------------> [  32  ] <-> [  48  ] <-> [ 3000 ]
/// ```
///
/// The class of a block of size `s` is `min(s / granularity, CLASSES - 1)`.
///
/// Besides the table we keep two counters:
/// - `lowest_class`: no free block lives in a class below this one. It is lowered on
///   every insert and only raised lazily by the fit search, so it may be stale on the
///   low side, never on the high side.
/// - `len`: exact number of free blocks, so a search on an exhausted heap returns
///   straight away.
pub(crate) struct FreeList {
    table: NonNull<Link>,
    granularity: usize,
    lowest_class: usize,
    len: usize,
}

impl FreeList {
    /// Takes over `table` and empties every class.
    ///
    /// **SAFETY**: `table` must point to [`CLASSES`] writable, word aligned slots that
    /// outlive the returned value.
    pub unsafe fn new(table: NonNull<Link>, granularity: usize) -> Self {
        debug_assert!(granularity > 0);

        for class in 0..CLASSES {
            unsafe { table.add(class).write(None) };
        }

        Self {
            table,
            granularity,
            lowest_class: CLASSES - 1,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn lowest_class(&self) -> usize {
        self.lowest_class
    }

    /// Size class a block of `size` bytes belongs to.
    #[inline]
    pub fn class_of(&self, size: usize) -> usize {
        (size / self.granularity).min(CLASSES - 1)
    }

    /// The list heading `class`.
    pub fn class(&self, class: usize) -> ClassList {
        debug_assert!(class < CLASSES);

        unsafe { ClassList::from_slot(self.table.add(class)) }
    }

    /// Registers a free block.
    ///
    /// **SAFETY**: `block` must be a free block of this heap, with final tags, that is
    /// not linked anywhere yet.
    pub unsafe fn insert(&mut self, block: Block) {
        let class = self.class_of(unsafe { block.size() });

        unsafe { self.class(class).insert_sorted(block) };

        if class < self.lowest_class {
            self.lowest_class = class;
        }
        self.len += 1;
    }

    /// Unregisters a free block. Its tags must still describe the size it was inserted
    /// with, otherwise we would look for it in the wrong class.
    ///
    /// **SAFETY**: `block` must be linked into this free list.
    pub unsafe fn remove(&mut self, block: Block) {
        let class = self.class_of(unsafe { block.size() });

        unsafe { self.class(class).remove(block) };

        self.len -= 1;
    }

    /// Moves the hint up to `class` after a search found every class below it empty.
    pub fn raise_lowest_class(&mut self, class: usize) {
        debug_assert!(class < CLASSES);

        if class > self.lowest_class {
            self.lowest_class = class;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{ALIGN, WORD};
    use crate::utils::align;

    #[repr(C, align(8))]
    struct Arena([u8; 4096]);

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

    #[test]
    fn class_index_is_clamped() {
        let mut table: [Link; CLASSES] = [None; CLASSES];
        let free_list = unsafe { FreeList::new(NonNull::from(&mut table).cast(), 100) };

        assert_eq!(free_list.class_of(32), 0);
        assert_eq!(free_list.class_of(99), 0);
        assert_eq!(free_list.class_of(100), 1);
        assert_eq!(free_list.class_of(799), 7);
        assert_eq!(free_list.class_of(usize::MAX & !7), 7);
    }

    #[test]
    fn insert_and_remove_track_counters() {
        let mut arena = Arena([0; 4096]);
        let mut table: [Link; CLASSES] = [None; CLASSES];

        unsafe {
            let blocks = carve(&mut arena, &[640, 48, 264, 1024]);
            let mut free_list = FreeList::new(NonNull::from(&mut table).cast(), 128);

            assert!(free_list.is_empty());
            assert_eq!(free_list.lowest_class(), CLASSES - 1);

            free_list.insert(blocks[0]);
            assert_eq!(free_list.lowest_class(), 5);

            free_list.insert(blocks[1]);
            assert_eq!(free_list.lowest_class(), 0);

            free_list.insert(blocks[2]);
            free_list.insert(blocks[3]);
            assert_eq!(free_list.len(), 4);

            assert_eq!(free_list.class(0).first(), Some(blocks[1]));
            assert_eq!(free_list.class(2).first(), Some(blocks[2]));
            assert_eq!(free_list.class(7).first(), Some(blocks[3]));

            // Removing never raises the hint by itself.
            free_list.remove(blocks[1]);
            assert_eq!(free_list.lowest_class(), 0);
            assert!(free_list.class(0).is_empty());
            assert_eq!(free_list.len(), 3);

            free_list.raise_lowest_class(2);
            assert_eq!(free_list.lowest_class(), 2);
            free_list.raise_lowest_class(1);
            assert_eq!(free_list.lowest_class(), 2);
        }
    }
}
