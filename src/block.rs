use std::{fmt, mem, ptr::NonNull};

use crate::utils::align;

/// Width of a boundary tag and of a free-list link. Both are full machine words.
pub(crate) const WORD: usize = mem::size_of::<usize>();

/// Every pointer handed out by the allocator is a multiple of this, and so is every
/// block size.
pub const ALIGN: usize = 8;

/// Bytes of every block taken by its header and footer tags.
pub(crate) const OVERHEAD: usize = 2 * WORD;

/// Smallest block the allocator ever creates: header, two free-list links and footer.
pub const MIN_BLOCK_SIZE: usize = align(4 * WORD, ALIGN);

/// Usable bytes of a [`MIN_BLOCK_SIZE`] block.
pub const MIN_PAYLOAD: usize = MIN_BLOCK_SIZE - OVERHEAD;

/// A boundary tag. Packs the size of a block and its allocation bit into one word.
///
/// Block sizes are always multiples of [`ALIGN`], so the low bits of the size are
/// free to carry flags:
///
/// ```text
///  63                                            3   2   1   0
/// +------------------------------------------------+---+---+---+
/// |                  block size                    | 0 | 0 | a |
/// +------------------------------------------------+---+---+---+
/// ```
///
/// The same tag is written at both ends of a block, which is what lets us walk the
/// heap in either direction.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct Tag(usize);

impl Tag {
    const ALLOCATED_BIT: usize = 1 << 0;
    const SIZE_MASK: usize = !(ALIGN - 1);

    /// Zero sized allocated tag that terminates the heap.
    pub const EPILOGUE: Tag = Tag(Self::ALLOCATED_BIT);

    pub fn new(size: usize, allocated: bool) -> Self {
        debug_assert_eq!(size % ALIGN, 0);

        Tag(size | if allocated { Self::ALLOCATED_BIT } else { 0 })
    }

    pub fn size(self) -> usize {
        self.0 & Self::SIZE_MASK
    }

    pub fn is_allocated(self) -> bool {
        self.0 & Self::ALLOCATED_BIT != 0
    }

    pub fn is_free(self) -> bool {
        !self.is_allocated()
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("size", &self.size())
            .field("allocated", &self.is_allocated())
            .finish()
    }
}

/// Handle to a block, represented by its *block pointer*: the address right after
/// the header, which is also what callers receive from the allocator.
///
/// ```text
///             block pointer
///                  |
///                  v
/// +--------+-------------------------------------+--------+
/// | header |              payload                | footer |
/// +--------+-------------------------------------+--------+
/// |<--------------------- size ------------------------->|
/// ```
///
/// While the block is free the first two words of the payload hold the free-list
/// links, see [`crate::list`].
///
/// None of the methods here check that the pointer really is a block. Navigating from
/// something else reads garbage.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct Block {
    ptr: NonNull<u8>,
}

impl Block {
    /// **SAFETY**: `ptr` must be the block pointer of a block (or of the epilogue) in
    /// a region owned by the caller.
    pub unsafe fn from_payload(ptr: NonNull<u8>) -> Self {
        debug_assert_eq!(ptr.as_ptr() as usize % ALIGN, 0);

        Self { ptr }
    }

    #[inline]
    pub fn payload(self) -> NonNull<u8> {
        self.ptr
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.ptr.as_ptr() as usize
    }

    #[inline]
    fn header(self) -> *mut Tag {
        self.ptr.as_ptr().wrapping_sub(WORD).cast()
    }

    pub unsafe fn tag(self) -> Tag {
        unsafe { self.header().read() }
    }

    pub unsafe fn size(self) -> usize {
        unsafe { self.tag().size() }
    }

    /// Bytes the caller may use.
    pub unsafe fn usable_size(self) -> usize {
        unsafe { self.size() - OVERHEAD }
    }

    /// Address of the footer: `header + size - WORD`.
    pub unsafe fn footer(self) -> *mut Tag {
        unsafe { self.ptr.as_ptr().add(self.size() - OVERHEAD).cast() }
    }

    pub unsafe fn footer_tag(self) -> Tag {
        unsafe { self.footer().read() }
    }

    /// Writes matching header and footer tags. The footer position is derived from
    /// the new `size`, not from whatever the header said before.
    pub unsafe fn set_tags(self, size: usize, allocated: bool) {
        let tag = Tag::new(size, allocated);

        unsafe {
            self.header().write(tag);
            self.ptr.as_ptr().add(size - OVERHEAD).cast::<Tag>().write(tag);
        }
    }

    /// Rewrites only the header. Used for the epilogue, which has no footer.
    pub unsafe fn set_header(self, tag: Tag) {
        unsafe { self.header().write(tag) }
    }

    /// The block physically after this one.
    pub unsafe fn next(self) -> Block {
        unsafe { Block::from_payload(NonNull::new_unchecked(self.ptr.as_ptr().add(self.size()))) }
    }

    /// The footer tag of the block physically before this one.
    pub unsafe fn prev_tag(self) -> Tag {
        unsafe { self.ptr.as_ptr().sub(OVERHEAD).cast::<Tag>().read() }
    }

    /// The block physically before this one, found through its footer.
    pub unsafe fn prev(self) -> Block {
        unsafe {
            let size = self.prev_tag().size();
            Block::from_payload(NonNull::new_unchecked(self.ptr.as_ptr().sub(size)))
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({:p})", self.ptr)
    }
}
