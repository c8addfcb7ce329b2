use std::ptr::NonNull;

use crate::{
    block::{ALIGN, Block, MIN_BLOCK_SIZE, Tag, WORD},
    error::AllocError,
    freelist::CLASSES,
    list::Link,
    provider::RegionProvider,
    utils::{align, checked_align},
};

/// Padding in front of the prologue so that every block pointer (the address right
/// after a header) lands on an [`ALIGN`] boundary. Zero on 64 bit targets.
pub(crate) const PAD: usize = (ALIGN - WORD % ALIGN) % ALIGN;

/// Size of the prologue block: header, the size class table and footer.
pub(crate) const PROLOGUE_SIZE: usize = align(2 * WORD + CLASSES * WORD, ALIGN);

/// Bytes of the region that never belong to a regular block: padding, prologue and
/// epilogue header. This is the whole region right after [`Region::init`].
pub const SENTINEL_OVERHEAD: usize = PAD + PROLOGUE_SIZE + WORD;

/// The linear span of memory managed by the heap.
///
/// Right after initialization it only holds the sentinels, with the size class
/// table tucked inside the prologue:
///
/// ```text
/// +-----+----------+------------------------+----------+----------+
/// | pad | prologue |    size class table    | prologue | epilogue |
/// |     |  header  |   (CLASSES link words) |  footer  |  header  |
/// +-----+----------+------------------------+----------+----------+
///                  ^                                              ^
///                  prologue block pointer                         end
/// ```
///
/// The prologue is an allocated block and the epilogue a zero sized allocated header,
/// so coalescing never looks past either end and block walks stop at a size of 0.
///
/// Growing writes a free block over the old epilogue and a new epilogue at the new
/// end:
///
/// ```text
///  before:  ... | last block | epi |
///  after:   ... | last block | new free block (hdr at old epi) ... | epi |
/// ```
pub(crate) struct Region<P> {
    provider: P,
    start: NonNull<u8>,
    len: usize,
}

impl<P: RegionProvider> Region<P> {
    /// Requests room for the sentinels and lays them down.
    pub fn init(mut provider: P) -> Result<Self, AllocError> {
        let start = provider.grow_by(SENTINEL_OVERHEAD)?;

        let addr = start.as_ptr() as usize;
        if addr % ALIGN != 0 {
            return Err(AllocError::Misaligned { addr });
        }

        unsafe {
            let prologue = Block::from_payload(start.add(PAD + WORD));
            prologue.set_tags(PROLOGUE_SIZE, true);
            prologue.next().set_header(Tag::EPILOGUE);
        }

        log::debug!("Region::init: sentinels at {start:p}, {SENTINEL_OVERHEAD} bytes");

        Ok(Self {
            provider,
            start,
            len: SENTINEL_OVERHEAD,
        })
    }

    /// Extends the region by `bytes` (rounded up to [`ALIGN`]) and returns the new
    /// space as a single free block. The block is *not* coalesced nor linked into any
    /// free list, that is up to the caller.
    pub fn grow(&mut self, bytes: usize) -> Result<Block, AllocError> {
        let size = checked_align(bytes, ALIGN)
            .filter(|&size| size <= isize::MAX as usize)
            .ok_or(AllocError::TooLarge { requested: bytes })?;

        debug_assert!(size >= MIN_BLOCK_SIZE);

        let start = self.provider.grow_by(size)?;
        debug_assert_eq!(start.as_ptr() as usize, self.end());

        self.len += size;

        log::debug!("Region::grow({bytes:#x}): {size:#x} bytes at {start:p}, region is now {:#x} bytes", self.len);

        unsafe {
            // The header of the new block overwrites the old epilogue.
            let block = Block::from_payload(start);
            block.set_tags(size, false);
            block.next().set_header(Tag::EPILOGUE);

            Ok(block)
        }
    }

    pub fn prologue(&self) -> Block {
        unsafe { Block::from_payload(self.start.add(PAD + WORD)) }
    }

    /// The size class table, stored in the prologue payload.
    pub fn table(&self) -> NonNull<Link> {
        self.prologue().payload().cast()
    }

    /// First block after the prologue. It is the epilogue if the region never grew.
    pub fn first_block(&self) -> Block {
        unsafe { self.prologue().next() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Address one past the last byte of the region.
    #[inline]
    pub fn end(&self) -> usize {
        self.start.as_ptr() as usize + self.len
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::BufferProvider;

    #[test]
    fn layout_constants() {
        assert_eq!(SENTINEL_OVERHEAD % ALIGN, 0);
        assert_eq!((PAD + WORD) % ALIGN, 0);
        assert!(PROLOGUE_SIZE >= 2 * WORD + CLASSES * WORD);
    }

    #[test]
    fn init_lays_down_sentinels() {
        let mut buffer = vec![0u8; 1024];
        let region = Region::init(BufferProvider::new(&mut buffer)).unwrap();

        assert_eq!(region.len(), SENTINEL_OVERHEAD);
        assert_eq!(region.provider().used(), SENTINEL_OVERHEAD);

        unsafe {
            let prologue = region.prologue();
            assert_eq!(prologue.tag(), Tag::new(PROLOGUE_SIZE, true));
            assert_eq!(prologue.footer_tag(), prologue.tag());
            assert_eq!(region.first_block().tag(), Tag::EPILOGUE);
            assert_eq!(region.first_block().addr(), region.end());
        }
        assert_eq!(region.table().as_ptr() as usize, region.prologue().addr());
    }

    #[test]
    fn grow_replaces_epilogue_with_free_block() {
        let mut buffer = vec![0u8; 1024];
        let mut region = Region::init(BufferProvider::new(&mut buffer)).unwrap();
        let old_end = region.end();

        let block = region.grow(100).unwrap();

        assert_eq!(block.addr(), old_end);
        assert_eq!(region.len(), SENTINEL_OVERHEAD + 104);

        unsafe {
            assert_eq!(block.tag(), Tag::new(104, false));
            assert_eq!(block.footer_tag(), block.tag());
            assert_eq!(block.prev(), region.prologue());
            assert_eq!(block.next().tag(), Tag::EPILOGUE);
            assert_eq!(block.next().addr(), region.end());
        }
    }

    #[test]
    fn failed_growth_leaves_region_untouched() {
        let mut buffer = vec![0u8; 256];
        let mut region = Region::init(BufferProvider::new(&mut buffer)).unwrap();

        assert!(matches!(region.grow(4096), Err(AllocError::OutOfMemory { .. })));
        assert!(matches!(region.grow(usize::MAX), Err(AllocError::TooLarge { .. })));

        assert_eq!(region.len(), SENTINEL_OVERHEAD);
        assert_eq!(unsafe { region.first_block().tag() }, Tag::EPILOGUE);
    }

    #[test]
    fn init_fails_without_memory() {
        let mut buffer = vec![0u8; SENTINEL_OVERHEAD - 1];
        let result = Region::init(BufferProvider::new(&mut buffer));

        assert!(matches!(result, Err(AllocError::OutOfMemory { .. })));
    }

    struct Skewed<'a>(BufferProvider<'a>);

    impl RegionProvider for Skewed<'_> {
        fn grow_by(&mut self, len: usize) -> Result<NonNull<u8>, AllocError> {
            self.0.grow_by(len + 4).map(|start| unsafe { start.add(4) })
        }
    }

    #[test]
    fn init_rejects_misaligned_provider() {
        let mut buffer = vec![0u8; 256];
        let result = Region::init(Skewed(BufferProvider::new(&mut buffer)));

        assert!(matches!(result, Err(AllocError::Misaligned { .. })));
    }
}
