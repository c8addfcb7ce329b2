use std::ptr::NonNull;

use crate::{
    block::Block,
    config::Config,
    error::AllocError,
    freelist::FreeList,
    provider::RegionProvider,
    region::Region,
};

/// A segregated fit heap over a single growable [`Region`].
///
/// ```text
///                                 size class table
///                         +----+----+----+----+----+----+----+----+
///                         | c0 | c1 | c2 | c3 | c4 | c5 | c6 | c7 |
///                         +-|--+----+----+----+----+----+----+-|--+
///            +--------------+                                  |
///            |                         +-----------------------+
///            v                         v
/// +-----+-------+-------+--------+-----------+-------+-----+
/// | pro | alloc | free  | alloc  |   alloc   | free  | epi |  ---> grows
/// +-----+-------+-------+--------+-----------+-------+-----+
/// ```
///
/// Every call goes through `&mut self`: the heap is meant for a single caller. Wrap it
/// in a lock (or keep one heap per thread) to share it.
///
/// Allocation, freeing and resizing are implemented next to the machinery they drive:
/// placement, coalescing and in-place growth.
pub struct Heap<P: RegionProvider> {
    pub(crate) region: Region<P>,
    pub(crate) free_list: FreeList,
    pub(crate) config: Config,
}

impl<P: RegionProvider> Heap<P> {
    /// Same as [`Heap::init`] with [`Config::default`].
    pub fn new(provider: P) -> Result<Self, AllocError> {
        Self::init(provider, Config::default())
    }

    /// Builds the region (sentinels and size class table) on top of `provider` and
    /// seeds it with one chunk of free memory.
    ///
    /// Nothing is handed out before this succeeds, so there is no such thing as an
    /// uninitialized heap.
    pub fn init(provider: P, config: Config) -> Result<Self, AllocError> {
        config.validate()?;

        let region = Region::init(provider)?;
        let free_list = unsafe { FreeList::new(region.table(), config.granularity) };

        let mut heap = Self {
            region,
            free_list,
            config,
        };

        heap.extend(heap.config.chunk_bytes())?;

        Ok(heap)
    }

    /// Grows the region by `bytes` and registers the new space, merged with the last
    /// block if that one was free.
    pub(crate) fn extend(&mut self, bytes: usize) -> Result<Block, AllocError> {
        let block = self.region.grow(bytes)?;

        Ok(unsafe { self.coalesce(block) })
    }

    /// Bytes the caller may use behind `ptr`. Always at least the requested size.
    ///
    /// **SAFETY**: `ptr` must be a live allocation of this heap.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        unsafe {
            let block = Block::from_payload(ptr);
            debug_assert_live(block);

            block.usable_size()
        }
    }

    /// Current size of the region in bytes, sentinels included.
    pub fn region_size(&self) -> usize {
        self.region.len()
    }

    /// Number of free blocks.
    pub fn free_block_count(&self) -> usize {
        self.free_list.len()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn provider(&self) -> &P {
        self.region.provider()
    }
}

/// In debug builds, catches frees and resizes of things that are not live blocks.
/// Release builds trust the caller, as the contract says.
#[inline]
pub(crate) unsafe fn debug_assert_live(block: Block) {
    if cfg!(debug_assertions) {
        let (tag, footer) = unsafe { (block.tag(), block.footer_tag()) };

        debug_assert!(
            tag.is_allocated() && tag == footer,
            "{block:?} is not a live allocation ({tag:?})"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::MIN_BLOCK_SIZE,
        config::ConfigError,
        provider::BufferProvider,
        region::SENTINEL_OVERHEAD,
    };

    #[test]
    fn init_seeds_one_chunk() {
        let mut buffer = vec![0u8; 8192];
        let heap = Heap::new(BufferProvider::new(&mut buffer)).unwrap();

        assert_eq!(heap.region_size(), SENTINEL_OVERHEAD + 4096);
        assert_eq!(heap.free_block_count(), 1);

        let stats = heap.check().unwrap();
        assert_eq!(stats.free_bytes, 4096);
        assert_eq!(stats.allocated_blocks, 0);
    }

    #[test]
    fn init_rejects_bad_config() {
        let mut buffer = vec![0u8; 8192];
        let config = Config::default().with_probe_limit(0);

        let result = Heap::init(BufferProvider::new(&mut buffer), config);

        assert_eq!(
            result.err(),
            Some(AllocError::Config(ConfigError::ZeroProbeLimit))
        );
    }

    #[test]
    fn init_fails_when_first_chunk_does_not_fit() {
        let mut buffer = vec![0u8; 1024];

        let result = Heap::new(BufferProvider::new(&mut buffer));

        assert!(matches!(result, Err(AllocError::OutOfMemory { .. })));
    }

    #[test]
    fn custom_chunk_size() {
        let mut buffer = vec![0u8; 1024];
        let config = Config::default().with_chunk_size(MIN_BLOCK_SIZE * 4);

        let heap = Heap::init(BufferProvider::new(&mut buffer), config).unwrap();

        assert_eq!(heap.region_size(), SENTINEL_OVERHEAD + MIN_BLOCK_SIZE * 4);
        assert_eq!(heap.config().chunk_size, MIN_BLOCK_SIZE * 4);
    }
}
