//! Heap consistency checker.
//!
//! Walks every block of the region and every free list and reports the first broken
//! invariant it finds. Meant for tests and debugging, the cost is linear in the
//! number of blocks.

use std::collections::HashSet;

use thiserror::Error;

use crate::{
    block::{ALIGN, Block, MIN_BLOCK_SIZE, Tag},
    freelist::CLASSES,
    heap::Heap,
    provider::RegionProvider,
    region::{PROLOGUE_SIZE, SENTINEL_OVERHEAD},
};

/// Summary of the heap contents, as seen by [`Heap::check`]. Sizes are block sizes,
/// tags included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    pub region_size: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    /// Size of the largest free block, 0 if there is none.
    pub largest_free: usize,
}

/// A broken heap invariant. Addresses are block pointers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("prologue block is damaged")]
    BadPrologue,
    #[error("epilogue at {addr:#x} is damaged or not at the end of the region")]
    BadEpilogue { addr: usize },
    #[error("block at {addr:#x} is not aligned")]
    Misaligned { addr: usize },
    #[error("block at {addr:#x} has different header and footer")]
    TagMismatch { addr: usize },
    #[error("block at {addr:#x} has invalid size {size}")]
    BadSize { addr: usize, size: usize },
    #[error("free block at {addr:#x} follows another free block")]
    UncoalescedNeighbors { addr: usize },
    #[error("block at {addr:#x} runs past the end of the region")]
    OutOfBounds { addr: usize },
    #[error("free list entry at {addr:#x} is not a free block of this heap")]
    NotFree { addr: usize },
    #[error("free block at {addr:#x} is in class {class}, its size belongs in {expected}")]
    WrongClass { addr: usize, class: usize, expected: usize },
    #[error("free list entry at {addr:#x} is smaller than the one before it")]
    Unsorted { addr: usize },
    #[error("free list links around {addr:#x} are inconsistent")]
    BrokenLink { addr: usize },
    #[error("{listed} blocks on the free lists, {walked} free blocks in the region, counter says {counter}")]
    FreeCountMismatch { listed: usize, walked: usize, counter: usize },
    #[error("class {class} is not empty but the lowest class hint is {hint}")]
    StaleHint { hint: usize, class: usize },
    #[error("region is {region} bytes but its blocks add up to {blocks}")]
    Accounting { region: usize, blocks: usize },
}

impl<P: RegionProvider> Heap<P> {
    /// Verifies the layout of the whole heap and returns a summary of it.
    ///
    /// Checked, in order:
    /// - the prologue and the epilogue sentinels,
    /// - every block: alignment, size, matching tags, no two free blocks in a row,
    /// - every free list: entries are free blocks of the right class, sorted by size,
    ///   with consistent back links,
    /// - the free block counter and the lowest class hint,
    /// - that block sizes and sentinels add up to the region size.
    ///
    /// Never writes to the heap.
    pub fn check(&self) -> Result<HeapStats, CheckError> {
        let mut stats = HeapStats {
            region_size: self.region.len(),
            ..HeapStats::default()
        };

        let prologue = self.region.prologue();
        unsafe {
            let tag = prologue.tag();
            if tag != Tag::new(PROLOGUE_SIZE, true) || prologue.footer_tag() != tag {
                return Err(CheckError::BadPrologue);
            }
        }

        let end = self.region.end();
        let mut free = HashSet::new();
        let mut prev_free = false;
        let mut block = self.region.first_block();

        loop {
            let addr = block.addr();

            // A header must fit before the end of the region.
            if addr > end {
                return Err(CheckError::OutOfBounds { addr });
            }
            if addr % ALIGN != 0 {
                return Err(CheckError::Misaligned { addr });
            }

            let tag = unsafe { block.tag() };
            let size = tag.size();

            if size == 0 {
                if addr != end || !tag.is_allocated() {
                    return Err(CheckError::BadEpilogue { addr });
                }
                break;
            }

            if size < MIN_BLOCK_SIZE {
                return Err(CheckError::BadSize { addr, size });
            }
            if size > end - addr {
                return Err(CheckError::OutOfBounds { addr });
            }
            if unsafe { block.footer_tag() } != tag {
                return Err(CheckError::TagMismatch { addr });
            }

            if tag.is_free() {
                if prev_free {
                    return Err(CheckError::UncoalescedNeighbors { addr });
                }
                free.insert(addr);
                stats.free_blocks += 1;
                stats.free_bytes += size;
                stats.largest_free = stats.largest_free.max(size);
            } else {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += size;
            }
            prev_free = tag.is_free();

            block = unsafe { block.next() };
        }

        let blocks = SENTINEL_OVERHEAD + stats.allocated_bytes + stats.free_bytes;
        if blocks != stats.region_size {
            return Err(CheckError::Accounting {
                region: stats.region_size,
                blocks,
            });
        }

        let listed = self.check_free_lists(&free)?;

        if listed != free.len() || listed != self.free_list.len() {
            return Err(CheckError::FreeCountMismatch {
                listed,
                walked: free.len(),
                counter: self.free_list.len(),
            });
        }

        Ok(stats)
    }

    /// Walks the class lists and returns how many entries they hold. Only addresses
    /// found in `free` are ever dereferenced, and no block may be listed twice.
    fn check_free_lists(&self, free: &HashSet<usize>) -> Result<usize, CheckError> {
        let hint = self.free_list.lowest_class();
        let mut seen = HashSet::new();

        for class in 0..CLASSES {
            let list = self.free_list.class(class);

            if class < hint && !list.is_empty() {
                return Err(CheckError::StaleHint { hint, class });
            }

            let mut prev: Option<Block> = None;
            let mut cursor = list.first();

            while let Some(block) = cursor {
                let addr = block.addr();

                if !free.contains(&addr) {
                    return Err(CheckError::NotFree { addr });
                }
                if !seen.insert(addr) {
                    return Err(CheckError::BrokenLink { addr });
                }

                let (size, back, next) = unsafe { (block.size(), block.prev_free(), block.next_free()) };

                let expected = self.free_list.class_of(size);
                if expected != class {
                    return Err(CheckError::WrongClass { addr, class, expected });
                }
                if back != prev {
                    return Err(CheckError::BrokenLink { addr });
                }
                if let Some(prev) = prev {
                    if unsafe { prev.size() } > size {
                        return Err(CheckError::Unsorted { addr });
                    }
                }

                prev = Some(block);
                cursor = next;
            }
        }

        Ok(seen.len())
    }
}
