//! Segregated fit heap allocator with boundary tags.
//!
//! A [`Heap`] manages one linear region of memory that only ever grows at the high
//! end. The memory comes from a [`RegionProvider`]: the process address space through
//! [`Kernel`], or any buffer through [`BufferProvider`].
//!
//! Every block carries its size and allocation bit twice, in a header and a footer, so
//! both physical neighbors of a block can be found in constant time:
//!
//! ```text
//! +-----+--------+--------------+--------+--------+------------+--------+-----+
//! | pro | header |   payload    | footer | header |  payload   | footer | epi |
//! +-----+--------+--------------+--------+--------+------------+--------+-----+
//!                ^                                ^
//!                pointer handed out               pointer handed out
//! ```
//!
//! Free blocks are kept in [`CLASSES`] doubly linked lists, grouped by size and sorted
//! inside each group. The list heads live inside the region itself, in the payload of
//! the prologue block. Freed blocks are merged with free neighbors right away.
//!
//! ```no_run
//! use segalloc::{Heap, Kernel};
//!
//! let mut heap = Heap::new(Kernel::new()?)?;
//!
//! let ptr = heap.allocate(100).expect("out of memory");
//! let ptr = unsafe { heap.resize(Some(ptr), 1000) }.expect("out of memory");
//! unsafe { heap.free(ptr) };
//!
//! heap.check()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod block;
mod check;
mod coalesce;
mod config;
mod error;
mod freelist;
mod heap;
#[cfg(any(unix, windows))]
mod kernel;
mod list;
mod placement;
mod provider;
mod region;
mod resize;
mod utils;

pub use block::{ALIGN, MIN_BLOCK_SIZE, MIN_PAYLOAD};
pub use check::{CheckError, HeapStats};
pub use config::{Config, ConfigError, DEFAULT_CHUNK_SIZE, DEFAULT_GRANULARITY, DEFAULT_PROBE_LIMIT};
pub use error::AllocError;
pub use freelist::CLASSES;
pub use heap::Heap;
#[cfg(any(unix, windows))]
pub use kernel::{DEFAULT_MAX_HEAP, Kernel};
pub use provider::{BufferProvider, RegionProvider};
pub use region::SENTINEL_OVERHEAD;
