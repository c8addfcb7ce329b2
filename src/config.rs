use thiserror::Error;

use crate::block::{ALIGN, MIN_BLOCK_SIZE};
use crate::utils::align;

/// Bytes covered by each size class unless configured otherwise.
pub const DEFAULT_GRANULARITY: usize = 3264;

/// Free blocks inspected per size class before the search moves to the next class.
pub const DEFAULT_PROBE_LIMIT: usize = 8;

/// Minimum amount of bytes requested from the provider when the heap runs dry.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// Tuning knobs of a [`crate::Heap`].
///
/// The defaults are empirically tuned values. There is no derivation behind them, so
/// they are exposed as they are instead of being computed from anything:
///
/// ```
/// use segalloc::Config;
///
/// let config = Config::default().with_probe_limit(16).with_chunk_size(1 << 16);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Byte span of each size class: a block of size `s` goes to class
    /// `min(s / granularity, 7)`.
    pub granularity: usize,
    /// How many entries of one class the fit search looks at. Lower is faster, higher
    /// finds tighter fits.
    pub probe_limit: usize,
    /// Minimum growth step of the region, in bytes.
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("size class granularity must be greater than zero")]
    ZeroGranularity,
    #[error("probe limit must be greater than zero")]
    ZeroProbeLimit,
    #[error("chunk size {0} is smaller than the minimum block size")]
    ChunkTooSmall(usize),
    #[error("chunk size {0} does not fit in the address space")]
    ChunkTooLarge(usize),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            granularity: DEFAULT_GRANULARITY,
            probe_limit: DEFAULT_PROBE_LIMIT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Config {
    pub fn with_granularity(mut self, granularity: usize) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_probe_limit(mut self, probe_limit: usize) -> Self {
        self.probe_limit = probe_limit;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.granularity == 0 {
            return Err(ConfigError::ZeroGranularity);
        }
        if self.probe_limit == 0 {
            return Err(ConfigError::ZeroProbeLimit);
        }
        if self.chunk_size < MIN_BLOCK_SIZE {
            return Err(ConfigError::ChunkTooSmall(self.chunk_size));
        }
        if self.chunk_size > isize::MAX as usize {
            return Err(ConfigError::ChunkTooLarge(self.chunk_size));
        }

        Ok(())
    }

    /// Chunk size rounded to the block alignment.
    pub(crate) fn chunk_bytes(&self) -> usize {
        align(self.chunk_size, ALIGN)
    }
}
