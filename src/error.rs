use thiserror::Error;

use crate::config::ConfigError;

/// Why the heap could not be set up or extended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The region provider refused to hand out `requested` more bytes.
    #[error("region provider cannot grow by {requested} bytes")]
    OutOfMemory { requested: usize },
    /// The request cannot be expressed as a block size without overflowing.
    #[error("request of {requested} bytes is too large")]
    TooLarge { requested: usize },
    /// The provider returned a region start that is not aligned to [`crate::ALIGN`].
    #[error("region provider returned misaligned address {addr:#x}")]
    Misaligned { addr: usize },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
