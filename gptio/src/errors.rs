// SPDX-License-Identifier: MIT

use thiserror::Error;

/// Result type for BlockIO operations.
pub type BlockIOResult<T = ()> = core::result::Result<T, BlockIOError>;

/// Error type for BlockIO operations.
#[derive(Debug, Error)]
pub enum BlockIOError {
    /// Underlying device I/O error.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Attempted to read or write past the end of the medium.
    #[error("Out of bounds")]
    OutOfBounds,

    /// A write was attempted on a medium opened read-only.
    #[error("Device is opened read-only")]
    ReadOnly,

    #[error("Unsupported operation")]
    Unsupported,

    #[error("{0}")]
    Invalid(&'static str),
}
