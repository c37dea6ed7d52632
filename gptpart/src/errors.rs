// SPDX-License-Identifier: MIT

use gptio::errors::BlockIOError;
use thiserror::Error;

/// Unified error type for the GPT engine.
#[derive(Debug, Error)]
pub enum PartError {
    /// The region map invariant would break; nothing was written.
    #[error("structural violation: {0}")]
    StructuralViolation(String),

    /// A required GPT/MBR structure is missing.
    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    AlreadyExists(&'static str),

    #[error("entry at index {0} is not free")]
    SlotInUse(u32),

    #[error("no available table entries")]
    TableFull,

    #[error("index {index} out of range ({max} max)")]
    IndexOutOfRange { index: u32, max: u32 },

    #[error("entry at index {0} is unused")]
    EntryUnused(u32),

    #[error("{0}")]
    InsufficientSpace(&'static str),

    #[error("bad CRC in {0}")]
    CrcMismatch(&'static str),

    #[error("invalid GPT signature")]
    InvalidSignature,

    #[error("GPT header too small or larger than its sector")]
    TooSmall,

    #[error("unknown partition type 0x{0:02x}")]
    UnknownLegacyType(u8),

    #[error("no BSD disklabel found")]
    NotADisklabel,

    #[error("{0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] BlockIOError),
}

pub type PartResult<T = ()> = Result<T, PartError>;
