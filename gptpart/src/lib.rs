// SPDX-License-Identifier: MIT

#[macro_use]
mod macros;

pub mod crc;
pub mod errors;
/// GUID Partition Table header and entry codec.
pub mod gpt;
pub mod guid;
/// Legacy and protective Master Boot Record.
pub mod mbr;
/// BSD disklabel32/disklabel64 readers, used by migrate.
pub mod disklabel;
pub mod map;
pub mod ops;
pub mod session;
/// Well-known partition type GUIDs.
pub mod types;

pub use errors::{PartError, PartResult};
pub use session::{OpenFlags, Session};
