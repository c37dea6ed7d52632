// SPDX-License-Identifier: MIT

pub mod errors;

// Backend modules
mod file;
mod mem;

pub use file::FileBlockIO;
pub use mem::MemBlockIO;

// Prelude re-exports (central entrypoint)
pub mod prelude {
    pub use super::BlockIO;
    pub use super::BlockIOExt;
    pub use super::BlockIOLbaExt;
    pub use super::BlockIOStructExt;
    pub use super::errors::*;
    pub use super::file::FileBlockIO;
    pub use super::mem::MemBlockIO;
}

use errors::*;

/// Sector size assumed for regular files and when the caller does not force one.
pub const DEFAULT_SECTOR_SIZE: u64 = 512;

/// Size of the scratch buffer used by chunked helpers (zero fill).
pub const BLOCK_BUF_SIZE: usize = 4096;

/// Block IO abstraction trait.
///
/// Allows read/write/flush at absolute byte offsets of a whole device.
/// Implementations target RAM images, regular files and block devices.
pub trait BlockIO {
    /// Writes `data` at `offset` (absolute).
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult;

    /// Reads `buf.len()` bytes into `buf` from `offset` (absolute).
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult;

    /// Flushes any buffered data (may be a no-op).
    fn flush(&mut self) -> BlockIOResult;

    /// Total size of the medium in bytes.
    fn size(&mut self) -> BlockIOResult<u64>;
}

impl<T: BlockIO + ?Sized> BlockIO for &mut T {
    #[inline]
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        (**self).write_at(offset, data)
    }

    #[inline]
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        (**self).read_at(offset, buf)
    }

    #[inline]
    fn flush(&mut self) -> BlockIOResult {
        (**self).flush()
    }

    #[inline]
    fn size(&mut self) -> BlockIOResult<u64> {
        (**self).size()
    }
}

/// Extension helpers for BlockIO.
pub trait BlockIOExt: BlockIO {
    /// Fills `len` bytes at `offset` with zeroes.
    #[inline]
    fn zero_fill(&mut self, offset: u64, len: usize) -> BlockIOResult {
        const ZERO_BUF: [u8; BLOCK_BUF_SIZE] = [0u8; BLOCK_BUF_SIZE];
        let mut remaining = len;
        let mut off = offset;
        while remaining > 0 {
            let chunk = remaining.min(ZERO_BUF.len());
            self.write_at(off, &ZERO_BUF[..chunk])?;
            off += chunk as u64;
            remaining -= chunk;
        }
        Ok(())
    }
}

impl<T: BlockIO + ?Sized> BlockIOExt for T {}

/// Zero-copy struct helpers.
pub trait BlockIOStructExt: BlockIO {
    /// Reads a `T` from `offset` (size = `size_of::<T>()`).
    #[inline]
    fn read_struct<T>(&mut self, offset: u64) -> BlockIOResult<T>
    where
        T: zerocopy::FromBytes + zerocopy::KnownLayout + zerocopy::Immutable,
    {
        let mut buf = vec![0u8; core::mem::size_of::<T>()];
        self.read_at(offset, &mut buf)?;
        T::read_from_bytes(&buf).map_err(|_| BlockIOError::Invalid("read_struct: size mismatch"))
    }

    /// Writes `val` at `offset`.
    #[inline]
    fn write_struct<T>(&mut self, offset: u64, val: &T) -> BlockIOResult
    where
        T: zerocopy::IntoBytes + zerocopy::Immutable,
    {
        self.write_at(offset, val.as_bytes())
    }
}

impl<T: BlockIO + ?Sized> BlockIOStructExt for T {}

/// Offset = LBA * sector_size (with overflow check).
#[inline]
fn lba_offset(lba: u64, sector_size: u64) -> BlockIOResult<u64> {
    lba.checked_mul(sector_size)
        .ok_or(BlockIOError::Invalid("lba_offset overflow"))
}

/// LBA-addressed helpers, to avoid `* sector_size` everywhere.
pub trait BlockIOLbaExt: BlockIO {
    /// Reads `buf.len()` bytes starting at `lba`.
    #[inline]
    fn read_at_lba(&mut self, lba: u64, sector_size: u64, buf: &mut [u8]) -> BlockIOResult {
        let off = lba_offset(lba, sector_size)?;
        self.read_at(off, buf)
    }

    /// Writes `data` starting at `lba`.
    #[inline]
    fn write_at_lba(&mut self, lba: u64, sector_size: u64, data: &[u8]) -> BlockIOResult {
        let off = lba_offset(lba, sector_size)?;
        self.write_at(off, data)
    }

    /// Reads `count` whole sectors starting at `lba` into a fresh buffer.
    fn read_sectors(&mut self, lba: u64, count: u64, sector_size: u64) -> BlockIOResult<Vec<u8>> {
        let len = count
            .checked_mul(sector_size)
            .and_then(|l| usize::try_from(l).ok())
            .ok_or(BlockIOError::Invalid("read_sectors: length overflow"))?;
        let mut buf = vec![0u8; len];
        self.read_at_lba(lba, sector_size, &mut buf)?;
        Ok(buf)
    }

    /// Number of whole sectors on the medium.
    fn sector_count(&mut self, sector_size: u64) -> BlockIOResult<u64> {
        if sector_size == 0 {
            return Err(BlockIOError::Invalid("sector size is zero"));
        }
        Ok(self.size()? / sector_size)
    }
}

impl<T: BlockIO + ?Sized> BlockIOLbaExt for T {}
