// SPDX-License-Identifier: MIT

use crate::{BlockIO, BlockIOError, BlockIOResult};

/// In-memory implementation of `BlockIO`.
///
/// Useful for tests and for editing disk images held in RAM.
#[derive(Debug, Clone)]
pub struct MemBlockIO {
    buffer: Vec<u8>,
}

impl MemBlockIO {
    #[inline]
    pub fn new(buffer: Vec<u8>) -> Self {
        Self { buffer }
    }

    /// A zero-filled image of `len` bytes.
    #[inline]
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0u8; len])
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    #[inline]
    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    #[inline]
    fn range(&self, offset: u64, len: usize) -> BlockIOResult<core::ops::Range<usize>> {
        let start = usize::try_from(offset).map_err(|_| BlockIOError::OutOfBounds)?;
        let end = start.checked_add(len).ok_or(BlockIOError::OutOfBounds)?;
        if end > self.buffer.len() {
            return Err(BlockIOError::OutOfBounds);
        }
        Ok(start..end)
    }
}

impl BlockIO for MemBlockIO {
    #[inline(always)]
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        let range = self.range(offset, data.len())?;
        self.buffer[range].copy_from_slice(data);
        Ok(())
    }

    #[inline(always)]
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.buffer[range]);
        Ok(())
    }

    #[inline]
    fn flush(&mut self) -> BlockIOResult {
        Ok(())
    }

    #[inline]
    fn size(&mut self) -> BlockIOResult<u64> {
        Ok(self.buffer.len() as u64)
    }
}
