// SPDX-License-Identifier: MIT

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::{BlockIO, BlockIOError, BlockIOResult};

/// `BlockIO` over anything seekable: regular image files or block devices.
#[derive(Debug)]
pub struct FileBlockIO<T: Read + Write + Seek> {
    io: T,
    writable: bool,
}

impl FileBlockIO<File> {
    /// Opens `path` read-write, or read-only when `writable` is false.
    pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> BlockIOResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)?;
        Ok(Self { io: file, writable })
    }

    /// True when the underlying file is a regular file (not a device node).
    pub fn is_regular_file(&self) -> BlockIOResult<bool> {
        Ok(self.io.metadata()?.is_file())
    }
}

impl<T: Read + Write + Seek> FileBlockIO<T> {
    #[inline]
    pub fn new(io: T) -> Self {
        Self { io, writable: true }
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.io
    }
}

impl<T: Read + Write + Seek> BlockIO for FileBlockIO<T> {
    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        if !self.writable {
            return Err(BlockIOError::ReadOnly);
        }
        self.io.seek(SeekFrom::Start(offset))?;
        self.io.write_all(data)?;
        Ok(())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        self.io.seek(SeekFrom::Start(offset))?;
        self.io.read_exact(buf)?;
        Ok(())
    }

    fn flush(&mut self) -> BlockIOResult {
        self.io.flush()?;
        Ok(())
    }

    fn size(&mut self) -> BlockIOResult<u64> {
        let end = self.io.seek(SeekFrom::End(0))?;
        self.io.seek(SeekFrom::Start(0))?;
        Ok(end)
    }
}
