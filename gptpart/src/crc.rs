// SPDX-License-Identifier: MIT

//! IEEE CRC32 (reflected, polynomial 0xEDB88320), as used by GPT.

/// CRC32 of `bytes`.
#[inline]
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// CRC32 of `bytes` as if `bytes[offset..offset + len]` were zero.
///
/// The input is never modified. A field range that runs past the end of
/// `bytes` is clipped.
pub fn crc_with_field_zeroed(bytes: &[u8], offset: usize, len: usize) -> u32 {
    let start = offset.min(bytes.len());
    let end = offset.saturating_add(len).min(bytes.len());

    const ZEROES: [u8; 16] = [0u8; 16];

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&bytes[..start]);
    let mut remaining = end - start;
    while remaining > 0 {
        let n = remaining.min(ZEROES.len());
        hasher.update(&ZEROES[..n]);
        remaining -= n;
    }
    hasher.update(&bytes[end..]);
    hasher.finalize()
}
