// SPDX-License-Identifier: MIT

use gptio::prelude::*;

use crate::errors::*;
use crate::map::RegionKind;
use crate::ops::alignment_sectors;
use crate::session::{Session, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// Already at the requested size.
    Unchanged,
    /// New size in sectors.
    Resized(u64),
}

/// Grows or shrinks partition `index` into the free space right after it.
///
/// `size` is in sectors (0 = fill the free space), `alignment` in bytes.
pub fn resize<IO: BlockIO>(
    s: &mut Session<IO>,
    index: u32,
    size: u64,
    alignment: u64,
) -> PartResult<ResizeOutcome> {
    if index == 0 {
        return Err(PartError::InvalidArgument("a partition index is required".into()));
    }
    s.gpt_regions()?;
    if s.table(Side::Primary)?.is_free(index - 1)? {
        return Err(PartError::EntryUnused(index));
    }
    let align = alignment_sectors(s, alignment)?;

    let id = s
        .map()
        .find_index(RegionKind::GptPartition, index)
        .ok_or(PartError::NotFound(
            "could not find map entry corresponding to index",
        ))?;
    let (start, current) = s
        .map()
        .get(id)
        .map(|r| (r.start, r.size))
        .ok_or_else(|| PartError::StructuralViolation(format!("no region #{id}")))?;

    if size > 0 && size == current && (align == 0 || size % align == 0) {
        log::warn!("{}: partition does not need resizing", s.name());
        return Ok(ResizeOutcome::Unchanged);
    }

    let new_size = s.map_mut().resize(id, size, align).map_err(|e| match e {
        PartError::InsufficientSpace(_) if align > 0 => PartError::InsufficientSpace(
            "could not resize partition with alignment constraint",
        ),
        PartError::InsufficientSpace(_) => {
            PartError::InsufficientSpace("could not resize partition")
        }
        other => other,
    })?;

    s.update_tables(|t| {
        t.entry_at_mut(index - 1)?.end_lba.set(start + new_size - 1);
        Ok(())
    })?;
    s.status(Some(index), "resized");
    Ok(ResizeOutcome::Resized(new_size))
}
