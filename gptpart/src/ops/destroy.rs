// SPDX-License-Identifier: MIT

use gptio::prelude::*;

use crate::errors::*;
use crate::map::{RegionId, RegionKind};
use crate::session::Session;

/// Wipes the primary header and, unless `recoverable`, the secondary one.
///
/// Tables and partitions are left in place, so `recover` can rebuild the
/// primary from a kept secondary.
pub fn destroy<IO: BlockIO>(s: &mut Session<IO>, recoverable: bool) -> PartResult<()> {
    let primary = s.map().find(RegionKind::PrimaryGptHeader);
    let secondary = s.map().find(RegionKind::SecondaryGptHeader);
    if primary.is_none() && secondary.is_none() {
        return Err(PartError::NotFound("device doesn't contain a GPT"));
    }
    if recoverable && secondary.is_none() {
        return Err(PartError::NotFound("recoverability not possible"));
    }

    if !recoverable {
        if let Some(id) = secondary {
            wipe(s, id)?;
        }
    }
    // ids shift on release, look the primary up again
    if let Some(id) = s.map().find(RegionKind::PrimaryGptHeader) {
        wipe(s, id)?;
    }

    s.status(None, "destroyed gpt label");
    Ok(())
}

fn wipe<IO: BlockIO>(s: &mut Session<IO>, id: RegionId) -> PartResult<()> {
    let start = s.map().get(id).map(|r| r.start).unwrap_or_default();
    s.zero_sectors(start, 1)?;
    s.map_mut().release(id)?;
    Ok(())
}
