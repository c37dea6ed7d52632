// SPDX-License-Identifier: MIT

use gptio::prelude::*;
use log::warn;

use crate::errors::*;
use crate::gpt::GPT_DEFAULT_NUM_ENTRIES;
use crate::map::RegionKind;
use crate::mbr::Mbr;
use crate::ops::{fresh_table, plan_tables, write_new_gpt};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOptions {
    /// Discard an existing legacy MBR.
    pub force: bool,
    /// Do not write the secondary copy.
    pub primary_only: bool,
    /// Upper bound on the number of table entries.
    pub entries: u32,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            force: false,
            primary_only: false,
            entries: GPT_DEFAULT_NUM_ENTRIES,
        }
    }
}

/// Writes a protective MBR (if missing) and a new, empty GPT.
pub fn create<IO: BlockIO>(s: &mut Session<IO>, opts: &CreateOptions) -> PartResult<()> {
    let map = s.map();
    if map.find(RegionKind::PrimaryGptHeader).is_some()
        || map.find(RegionKind::SecondaryGptHeader).is_some()
    {
        return Err(PartError::AlreadyExists("device already contains a GPT"));
    }

    if let Some(id) = map.find(RegionKind::LegacyMbr).filter(|&id| id == 0) {
        if !opts.force {
            return Err(PartError::AlreadyExists("device contains a MBR"));
        }
        warn!("{}: discarding the MBR", s.name());
        s.map_mut().release(id)?;
    }

    write_pmbr_if_missing(s)?;

    let layout = plan_tables(s, opts.entries)?;
    let table = fresh_table(s, layout)?;
    write_new_gpt(s, layout, table, opts.primary_only)?;

    s.status(None, "created gpt label");
    Ok(())
}

/// Writes a fresh protective MBR at LBA 0 unless one is already mapped.
pub(crate) fn write_pmbr_if_missing<IO: BlockIO>(s: &mut Session<IO>) -> PartResult<bool> {
    if s.map().find(RegionKind::ProtectiveMbr).is_some() {
        return Ok(false);
    }
    if s.map().free_run(0, Some(1)) == 0 {
        return Err(PartError::InsufficientSpace("no room for the PMBR"));
    }
    let sector = Mbr::new_protective(s.last_lba()).to_sector(s.sector_size());
    let id = s.map_mut().add(0, 1, RegionKind::ProtectiveMbr, sector)?;
    s.write_region(id)?;
    Ok(true)
}
