// SPDX-License-Identifier: MIT

//! Table operations. Each one works on an open [`Session`] and commits its
//! changes through the dual-write protocol.

pub mod add;
pub mod boot;
pub mod create;
pub mod destroy;
pub mod entries;
pub mod migrate;
pub mod recover;
pub mod resize;
pub mod show;
pub mod verify;

pub use add::{AddRequest, Added, add};
pub use boot::{BootRequest, EfiRequest, install_boot, install_efi};
pub use create::{CreateOptions, create};
pub use destroy::destroy;
pub use entries::{EntryFilter, FlagChange, flag, label, remove, rename};
pub use migrate::{MigrateOptions, migrate};
pub use recover::{RecoverOptions, Recovered, recover};
pub use resize::{ResizeOutcome, resize};
pub use show::{EntryDetails, MapListing, MapRow, ShowColumn, show, show_entry};
pub use verify::{VerifyReport, VerifyScope, verify};

use gptio::prelude::*;

use crate::errors::*;
use crate::gpt::{EntryTable, GPT_ENTRY_SIZE, GPT_PRIMARY_ENTRIES_LBA, GPT_PRIMARY_HEADER_LBA, GptHeader};
use crate::guid;
use crate::map::RegionKind;
use crate::session::{Session, Side};

/// Converts a byte alignment to sectors. Zero stays zero.
pub fn alignment_sectors<IO: BlockIO>(s: &Session<IO>, bytes: u64) -> PartResult<u64> {
    let secsz = s.sector_size();
    if bytes % secsz != 0 {
        return Err(PartError::InvalidArgument(format!(
            "alignment ({bytes}) must be a multiple of the sector size ({secsz})"
        )));
    }
    Ok(bytes / secsz)
}

/// Size of a new pair of entry tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TableLayout {
    pub table_sectors: u64,
    pub entries: u32,
}

/// Sizes the tables of a new GPT holding at most `parts` entries.
///
/// The primary copy goes right after LBA 1, the secondary at the end of the
/// medium; neither may cross the middle of the disk.
pub(crate) fn plan_tables<IO: BlockIO>(s: &Session<IO>, parts: u32) -> PartResult<TableLayout> {
    let secsz = s.sector_size();
    let last = s.last_lba();
    let map = s.map();

    let mut blocks = map.free_run(GPT_PRIMARY_HEADER_LBA, None);
    if blocks == 0 {
        return Err(PartError::InsufficientSpace("no room for the GPT header"));
    }

    let wanted = parts as u64 * GPT_ENTRY_SIZE as u64;
    if (blocks - 1) * secsz > wanted {
        blocks = wanted.div_ceil(secsz) + 1;
    }

    let half = (last + 1) / 2;
    if blocks + 1 > half {
        blocks = half.saturating_sub(1);
    }

    let tail = map.last();
    if !tail.is_unused() {
        return Err(PartError::InsufficientSpace("no room for the backup header"));
    }
    blocks = blocks.min(tail.size);
    if blocks <= 1 {
        return Err(PartError::InsufficientSpace("no room for the GPT table"));
    }

    let table_sectors = blocks - 1;
    let fit = table_sectors * secsz / GPT_ENTRY_SIZE as u64;
    Ok(TableLayout {
        table_sectors,
        entries: fit.min(parts as u64) as u32,
    })
}

/// A zeroed table buffer where every slot carries a fresh unique UUID.
pub(crate) fn fresh_table<IO: BlockIO>(s: &Session<IO>, layout: TableLayout) -> PartResult<Vec<u8>> {
    let len = usize::try_from(layout.table_sectors * s.sector_size())
        .map_err(|_| PartError::InvalidArgument("GPT table too large".into()))?;
    let mut table = vec![0u8; len];
    let mut view = EntryTable::new(&mut table[..], layout.entries, GPT_ENTRY_SIZE as u32)?;
    for slot in 0..layout.entries {
        view.entry_at_mut(slot)?.unique_guid = guid::encode(&guid::generate());
    }
    Ok(table)
}

/// Maps and writes a new GPT around `table`.
///
/// The primary copy is written header first; the secondary, unless
/// `primary_only`, table first.
pub(crate) fn write_new_gpt<IO: BlockIO>(
    s: &mut Session<IO>,
    layout: TableLayout,
    table: Vec<u8>,
    primary_only: bool,
) -> PartResult<()> {
    let last = s.last_lba();
    let secsz = s.sector_size();
    let tbl = layout.table_sectors;
    let secondary_table = last - tbl;

    let header = GptHeader::new(
        GPT_PRIMARY_HEADER_LBA,
        last,
        GPT_PRIMARY_ENTRIES_LBA + tbl,
        last - tbl - 1,
        &guid::generate(),
        GPT_PRIMARY_ENTRIES_LBA,
        layout.entries,
    );

    let map = s.map_mut();
    map.add(
        GPT_PRIMARY_HEADER_LBA,
        1,
        RegionKind::PrimaryGptHeader,
        header.to_sector(secsz),
    )?;
    let copy = if primary_only { Vec::new() } else { table.clone() };
    map.add(GPT_PRIMARY_ENTRIES_LBA, tbl, RegionKind::PrimaryGptTable, table)?;
    s.commit_side(Side::Primary)?;

    if !primary_only {
        let mirror = header.mirrored(last, GPT_PRIMARY_HEADER_LBA, secondary_table);
        let map = s.map_mut();
        map.add(secondary_table, tbl, RegionKind::SecondaryGptTable, copy)?;
        map.add(last, 1, RegionKind::SecondaryGptHeader, mirror.to_sector(secsz))?;
        s.commit_side(Side::Secondary)?;
    }
    Ok(())
}
