// SPDX-License-Identifier: MIT

use gptio::prelude::*;
use log::warn;

use crate::errors::*;
use crate::gpt::{self, GPT_PRIMARY_ENTRIES_LBA, GPT_PRIMARY_HEADER_LBA, GptHeader};
use crate::map::{RegionId, RegionKind};
use crate::ops::create::write_pmbr_if_missing;
use crate::session::{Session, Side};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverOptions {
    /// Proceed over a legacy MBR (or, with `rewrite_pmbr`, an existing PMBR).
    pub force: bool,
    /// Only write a fresh protective MBR.
    pub rewrite_pmbr: bool,
}

/// What a recover run rewrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovered {
    pub primary_table: bool,
    pub secondary_table: bool,
    pub primary_header: bool,
    pub secondary_header: bool,
    /// Both copies were present but the secondary differed.
    pub resynced: bool,
    pub pmbr: bool,
}

impl Recovered {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Rebuilds a missing GPT copy from the one that survived.
pub fn recover<IO: BlockIO>(s: &mut Session<IO>, opts: &RecoverOptions) -> PartResult<Recovered> {
    if opts.rewrite_pmbr {
        return rewrite_pmbr(s, opts.force);
    }
    if s.map().first().kind == RegionKind::LegacyMbr && !opts.force {
        return Err(PartError::AlreadyExists("device contains a MBR"));
    }

    let map = s.map();
    let has = |kind| map.find(kind).is_some();
    let (gpt, tpg) = (has(RegionKind::PrimaryGptHeader), has(RegionKind::SecondaryGptHeader));
    let (tbl, lbt) = (has(RegionKind::PrimaryGptTable), has(RegionKind::SecondaryGptTable));
    if !gpt && !tpg {
        return Err(PartError::NotFound(
            "no primary or secondary GPT headers, can't recover",
        ));
    }
    if !tbl && !lbt {
        return Err(PartError::NotFound(
            "no primary or secondary GPT tables, can't recover",
        ));
    }

    let last = s.last_lba();
    let mut done = Recovered::default();

    if tbl && !lbt {
        let (size, data) = copy_of(s, RegionKind::PrimaryGptTable)?;
        let at = last
            .checked_sub(size)
            .ok_or(PartError::InsufficientSpace("GPT table larger than the medium"))?;
        let id = s.map_mut().add(at, size, RegionKind::SecondaryGptTable, data)?;
        s.write_region(id)?;
        s.status(None, "recovered secondary GPT table from primary");
        done.secondary_table = true;
    } else if !tbl && lbt {
        let (size, data) = copy_of(s, RegionKind::SecondaryGptTable)?;
        let id = s
            .map_mut()
            .add(GPT_PRIMARY_ENTRIES_LBA, size, RegionKind::PrimaryGptTable, data)?;
        s.write_region(id)?;
        s.status(None, "recovered primary GPT table from secondary");
        done.primary_table = true;
    }

    if gpt && !tpg {
        let table_lba = start_of(s, RegionKind::SecondaryGptTable)?;
        let header = relocated(s, Side::Primary, last, GPT_PRIMARY_HEADER_LBA, table_lba)?;
        let id = s.map_mut().add(last, 1, RegionKind::SecondaryGptHeader, header)?;
        s.write_region(id)?;
        s.status(None, "recovered secondary GPT header from primary");
        done.secondary_header = true;
    } else if !gpt && tpg {
        let table_lba = start_of(s, RegionKind::PrimaryGptTable)?;
        let alt = start_of(s, RegionKind::SecondaryGptHeader)?;
        let header = relocated(s, Side::Secondary, GPT_PRIMARY_HEADER_LBA, alt, table_lba)?;
        let id = s
            .map_mut()
            .add(GPT_PRIMARY_HEADER_LBA, 1, RegionKind::PrimaryGptHeader, header)?;
        s.write_region(id)?;
        s.status(None, "recovered primary GPT header from secondary");
        done.primary_header = true;
    }

    if gpt && tpg && tbl && lbt && !copies_agree(s)? {
        resync_secondary(s)?;
        s.status(None, "rewrote secondary GPT from primary");
        done.resynced = true;
    }
    Ok(done)
}

fn region_of<IO: BlockIO>(s: &Session<IO>, kind: RegionKind) -> PartResult<RegionId> {
    s.map()
        .find(kind)
        .ok_or(PartError::NotFound("GPT structure disappeared during recover"))
}

fn start_of<IO: BlockIO>(s: &Session<IO>, kind: RegionKind) -> PartResult<u64> {
    let id = region_of(s, kind)?;
    Ok(s.map().get(id).map(|r| r.start).unwrap_or_default())
}

fn copy_of<IO: BlockIO>(s: &Session<IO>, kind: RegionKind) -> PartResult<(u64, Vec<u8>)> {
    let id = region_of(s, kind)?;
    let r = s
        .map()
        .get(id)
        .ok_or_else(|| PartError::StructuralViolation(format!("no region #{id}")))?;
    Ok((r.size, r.data().to_vec()))
}

/// The header sector of `from`, moved to `current` and re-checksummed.
/// The source copy must still match its own checksums.
fn relocated<IO: BlockIO>(
    s: &Session<IO>,
    from: Side,
    current: u64,
    backup: u64,
    table_lba: u64,
) -> PartResult<Vec<u8>> {
    let (hdr, tbl) = s.side_regions(from)?;
    let (_, mut header) = copy_of_id(s, hdr)?;
    let (_, table) = copy_of_id(s, tbl)?;
    gpt::verify(&header, &table)?.require()?;
    gpt::relocate_header(&mut header, current, backup, table_lba)?;
    gpt::recompute_crcs(&mut header, &table)?;
    Ok(header)
}

fn copy_of_id<IO: BlockIO>(s: &Session<IO>, id: RegionId) -> PartResult<(u64, Vec<u8>)> {
    let r = s
        .map()
        .get(id)
        .ok_or_else(|| PartError::StructuralViolation(format!("no region #{id}")))?;
    Ok((r.start, r.data().to_vec()))
}

/// Location-independent fields of a header.
fn shared_fields(h: &GptHeader) -> GptHeader {
    let mut h = *h;
    h.header_crc.set(0);
    h.current_lba.set(0);
    h.backup_lba.set(0);
    h.entries_lba.set(0);
    h
}

fn copies_agree<IO: BlockIO>(s: &Session<IO>) -> PartResult<bool> {
    let ids = s.gpt_regions()?;
    let primary = s.header_at(ids.primary_header)?;
    let secondary = s.header_at(ids.secondary_header)?;
    let (_, pt) = copy_of_id(s, ids.primary_table)?;
    let (_, st) = copy_of_id(s, ids.secondary_table)?;
    Ok(shared_fields(&primary) == shared_fields(&secondary)
        && pt.get(..primary.table_len()) == st.get(..secondary.table_len()))
}

fn resync_secondary<IO: BlockIO>(s: &mut Session<IO>) -> PartResult<()> {
    let ids = s.gpt_regions()?;
    let (_, table) = copy_of_id(s, ids.primary_table)?;
    let (table_lba, stale) = copy_of_id(s, ids.secondary_table)?;
    if stale.len() != table.len() {
        return Err(PartError::StructuralViolation(
            "primary and secondary GPT tables differ in size".into(),
        ));
    }
    let (header_lba, _) = copy_of_id(s, ids.secondary_header)?;
    let header = relocated(s, Side::Primary, header_lba, GPT_PRIMARY_HEADER_LBA, table_lba)?;
    s.region_mut(ids.secondary_table)?.set_data(table);
    s.region_mut(ids.secondary_header)?.set_data(header);
    s.commit_side(Side::Secondary)
}

/// Writes a fresh protective MBR over whatever sits at LBA 0.
fn rewrite_pmbr<IO: BlockIO>(s: &mut Session<IO>, force: bool) -> PartResult<Recovered> {
    let map = s.map();
    let no_header = map.find(RegionKind::PrimaryGptHeader).is_none()
        && map.find(RegionKind::SecondaryGptHeader).is_none();
    let no_table = map.find(RegionKind::PrimaryGptTable).is_none()
        && map.find(RegionKind::SecondaryGptTable).is_none();
    if no_header || no_table {
        return Err(PartError::NotFound(
            "no GPT headers or tables, run recover first",
        ));
    }

    for (kind, name, what) in [
        (RegionKind::ProtectiveMbr, "PMBR", "device contains a PMBR"),
        (RegionKind::LegacyMbr, "MBR", "device contains a MBR"),
    ] {
        if s.map().first().kind != kind {
            continue;
        }
        if !force {
            return Err(PartError::AlreadyExists(what));
        }
        warn!("{}: about to overwrite the {name}", s.name());
        s.map_mut().release(0)?;
    }

    write_pmbr_if_missing(s)?;
    s.status(None, "written a fresh PMBR");
    Ok(Recovered {
        pmbr: true,
        ..Default::default()
    })
}
