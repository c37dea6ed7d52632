// SPDX-License-Identifier: MIT

//! Master Boot Record codec and legacy slice reader.

use gptio::prelude::*;
use log::{debug, warn};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::errors::*;

pub const MBR_SIZE: usize = 512;
pub const MBR_BOOT_CODE_LEN: usize = 446;
pub const MBR_SIGNATURE: [u8; 2] = [0x55, 0xAA];

pub const MBR_TYPE_EMPTY: u8 = 0x00;
pub const MBR_TYPE_PROTECTIVE: u8 = 0xEE;
pub const MBR_TYPE_EFI: u8 = 0xEF;
pub const MBR_TYPE_DRAGONFLY: u8 = 0xA5;

pub const MBR_STATUS_ACTIVE: u8 = 0x80;

/// Extended boot records followed before giving up on a chain.
const MAX_EXTENDED_DEPTH: u8 = 16;

#[inline]
pub fn is_extended_type(t: u8) -> bool {
    // CHS, LBA and Linux extended
    matches!(t, 0x05 | 0x0F | 0x85)
}

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct MbrRecord {
    pub status: u8,
    pub chs_start: [u8; 3],
    pub part_type: u8,
    pub chs_end: [u8; 3],
    pub start_lba: U32,
    pub sectors: U32,
}

impl MbrRecord {
    /// The single record of a protective MBR covering `1..=last_lba`.
    pub fn protective(last_lba: u64) -> Self {
        Self {
            status: 0,
            chs_start: [0x00, 0x02, 0x00],
            part_type: MBR_TYPE_PROTECTIVE,
            chs_end: [0xFE, 0xFF, 0xFF],
            start_lba: U32::new(1),
            sectors: U32::new(u32::try_from(last_lba).unwrap_or(u32::MAX)),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.part_type == MBR_TYPE_EMPTY
    }

    #[inline]
    pub fn is_protective(&self) -> bool {
        self.part_type == MBR_TYPE_PROTECTIVE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbrKind {
    /// Every used record is of type 0xEE.
    Protective,
    Legacy,
}

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug)]
#[repr(C)]
pub struct Mbr {
    pub boot_code: [u8; MBR_BOOT_CODE_LEN],
    pub records: [MbrRecord; 4],
    pub signature: [u8; 2],
}

impl Mbr {
    /// Protective MBR with empty boot code.
    pub fn new_protective(last_lba: u64) -> Self {
        let mut mbr = Self::new_zeroed();
        mbr.make_protective(last_lba);
        mbr
    }

    /// Replaces the record table by a single protective record, keeping the
    /// boot code.
    pub fn make_protective(&mut self, last_lba: u64) {
        self.records = [MbrRecord::new_zeroed(); 4];
        self.records[0] = MbrRecord::protective(last_lba);
        self.signature = MBR_SIGNATURE;
    }

    /// Reads an MBR from the front of `bytes`; `None` without the 0x55AA signature.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let (mbr, _) = Self::read_from_prefix(bytes).ok()?;
        mbr.has_valid_signature().then_some(mbr)
    }

    #[inline]
    pub fn has_valid_signature(&self) -> bool {
        self.signature == MBR_SIGNATURE
    }

    pub fn kind(&self) -> MbrKind {
        let mut used = self.records.iter().filter(|r| !r.is_empty()).peekable();
        if used.peek().is_some() && used.all(|r| r.is_protective()) {
            MbrKind::Protective
        } else {
            MbrKind::Legacy
        }
    }

    /// Number of 0xEE records.
    pub fn protective_records(&self) -> usize {
        self.records.iter().filter(|r| r.is_protective()).count()
    }

    /// The MBR at the front of a zeroed sector buffer.
    pub fn to_sector(&self, sector_size: u64) -> Vec<u8> {
        let mut sector = vec![0u8; (sector_size as usize).max(MBR_SIZE)];
        sector[..MBR_SIZE].copy_from_slice(self.as_bytes());
        sector
    }
}

/// A data slice found in an MBR or extended boot record, in absolute LBAs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacySlice {
    /// 1-based record slot within its boot record.
    pub index: u32,
    pub part_type: u8,
    pub start: u64,
    pub size: u64,
    /// LBA of the boot record that holds this slice.
    pub record_lba: u64,
}

/// Everything found by [`read_mbr`].
#[derive(Debug, Clone)]
pub struct LegacySlices {
    pub kind: MbrKind,
    /// The boot record at LBA 0.
    pub mbr: Mbr,
    /// LBAs of the extended boot records that were followed.
    pub extended: Vec<u64>,
    pub slices: Vec<LegacySlice>,
}

/// Reads the MBR at LBA 0 and follows extended partitions.
///
/// Returns `None` when LBA 0 carries no MBR signature.
pub fn read_mbr<IO: BlockIO + ?Sized>(
    io: &mut IO,
    sector_size: u64,
    last_lba: u64,
) -> PartResult<Option<LegacySlices>> {
    let sector = io.read_sectors(0, 1, sector_size)?;
    let Some(mbr) = Mbr::parse(&sector) else {
        debug!("no MBR signature at sector 0");
        return Ok(None);
    };

    let kind = mbr.kind();
    let mut legacy = LegacySlices {
        kind,
        mbr,
        extended: Vec::new(),
        slices: Vec::new(),
    };
    if kind == MbrKind::Protective {
        if mbr.protective_records() > 1 {
            warn!("suspicious PMBR at sector 0");
        }
        debug!("PMBR at sector 0");
        return Ok(Some(legacy));
    }

    debug!("MBR at sector 0");
    collect_slices(io, sector_size, last_lba, &mbr, 0, 0, &mut legacy)?;
    Ok(Some(legacy))
}

fn collect_slices<IO: BlockIO + ?Sized>(
    io: &mut IO,
    sector_size: u64,
    last_lba: u64,
    mbr: &Mbr,
    lba: u64,
    depth: u8,
    out: &mut LegacySlices,
) -> PartResult<()> {
    for (slot, rec) in mbr.records.iter().enumerate() {
        if rec.is_empty() || rec.is_protective() {
            continue;
        }
        let (start, size) = (rec.start_lba.get() as u64, rec.sectors.get() as u64);
        if start == 0 && size == 0 {
            warn!("malformed MBR at sector {lba}");
            continue;
        }
        // relative to the enclosing boot record
        let start = lba + start;

        if is_extended_type(rec.part_type) {
            if depth >= MAX_EXTENDED_DEPTH {
                warn!("extended MBR chain too deep at sector {start}");
                continue;
            }
            if start > last_lba {
                warn!("extended MBR at sector {start} is past the medium");
                continue;
            }
            let sector = io.read_sectors(start, 1, sector_size)?;
            let Some(ebr) = Mbr::parse(&sector) else {
                debug!("MBR not found at sector {start}");
                continue;
            };
            debug!("extended MBR at sector {start}");
            out.extended.push(start);
            collect_slices(io, sector_size, last_lba, &ebr, start, depth + 1, out)?;
            continue;
        }

        debug!(
            "MBR partition {} type 0x{:02x} at sector {start}, {size} sectors",
            slot + 1,
            rec.part_type
        );
        out.slices.push(LegacySlice {
            index: slot as u32 + 1,
            part_type: rec.part_type,
            start,
            size,
            record_lba: lba,
        });
    }
    Ok(())
}
