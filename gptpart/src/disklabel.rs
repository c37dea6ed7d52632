// SPDX-License-Identifier: MIT

//! BSD disklabel readers (32-bit and 64-bit formats), used by migrate.

use gptio::prelude::*;
use log::{debug, warn};
use uuid::Uuid;
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::*;
use crate::types::*;

pub const DISKMAGIC32: u32 = 0x8256_4557;
pub const DISKMAGIC64: u32 = 0xc446_4c59;

/// disklabel32 lives in the second sector of the slice.
pub const LABELSECTOR32: u64 = 1;
pub const MAXPARTITIONS: usize = 16;
/// Partition spanning the whole slice.
pub const RAW_PART: usize = 2;

pub const FS_UNUSED: u8 = 0;
pub const FS_SWAP: u8 = 1;
pub const FS_BSDFFS: u8 = 7;
pub const FS_VINUM: u8 = 14;
pub const FS_HAMMER: u8 = 22;
pub const FS_HAMMER2: u8 = 23;

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug)]
#[repr(C)]
pub struct Partition32 {
    pub p_size: U32,
    pub p_offset: U32,
    pub p_fsize: U32,
    pub p_fstype: u8,
    pub p_frag: u8,
    pub p_cpg: U16,
}

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug)]
#[repr(C)]
pub struct Disklabel32 {
    pub d_magic: U32,
    pub d_type: U16,
    pub d_subtype: U16,
    pub d_typename: [u8; 16],
    pub d_packname: [u8; 16],
    pub d_secsize: U32,
    /// nsectors, ntracks, ncylinders, secpercyl, secperunit
    pub d_geometry: [U32; 5],
    pub d_sparespertrack: U16,
    pub d_sparespercyl: U16,
    pub d_acylinders: U32,
    pub d_rpm: U16,
    pub d_interleave: U16,
    pub d_trackskew: U16,
    pub d_cylskew: U16,
    pub d_headswitch: U32,
    pub d_trkseek: U32,
    pub d_flags: U32,
    pub d_drivedata: [U32; 5],
    pub d_spare: [U32; 5],
    pub d_magic2: U32,
    pub d_checksum: U16,
    pub d_npartitions: U16,
    pub d_bbsize: U32,
    pub d_sbsize: U32,
    pub d_partitions: [Partition32; MAXPARTITIONS],
}

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug)]
#[repr(C)]
pub struct Partition64 {
    pub p_boffset: U64,
    pub p_bsize: U64,
    pub p_fstype: u8,
    pub p_unused: [u8; 3],
    pub p_unused2: [U32; 3],
    pub p_type_uuid: [u8; 16],
    pub p_stor_uuid: [u8; 16],
}

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug)]
#[repr(C)]
pub struct Disklabel64 {
    pub d_reserved0: U32,
    pub d_magic: U32,
    pub d_crc: U32,
    pub d_align: U32,
    pub d_npartitions: U32,
    pub d_stor_uuid: [u8; 16],
    pub d_pad: U32,
    pub d_total_size: U64,
    pub d_bbase: U64,
    pub d_pbase: U64,
    pub d_pstop: U64,
    pub d_abase: U64,
    pub d_packname: [u8; 64],
    pub d_reserved: [u8; 64],
    pub d_partitions: [Partition64; MAXPARTITIONS],
}

/// A partition found inside a BSD slice, in absolute LBAs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyPartition {
    pub kind: Uuid,
    pub start: u64,
    /// Inclusive.
    pub end: u64,
    pub label: &'static str,
}

fn map_fstype(fstype: u8) -> Option<(Uuid, &'static str)> {
    match fstype {
        FS_SWAP => Some((GPT_ENT_TYPE_DRAGONFLY_SWAP, "DragonFly swap partition")),
        FS_BSDFFS => Some((GPT_ENT_TYPE_DRAGONFLY_UFS1, "DragonFly UFS1 partition")),
        FS_VINUM => Some((GPT_ENT_TYPE_DRAGONFLY_VINUM, "DragonFly vinum partition")),
        FS_HAMMER => Some((GPT_ENT_TYPE_DRAGONFLY_HAMMER, "DragonFly HAMMER partition")),
        FS_HAMMER2 => Some((
            GPT_ENT_TYPE_DRAGONFLY_HAMMER2,
            "DragonFly HAMMER2 partition",
        )),
        _ => None,
    }
}

fn read_label<T, IO>(io: &mut IO, lba: u64, sector_size: u64) -> PartResult<T>
where
    T: FromBytes + KnownLayout + Immutable,
    IO: BlockIO + ?Sized,
{
    let offset = lba
        .checked_mul(sector_size)
        .ok_or(BlockIOError::Invalid("disklabel offset overflow"))?;
    Ok(io.read_struct(offset)?)
}

/// Reads the disklabel of the BSD slice starting at `start`.
///
/// The 64-bit format is tried first; a 64-bit label holding a partition type
/// that cannot be mapped rejects the slice without trying the 32-bit format.
pub fn read_disklabel<IO: BlockIO + ?Sized>(
    io: &mut IO,
    sector_size: u64,
    start: u64,
) -> PartResult<Vec<LegacyPartition>> {
    let dl64: Disklabel64 = read_label(io, start, sector_size)?;
    if dl64.d_magic.get() == DISKMAGIC64 {
        return parse_disklabel64(&dl64, sector_size, start);
    }
    debug!("no disklabel64 in slice at {start}");

    let dl32: Disklabel32 = read_label(io, start + LABELSECTOR32, sector_size)?;
    if dl32.d_magic.get() == DISKMAGIC32 && dl32.d_magic2.get() == DISKMAGIC32 {
        return Ok(parse_disklabel32(&dl32, sector_size, start));
    }
    debug!("no disklabel32 in slice at {start}");
    Err(PartError::NotADisklabel)
}

pub fn parse_disklabel64(
    dl: &Disklabel64,
    sector_size: u64,
    start: u64,
) -> PartResult<Vec<LegacyPartition>> {
    let count = (dl.d_npartitions.get() as usize).min(MAXPARTITIONS);
    let parts = &dl.d_partitions[..count];

    if let Some(bad) = parts
        .iter()
        .find(|p| p.p_fstype != FS_UNUSED && map_fstype(p.p_fstype).is_none())
    {
        warn!("unknown DragonFly partition ({})", bad.p_fstype);
        return Err(PartError::NotADisklabel);
    }

    let mut out = Vec::new();
    for (i, p) in parts.iter().enumerate() {
        let Some((kind, label)) = map_fstype(p.p_fstype) else {
            continue;
        };
        let (boffset, bsize) = (p.p_boffset.get(), p.p_bsize.get());
        if boffset % sector_size != 0 {
            warn!("partition [{i}] start not multiple of {sector_size}");
        }
        if bsize % sector_size != 0 {
            warn!("partition [{i}] size not multiple of {sector_size}");
        }
        let len = bsize / sector_size;
        if len == 0 {
            warn!("partition [{i}] is empty");
            continue;
        }
        let first = start + boffset / sector_size;
        out.push(LegacyPartition {
            kind,
            start: first,
            end: first + len - 1,
            label,
        });
    }
    Ok(out)
}

pub fn parse_disklabel32(dl: &Disklabel32, sector_size: u64, start: u64) -> Vec<LegacyPartition> {
    let count = (dl.d_npartitions.get() as usize).min(MAXPARTITIONS);
    let parts = &dl.d_partitions[..count];
    let secsize = dl.d_secsize.get() as u64;

    // The raw partition offset is subtracted unless some partition starts below it.
    let mut rawofs = dl.d_partitions[RAW_PART].p_offset.get() as u64 * secsize;
    for p in parts.iter().filter(|p| p.p_fstype != FS_UNUSED) {
        if (p.p_offset.get() as u64 * secsize) < rawofs {
            rawofs = 0;
        }
    }
    rawofs /= sector_size;

    let mut out = Vec::new();
    for (i, p) in parts.iter().enumerate() {
        if p.p_fstype == FS_UNUSED {
            continue;
        }
        // disklabel32 has no HAMMER types
        let mapped = match p.p_fstype {
            FS_SWAP | FS_BSDFFS | FS_VINUM => map_fstype(p.p_fstype),
            _ => None,
        };
        let Some((kind, label)) = mapped else {
            warn!("unknown DragonFly partition ({})", p.p_fstype);
            continue;
        };
        let size = p.p_size.get() as u64;
        if size == 0 {
            warn!("partition [{i}] is empty");
            continue;
        }

        let ofs = p.p_offset.get() as u64 * secsize / sector_size;
        let ofs = if ofs > 0 { ofs.saturating_sub(rawofs) } else { 0 };
        out.push(LegacyPartition {
            kind,
            start: start + ofs,
            end: start + ofs + size - 1,
            label,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromZeros;

    fn label32(parts: &[(u8, u32, u32)]) -> Disklabel32 {
        let mut dl = Disklabel32::new_zeroed();
        dl.d_magic.set(DISKMAGIC32);
        dl.d_magic2.set(DISKMAGIC32);
        dl.d_secsize.set(512);
        dl.d_npartitions.set(MAXPARTITIONS as u16);
        for (i, &(fstype, offset, size)) in parts.iter().enumerate() {
            dl.d_partitions[i].p_fstype = fstype;
            dl.d_partitions[i].p_offset.set(offset);
            dl.d_partitions[i].p_size.set(size);
        }
        dl
    }

    fn label64(parts: &[(u8, u64, u64)]) -> Disklabel64 {
        let mut dl = Disklabel64::new_zeroed();
        dl.d_magic.set(DISKMAGIC64);
        dl.d_npartitions.set(MAXPARTITIONS as u32);
        for (i, &(fstype, boffset, bsize)) in parts.iter().enumerate() {
            dl.d_partitions[i].p_fstype = fstype;
            dl.d_partitions[i].p_boffset.set(boffset);
            dl.d_partitions[i].p_bsize.set(bsize);
        }
        dl
    }

    #[test]
    fn test_layouts() {
        assert_eq!(core::mem::size_of::<Disklabel32>(), 404);
        assert_eq!(core::mem::offset_of!(Disklabel32, d_secsize), 40);
        assert_eq!(core::mem::offset_of!(Disklabel32, d_magic2), 132);
        assert_eq!(core::mem::offset_of!(Disklabel32, d_partitions), 148);
        assert_eq!(core::mem::size_of::<Partition64>(), 64);
        assert_eq!(core::mem::offset_of!(Disklabel64, d_magic), 4);
        assert_eq!(core::mem::offset_of!(Disklabel64, d_total_size), 40);
        assert_eq!(core::mem::offset_of!(Disklabel64, d_partitions), 208);
    }

    #[test]
    fn test_disklabel32_relative_offsets() {
        // slice at 63; raw partition c starts at the slice's absolute offset
        let dl = label32(&[(FS_BSDFFS, 63 + 16, 1000), (FS_SWAP, 63 + 1016, 500), (0, 63, 2000)]);
        let parts = parse_disklabel32(&dl, 512, 63);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].kind, GPT_ENT_TYPE_DRAGONFLY_UFS1);
        assert_eq!((parts[0].start, parts[0].end), (63 + 16, 63 + 16 + 999));
        assert_eq!(parts[1].label, "DragonFly swap partition");
        assert_eq!(parts[1].start, 63 + 1016);
    }

    #[test]
    fn test_disklabel32_rawofs_reset() {
        // a partition below the raw offset disables raw offset subtraction
        let dl = label32(&[(FS_BSDFFS, 16, 100), (FS_VINUM, 200, 50), (FS_UNUSED, 63, 0)]);
        let parts = parse_disklabel32(&dl, 512, 1000);
        assert_eq!(parts[0].start, 1016);
        assert_eq!(parts[1].start, 1200);
        assert_eq!(parts[1].kind, GPT_ENT_TYPE_DRAGONFLY_VINUM);
    }

    #[test]
    fn test_disklabel32_skips_unknown() {
        let dl = label32(&[(FS_BSDFFS, 0, 100), (FS_HAMMER, 100, 100)]);
        let parts = parse_disklabel32(&dl, 512, 10);
        assert_eq!(parts.len(), 1);
        // offset 0 stays at the slice start
        assert_eq!(parts[0].start, 10);
    }

    #[test]
    fn test_disklabel32_skips_zero_size() {
        let dl = label32(&[(FS_BSDFFS, 10, 0), (FS_SWAP, 20, 5)]);
        let parts = parse_disklabel32(&dl, 512, 100);
        assert_eq!(parts.len(), 1);
        assert_eq!((parts[0].start, parts[0].end), (120, 124));
    }

    #[test]
    fn test_disklabel64_byte_offsets() {
        let dl = label64(&[(FS_HAMMER2, 1 << 20, 8 << 20), (FS_SWAP, 9 << 20, 1 << 20)]);
        let parts = parse_disklabel64(&dl, 512, 2048).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].kind, GPT_ENT_TYPE_DRAGONFLY_HAMMER2);
        assert_eq!(parts[0].start, 2048 + 2048);
        assert_eq!(parts[0].end, 2048 + 2048 + 16384 - 1);
    }

    #[test]
    fn test_disklabel64_rejects_unknown_type() {
        let dl = label64(&[(FS_HAMMER, 0, 4096), (9, 4096, 4096)]);
        assert!(matches!(
            parse_disklabel64(&dl, 512, 0),
            Err(PartError::NotADisklabel)
        ));
    }

    #[test]
    fn test_read_disklabel_probes_both() {
        let mut io = MemBlockIO::zeroed(4096 * 512);
        assert!(matches!(
            read_disklabel(&mut io, 512, 100),
            Err(PartError::NotADisklabel)
        ));

        let dl = label32(&[(FS_BSDFFS, 116, 200)]);
        io.write_at_lba(101, 512, dl.as_bytes()).unwrap();
        let parts = read_disklabel(&mut io, 512, 100).unwrap();
        assert_eq!(parts.len(), 1);

        let dl = label64(&[(FS_HAMMER, 512, 512 * 10)]);
        io.write_at_lba(100, 512, dl.as_bytes()).unwrap();
        let parts = read_disklabel(&mut io, 512, 100).unwrap();
        assert_eq!(parts[0].kind, GPT_ENT_TYPE_DRAGONFLY_HAMMER);
        assert_eq!((parts[0].start, parts[0].end), (101, 110));
    }
}
