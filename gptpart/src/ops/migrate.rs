// SPDX-License-Identifier: MIT

use gptio::prelude::*;
use log::{debug, warn};
use uuid::Uuid;

use crate::disklabel::{self, LegacyPartition};
use crate::errors::*;
use crate::gpt::{EntryTable, GPT_DEFAULT_NUM_ENTRIES, GPT_ENTRY_SIZE};
use crate::map::RegionKind;
use crate::mbr::{MBR_TYPE_DRAGONFLY, MBR_TYPE_EFI, MBR_TYPE_EMPTY, MbrKind};
use crate::ops::{fresh_table, plan_tables, write_new_gpt};
use crate::session::Session;
use crate::types::{GPT_ENT_TYPE_DRAGONFLY_LEGACY, GPT_ENT_TYPE_EFI};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Skip MBR slices of unknown type instead of failing.
    pub force: bool,
    /// Convert BSD slices whole instead of reading their disklabel.
    pub slice: bool,
    pub entries: u32,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            force: false,
            slice: false,
            entries: GPT_DEFAULT_NUM_ENTRIES,
        }
    }
}

/// Converts a legacy MBR layout into a GPT and turns the MBR protective.
pub fn migrate<IO: BlockIO>(s: &mut Session<IO>, opts: &MigrateOptions) -> PartResult<()> {
    let mut mbr = match s.legacy() {
        Some(legacy)
            if legacy.kind == MbrKind::Legacy
                && s.map().first().kind == RegionKind::LegacyMbr =>
        {
            legacy.mbr
        }
        _ => return Err(PartError::NotFound("no partitions to convert")),
    };
    if s.map().find(RegionKind::PrimaryGptHeader).is_some()
        || s.map().find(RegionKind::SecondaryGptHeader).is_some()
    {
        return Err(PartError::AlreadyExists("device already contains a GPT"));
    }

    let layout = plan_tables(s, opts.entries)?;

    let mut found: Vec<LegacyPartition> = Vec::new();
    for (slot, rec) in mbr.records.iter().enumerate() {
        let start = rec.start_lba.get() as u64;
        let size = rec.sectors.get() as u64;
        let whole = |kind: Uuid, label: &'static str| LegacyPartition {
            kind,
            start,
            end: (start + size).saturating_sub(1),
            label,
        };
        match rec.part_type {
            MBR_TYPE_EMPTY => continue,
            MBR_TYPE_DRAGONFLY if opts.slice => found.push(whole(
                GPT_ENT_TYPE_DRAGONFLY_LEGACY,
                "DragonFly disklabelXX partition",
            )),
            MBR_TYPE_DRAGONFLY => {
                let secsz = s.sector_size();
                match disklabel::read_disklabel(s.io_mut(), secsz, start) {
                    Ok(parts) => {
                        if parts.is_empty() {
                            debug!("slice {} has an empty disklabel", slot + 1);
                        }
                        found.extend(parts)
                    }
                    Err(PartError::NotADisklabel) => {
                        debug!("slice {} has no usable disklabel", slot + 1);
                        found.push(whole(
                            GPT_ENT_TYPE_DRAGONFLY_LEGACY,
                            "DragonFly unknown partition",
                        ));
                    }
                    Err(e) => return Err(e),
                }
            }
            MBR_TYPE_EFI => found.push(whole(GPT_ENT_TYPE_EFI, "EFI system partition")),
            other if opts.force => {
                warn!("{}: skipping partition type ({other})", s.name());
            }
            other => return Err(PartError::UnknownLegacyType(other)),
        }
    }
    if found.len() > layout.entries as usize {
        return Err(PartError::TableFull);
    }

    let mut table = fresh_table(s, layout)?;
    {
        let mut view = EntryTable::new(&mut table[..], layout.entries, GPT_ENTRY_SIZE as u32)?;
        for (slot, part) in found.iter().enumerate() {
            let e = view.entry_at_mut(slot as u32)?;
            e.set_type(&part.kind);
            e.start_lba.set(part.start);
            e.end_lba.set(part.end);
            e.set_label(part.label);
        }
    }
    write_new_gpt(s, layout, table, false)?;

    mbr.make_protective(s.last_lba());
    let sector = mbr.to_sector(s.sector_size());
    let pmbr = s.region_mut(0)?;
    pmbr.kind = RegionKind::ProtectiveMbr;
    pmbr.set_data(sector);
    s.write_region(0)?;

    s.status(None, "slices migrated to gpt partitions, update fstab");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disklabel::{DISKMAGIC64, Disklabel64, FS_HAMMER2, FS_SWAP};
    use crate::mbr::Mbr;
    use crate::session::tests::{MIB, blank, reopen, with_gpt};
    use crate::session::{OpenFlags, Side};
    use crate::types::{GPT_ENT_TYPE_DRAGONFLY_HAMMER2, GPT_ENT_TYPE_DRAGONFLY_SWAP};
    use zerocopy::{FromZeros, IntoBytes};

    fn legacy_image(records: &[(u8, u32, u32)]) -> MemBlockIO {
        let mut mbr = Mbr::new_protective(1);
        mbr.records[0].part_type = MBR_TYPE_EMPTY;
        for (rec, &(kind, start, size)) in mbr.records.iter_mut().zip(records) {
            rec.part_type = kind;
            rec.start_lba.set(start);
            rec.sectors.set(size);
        }
        mbr.boot_code[0] = 0xFA;
        let mut io = MemBlockIO::zeroed((8 * MIB) as usize);
        io.write_at(0, &mbr.to_sector(512)).unwrap();
        io
    }

    fn open(io: MemBlockIO) -> Session<MemBlockIO> {
        Session::open("md0", io, OpenFlags::default()).unwrap()
    }

    #[test]
    fn test_migrate_efi_and_disklabel64() {
        let mut io = legacy_image(&[(MBR_TYPE_EFI, 2048, 2048), (MBR_TYPE_DRAGONFLY, 4096, 8192)]);
        let mut dl = Disklabel64::new_zeroed();
        dl.d_magic.set(DISKMAGIC64);
        dl.d_npartitions.set(2);
        dl.d_partitions[0].p_fstype = FS_SWAP;
        dl.d_partitions[0].p_boffset.set(32768);
        dl.d_partitions[0].p_bsize.set(MIB);
        dl.d_partitions[1].p_fstype = FS_HAMMER2;
        dl.d_partitions[1].p_boffset.set(32768 + MIB);
        dl.d_partitions[1].p_bsize.set(2 * MIB);
        io.write_at(4096 * 512, dl.as_bytes()).unwrap();

        let mut s = open(io);
        migrate(&mut s, &MigrateOptions::default()).unwrap();
        let s = reopen(s);

        assert_eq!(s.map().first().kind, RegionKind::ProtectiveMbr);
        assert_eq!(s.legacy().unwrap().mbr.boot_code[0], 0xFA);
        let t = s.table(Side::Secondary).unwrap();
        let efi = t.entry_at(0).unwrap();
        assert_eq!(efi.type_uuid(), GPT_ENT_TYPE_EFI);
        assert_eq!((efi.start_lba.get(), efi.end_lba.get()), (2048, 4095));
        assert_eq!(efi.label(), "EFI system partition");

        let swap = t.entry_at(1).unwrap();
        assert_eq!(swap.type_uuid(), GPT_ENT_TYPE_DRAGONFLY_SWAP);
        assert_eq!((swap.start_lba.get(), swap.end_lba.get()), (4160, 6207));

        let h2 = t.entry_at(2).unwrap();
        assert_eq!(h2.type_uuid(), GPT_ENT_TYPE_DRAGONFLY_HAMMER2);
        assert_eq!((h2.start_lba.get(), h2.end_lba.get()), (6208, 10303));
        assert!(t.entry_at(3).unwrap().is_free());
        s.map().check().unwrap();
    }

    #[test]
    fn test_migrate_unreadable_label_and_slice_mode() {
        let io = legacy_image(&[(MBR_TYPE_DRAGONFLY, 2048, 4096)]);
        let mut s = open(io);
        migrate(&mut s, &MigrateOptions::default()).unwrap();
        let s = reopen(s);
        let e = *s.active_table().unwrap().entry_at(0).unwrap();
        assert_eq!(e.type_uuid(), GPT_ENT_TYPE_DRAGONFLY_LEGACY);
        assert_eq!(e.label(), "DragonFly unknown partition");

        let io = legacy_image(&[(MBR_TYPE_DRAGONFLY, 2048, 4096)]);
        let mut s = open(io);
        let opts = MigrateOptions {
            slice: true,
            ..Default::default()
        };
        migrate(&mut s, &opts).unwrap();
        let e = *s.active_table().unwrap().entry_at(0).unwrap();
        assert_eq!(e.label(), "DragonFly disklabelXX partition");
        assert_eq!((e.start_lba.get(), e.end_lba.get()), (2048, 6143));
    }

    #[test]
    fn test_migrate_empty_disklabel_adds_nothing() {
        let mut io = legacy_image(&[(MBR_TYPE_DRAGONFLY, 2048, 4096), (MBR_TYPE_EFI, 8192, 2048)]);
        let mut dl = Disklabel64::new_zeroed();
        dl.d_magic.set(DISKMAGIC64);
        io.write_at(2048 * 512, dl.as_bytes()).unwrap();

        let mut s = open(io);
        migrate(&mut s, &MigrateOptions::default()).unwrap();
        let s = reopen(s);
        let t = s.active_table().unwrap();
        assert_eq!(t.used().count(), 1);
        assert_eq!(t.entry_at(0).unwrap().type_uuid(), GPT_ENT_TYPE_EFI);
    }

    #[test]
    fn test_migrate_unknown_type() {
        let io = legacy_image(&[(0x83, 2048, 2048), (MBR_TYPE_EFI, 4096, 2048)]);
        let mut s = open(io);
        let err = migrate(&mut s, &MigrateOptions::default());
        assert!(matches!(err, Err(PartError::UnknownLegacyType(0x83))));
        assert!(!s.is_modified());

        let opts = MigrateOptions {
            force: true,
            ..Default::default()
        };
        migrate(&mut s, &opts).unwrap();
        let s = reopen(s);
        let t = s.active_table().unwrap();
        assert_eq!(t.used().count(), 1);
        assert_eq!(t.entry_at(0).unwrap().start_lba.get(), 4096);
    }

    #[test]
    fn test_migrate_preconditions() {
        let mut s = blank(4 * MIB);
        let err = migrate(&mut s, &MigrateOptions::default());
        assert!(matches!(err, Err(PartError::NotFound(_))));

        let mut s = with_gpt(4 * MIB);
        let err = migrate(&mut s, &MigrateOptions::default());
        assert!(matches!(err, Err(PartError::NotFound(_))));
    }
}
