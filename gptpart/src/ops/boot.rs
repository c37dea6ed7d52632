// SPDX-License-Identifier: MIT

//! Boot loader installation: BIOS `gptboot` stage with its PMBR code, and the
//! EFI system partition image.

use gptio::prelude::*;
use log::debug;
use uuid::Uuid;

use crate::errors::*;
use crate::map::RegionKind;
use crate::mbr::{MBR_BOOT_CODE_LEN, MBR_STATUS_ACTIVE, MBR_TYPE_PROTECTIVE, Mbr};
use crate::ops::add::{AddRequest, add_quiet};
use crate::session::{Session, Side};
use crate::types::{GPT_ENT_TYPE_EFI, GPT_ENT_TYPE_FREEBSD_BOOT};

const BOOT_DEFAULT_BYTES: u64 = 65536;
const EFI_DEFAULT_BYTES: u64 = 819200;
const MIN_PARTITION_BYTES: u64 = 16384;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootRequest {
    /// PMBR boot loader image, exactly one sector long.
    pub pmbr_code: Option<Vec<u8>>,
    /// `gptboot` stage written at the start of the boot partition.
    pub stage: Vec<u8>,
    /// Size of a new boot partition, in sectors.
    pub size: Option<u64>,
    /// Toggle the bootable flag of the protective record.
    pub toggle_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EfiRequest {
    /// FAT image written at the start of the EFI system partition.
    pub image: Vec<u8>,
    pub size: Option<u64>,
}

/// Where an image will go: an existing partition or one still to be added.
enum Target {
    Existing { index: u32, start: u64 },
    New { size: u64 },
}

fn partition_sectors<IO: BlockIO>(
    s: &Session<IO>,
    size: Option<u64>,
    default_bytes: u64,
) -> PartResult<u64> {
    let secsz = s.sector_size();
    match size {
        None => Ok(default_bytes / secsz),
        Some(n) if n.saturating_mul(secsz) < MIN_PARTITION_BYTES => Err(
            PartError::InvalidArgument(format!("invalid boot partition size {n}")),
        ),
        Some(n) => Ok(n),
    }
}

/// First partition of type `kind` in the primary table, checked against the
/// image length.
fn find_target<IO: BlockIO>(
    s: &Session<IO>,
    kind: &Uuid,
    size: u64,
    image_len: usize,
) -> PartResult<Target> {
    s.gpt_regions()?;
    let secsz = s.sector_size();
    let need = image_len as u64;
    let table = s.table(Side::Primary)?;
    let Some((slot, entry)) = table.used().find(|(_, e)| e.type_uuid() == *kind) else {
        if size.saturating_mul(secsz) < need {
            return Err(PartError::InsufficientSpace(
                "proposed size for boot partition is too small",
            ));
        }
        return Ok(Target::New { size });
    };

    let start = entry.start_lba.get();
    let region = s
        .map()
        .iter()
        .find(|r| r.kind == RegionKind::GptPartition && r.start == start)
        .ok_or_else(|| PartError::StructuralViolation("internal map list is corrupted".into()))?;
    if region.size.saturating_mul(secsz) < need {
        return Err(PartError::InsufficientSpace("boot partition is too small"));
    }
    Ok(Target::Existing {
        index: slot + 1,
        start,
    })
}

/// Adds the partition if needed. Returns its index and start LBA.
fn ensure_partition<IO: BlockIO>(
    s: &mut Session<IO>,
    target: Target,
    kind: Uuid,
    label: &str,
) -> PartResult<(u32, u64)> {
    match target {
        Target::Existing { index, start } => Ok((index, start)),
        Target::New { size } => {
            let req = AddRequest::new(kind, size).with_label(label);
            let added = add_quiet(s, &req)?;
            s.status(Some(added.index), "added");
            Ok((added.index, added.start))
        }
    }
}

/// Writes `image` zero-padded to whole sectors.
fn write_image<IO: BlockIO>(s: &mut Session<IO>, start: u64, image: &[u8]) -> PartResult<()> {
    let secsz = s.sector_size() as usize;
    let mut buf = image.to_vec();
    buf.resize(image.len().div_ceil(secsz) * secsz, 0);
    debug!("{}: writing {} bytes at sector {start}", s.name(), buf.len());
    s.write_sectors(start, &buf)?;
    Ok(())
}

/// Installs the PMBR boot code and the `gptboot` stage, creating a FreeBSD
/// boot partition when none exists. The PMBR is only rewritten once the
/// boot partition is in place.
pub fn install_boot<IO: BlockIO>(s: &mut Session<IO>, req: &BootRequest) -> PartResult<u32> {
    let bsize = partition_sectors(s, req.size, BOOT_DEFAULT_BYTES)?;
    let pmbr = s
        .map()
        .find(RegionKind::ProtectiveMbr)
        .ok_or(PartError::NotFound("PMBR not found"))?;
    if let Some(code) = &req.pmbr_code {
        if code.len() as u64 != s.sector_size() {
            return Err(PartError::InvalidArgument("invalid PMBR boot loader".into()));
        }
    }
    let target = find_target(s, &GPT_ENT_TYPE_FREEBSD_BOOT, bsize, req.stage.len())?;
    let (index, start) = ensure_partition(s, target, GPT_ENT_TYPE_FREEBSD_BOOT, "GPTBOOT")?;

    if let Some(code) = &req.pmbr_code {
        let secsz = s.sector_size();
        let region = s.region_mut(pmbr)?;
        let mut mbr = Mbr::parse(region.data()).ok_or(PartError::InvalidSignature)?;
        mbr.boot_code.copy_from_slice(&code[..MBR_BOOT_CODE_LEN]);
        let toggled = req.toggle_active && mbr.records[0].part_type == MBR_TYPE_PROTECTIVE;
        if toggled {
            mbr.records[0].status ^= MBR_STATUS_ACTIVE;
        }
        region.set_data(mbr.to_sector(secsz));
        s.write_region(pmbr)?;
        if toggled {
            s.status(None, "toggled bootable flag in 0xEE part_flags");
        }
    }

    write_image(s, start, &req.stage)?;
    s.status(Some(index), "and PMBR updated");
    Ok(index)
}

/// Writes an EFI FAT image, creating an EFI system partition when none
/// exists.
pub fn install_efi<IO: BlockIO>(s: &mut Session<IO>, req: &EfiRequest) -> PartResult<u32> {
    let bsize = partition_sectors(s, req.size, EFI_DEFAULT_BYTES)?;
    let target = find_target(s, &GPT_ENT_TYPE_EFI, bsize, req.image.len())?;
    let (index, start) = ensure_partition(s, target, GPT_ENT_TYPE_EFI, "EFIBOOT")?;
    write_image(s, start, &req.image)?;
    s.status(Some(index), "updated");
    Ok(index)
}
