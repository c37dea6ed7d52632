// SPDX-License-Identifier: MIT

//! GPT header and partition-entry codec.

use core::fmt;

use bitflags::bitflags;
use uuid::Uuid;
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::crc;
use crate::errors::*;
use crate::guid::{self, RawGuid};
use crate::types::PartitionKind;

pub const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
pub const GPT_REVISION: u32 = 0x0001_0000;
/// Size of the header fields; trailing sector bytes are not part of the header.
pub const GPT_HEADER_SIZE: usize = 92;
pub const GPT_ENTRY_SIZE: usize = 128;
pub const GPT_DEFAULT_NUM_ENTRIES: u32 = 128;
pub const GPT_PRIMARY_HEADER_LBA: u64 = 1;
pub const GPT_PRIMARY_ENTRIES_LBA: u64 = 2;
pub const GPT_NAME_LEN: usize = 36;

const HEADER_CRC_OFFSET: usize = 16;
const HEADER_CRC_LEN: usize = 4;

bitflags! {
    /// Entry attribute bits understood by the tools. Other bits are preserved.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GptAttributes: u64 {
        const BOOTFAILED = 1 << 57;
        const BOOTONCE   = 1 << 58;
        const BOOTME     = 1 << 59;
    }
}

impl GptAttributes {
    /// Parses `bootme`, `bootonce` or `bootfailed`.
    pub fn parse_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "bootme" => Some(Self::BOOTME),
            "bootonce" => Some(Self::BOOTONCE),
            "bootfailed" => Some(Self::BOOTFAILED),
            _ => None,
        }
    }

    /// Human description of each known bit that is set.
    pub fn describe(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.contains(Self::BOOTME) {
            out.push("indicates a bootable partition");
        }
        if self.contains(Self::BOOTONCE) {
            out.push("attempt to boot this partition only once");
        }
        if self.contains(Self::BOOTFAILED) {
            out.push("partition that was marked bootonce but failed to boot");
        }
        out
    }
}

pub fn encode_gpt_name(name: &str) -> [U16; GPT_NAME_LEN] {
    let mut buf = [U16::ZERO; GPT_NAME_LEN];
    for (i, c) in name.encode_utf16().take(GPT_NAME_LEN).enumerate() {
        buf[i] = U16::new(c);
    }
    buf
}

pub fn decode_gpt_name(name: &[U16; GPT_NAME_LEN]) -> String {
    let units: Vec<u16> = name
        .iter()
        .map(|c| c.get())
        .take_while(|&c| c != 0)
        .collect();
    String::from_utf16_lossy(&units)
}

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct GptEntry {
    pub type_guid: RawGuid,
    pub unique_guid: RawGuid,
    pub start_lba: U64,
    pub end_lba: U64,
    pub attributes: U64,
    pub name: [U16; GPT_NAME_LEN],
}

impl GptEntry {
    /// A slot is free when its type UUID is nil.
    #[inline]
    pub fn is_free(&self) -> bool {
        guid::is_nil(&self.type_guid)
    }

    #[inline]
    pub fn type_uuid(&self) -> Uuid {
        guid::decode(&self.type_guid)
    }

    #[inline]
    pub fn unique_uuid(&self) -> Uuid {
        guid::decode(&self.unique_guid)
    }

    #[inline]
    pub fn kind(&self) -> PartitionKind {
        PartitionKind::from_uuid(&self.type_uuid())
    }

    #[inline]
    pub fn set_type(&mut self, kind: &Uuid) {
        self.type_guid = guid::encode(kind);
    }

    #[inline]
    pub fn label(&self) -> String {
        decode_gpt_name(&self.name)
    }

    #[inline]
    pub fn set_label(&mut self, label: &str) {
        self.name = encode_gpt_name(label);
    }

    #[inline]
    pub fn attributes(&self) -> GptAttributes {
        GptAttributes::from_bits_retain(self.attributes.get())
    }

    #[inline]
    pub fn set_attributes(&mut self, attrs: GptAttributes) {
        self.attributes.set(attrs.bits());
    }

    /// Number of sectors covered (end is inclusive).
    #[inline]
    pub fn sectors(&self) -> u64 {
        self.end_lba
            .get()
            .wrapping_sub(self.start_lba.get())
            .wrapping_add(1)
    }

    /// Zeroes every field of the slot.
    pub fn clear(&mut self) {
        self.as_mut_bytes().fill(0);
    }
}

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct GptHeader {
    pub signature: [u8; 8],
    pub revision: U32,
    pub header_size: U32,
    pub header_crc: U32,
    pub reserved: U32,
    pub current_lba: U64,
    pub backup_lba: U64,
    pub first_usable_lba: U64,
    pub last_usable_lba: U64,
    pub disk_guid: RawGuid,
    pub entries_lba: U64,
    pub num_entries: U32,
    pub entry_size: U32,
    pub entries_crc: U32,
}

impl GptHeader {
    /// A header with both CRCs left at zero.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        current_lba: u64,
        backup_lba: u64,
        first_usable_lba: u64,
        last_usable_lba: u64,
        disk_guid: &Uuid,
        entries_lba: u64,
        num_entries: u32,
    ) -> Self {
        Self {
            signature: *GPT_SIGNATURE,
            revision: U32::new(GPT_REVISION),
            header_size: U32::new(GPT_HEADER_SIZE as u32),
            header_crc: U32::ZERO,
            reserved: U32::ZERO,
            current_lba: U64::new(current_lba),
            backup_lba: U64::new(backup_lba),
            first_usable_lba: U64::new(first_usable_lba),
            last_usable_lba: U64::new(last_usable_lba),
            disk_guid: guid::encode(disk_guid),
            entries_lba: U64::new(entries_lba),
            num_entries: U32::new(num_entries),
            entry_size: U32::new(GPT_ENTRY_SIZE as u32),
            entries_crc: U32::ZERO,
        }
    }

    /// Copy of this header describing the other side of the disk.
    /// The header CRC is stale and must be recomputed.
    pub fn mirrored(&self, current_lba: u64, backup_lba: u64, entries_lba: u64) -> Self {
        let mut other = *self;
        other.current_lba.set(current_lba);
        other.backup_lba.set(backup_lba);
        other.entries_lba.set(entries_lba);
        other
    }

    /// Bytes of the entry array covered by the table CRC.
    #[inline]
    pub fn table_len(&self) -> usize {
        self.num_entries.get() as usize * self.entry_size.get() as usize
    }

    /// Sectors needed by the entry array.
    #[inline]
    pub fn table_sectors(&self, sector_size: u64) -> u64 {
        (self.table_len() as u64).div_ceil(sector_size)
    }

    #[inline]
    pub fn disk_uuid(&self) -> Uuid {
        guid::decode(&self.disk_guid)
    }

    /// Places the header at the front of a zeroed sector buffer.
    pub fn to_sector(&self, sector_size: u64) -> Vec<u8> {
        let mut sector = vec![0u8; (sector_size as usize).max(GPT_HEADER_SIZE)];
        sector[..GPT_HEADER_SIZE].copy_from_slice(self.as_bytes());
        sector
    }
}

impl fmt::Display for GptHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "signature:  {}", String::from_utf8_lossy(&self.signature))?;
        writeln!(f, "revision:   0x{:08x}", self.revision.get())?;
        writeln!(f, "size:       {}", self.header_size.get())?;
        writeln!(f, "crc_self:   0x{:08x}", self.header_crc.get())?;
        writeln!(f, "lba_self:   {}", self.current_lba.get())?;
        writeln!(f, "lba_alt:    {}", self.backup_lba.get())?;
        writeln!(f, "lba_start:  {}", self.first_usable_lba.get())?;
        writeln!(f, "lba_end:    {}", self.last_usable_lba.get())?;
        writeln!(f, "guid:       {}", self.disk_uuid())?;
        writeln!(f, "lba_table:  {}", self.entries_lba.get())?;
        writeln!(f, "entries:    {}", self.num_entries.get())?;
        writeln!(f, "entsz:      {}", self.entry_size.get())?;
        write!(f, "crc_table:  0x{:08x}", self.entries_crc.get())
    }
}

/// Parses the header at the front of `bytes`.
pub fn parse_header(bytes: &[u8]) -> PartResult<GptHeader> {
    let (hdr, _) = GptHeader::read_from_prefix(bytes).map_err(|_| PartError::TooSmall)?;
    if &hdr.signature != GPT_SIGNATURE {
        return Err(PartError::InvalidSignature);
    }
    let size = hdr.header_size.get() as usize;
    if size < GPT_HEADER_SIZE || size > bytes.len() {
        return Err(PartError::TooSmall);
    }
    Ok(hdr)
}

/// Rewrites the location fields of a header sector in place. Both CRCs
/// are left stale.
pub fn relocate_header(
    header: &mut [u8],
    current_lba: u64,
    backup_lba: u64,
    entries_lba: u64,
) -> PartResult<()> {
    parse_header(header)?;
    let (hdr, _) = GptHeader::mut_from_prefix(header).map_err(|_| PartError::TooSmall)?;
    hdr.current_lba.set(current_lba);
    hdr.backup_lba.set(backup_lba);
    hdr.entries_lba.set(entries_lba);
    Ok(())
}

fn header_crc_of(bytes: &[u8], hdr: &GptHeader) -> u32 {
    let size = hdr.header_size.get() as usize;
    crc::crc_with_field_zeroed(&bytes[..size], HEADER_CRC_OFFSET, HEADER_CRC_LEN)
}

fn table_slice<'a>(hdr: &GptHeader, table: &'a [u8]) -> Option<&'a [u8]> {
    table.get(..hdr.table_len())
}

/// Sets the table CRC from `table`, then the header CRC over the header
/// with its CRC field read as zero.
pub fn recompute_crcs(header: &mut [u8], table: &[u8]) -> PartResult<()> {
    let parsed = parse_header(header)?;
    let table = table_slice(&parsed, table).ok_or(PartError::InvalidArgument(
        "entry table is shorter than the header claims".into(),
    ))?;
    let table_crc = crc::crc32(table);

    {
        let (hdr, _) =
            GptHeader::mut_from_prefix(&mut *header).map_err(|_| PartError::TooSmall)?;
        hdr.entries_crc.set(table_crc);
    }
    let header_crc = header_crc_of(header, &parsed);
    let (hdr, _) = GptHeader::mut_from_prefix(header).map_err(|_| PartError::TooSmall)?;
    hdr.header_crc.set(header_crc);
    Ok(())
}

/// Whether the stored header CRC matches the header bytes.
pub fn header_crc_ok(header: &[u8]) -> bool {
    parse_header(header).is_ok_and(|hdr| header_crc_of(header, &hdr) == hdr.header_crc.get())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcStatus {
    pub header_ok: bool,
    pub table_ok: bool,
}

impl CrcStatus {
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.header_ok && self.table_ok
    }

    /// Fails with `CrcMismatch` naming the first bad checksum.
    pub fn require(&self) -> PartResult<()> {
        match (self.header_ok, self.table_ok) {
            (false, _) => Err(PartError::CrcMismatch("GPT header")),
            (true, false) => Err(PartError::CrcMismatch("GPT table")),
            (true, true) => Ok(()),
        }
    }
}

/// Recomputes both CRCs and compares them with the stored values.
pub fn verify(header: &[u8], table: &[u8]) -> PartResult<CrcStatus> {
    let hdr = parse_header(header)?;
    let header_ok = header_crc_of(header, &hdr) == hdr.header_crc.get();
    let table_ok =
        table_slice(&hdr, table).is_some_and(|t| crc::crc32(t) == hdr.entries_crc.get());
    Ok(CrcStatus {
        header_ok,
        table_ok,
    })
}

/// Which slot an insertion targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// First free slot, scanning from slot 0.
    Auto,
    /// This 0-based slot, which must be free.
    At(u32),
}

impl Slot {
    /// Maps a 1-based partition index (0 or none = unspecified).
    pub fn from_index(index: Option<u32>) -> Self {
        match index {
            Some(i) if i > 0 => Self::At(i - 1),
            _ => Self::Auto,
        }
    }
}

/// Bounds-checked view over a partition-entry array.
#[derive(Debug)]
pub struct EntryTable<B> {
    bytes: B,
    count: u32,
    entry_size: usize,
}

impl<B: AsRef<[u8]>> EntryTable<B> {
    pub fn new(bytes: B, count: u32, entry_size: u32) -> PartResult<Self> {
        let entry_size = entry_size as usize;
        if entry_size < GPT_ENTRY_SIZE {
            return Err(PartError::InvalidArgument(format!(
                "entry size {entry_size} is below {GPT_ENTRY_SIZE}"
            )));
        }
        if bytes.as_ref().len() < count as usize * entry_size {
            return Err(PartError::InvalidArgument(
                "entry table is shorter than the header claims".into(),
            ));
        }
        Ok(Self {
            bytes,
            count,
            entry_size,
        })
    }

    pub fn for_header(bytes: B, hdr: &GptHeader) -> PartResult<Self> {
        Self::new(bytes, hdr.num_entries.get(), hdr.entry_size.get())
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    fn range(&self, slot: u32) -> PartResult<core::ops::Range<usize>> {
        if slot >= self.count {
            return Err(PartError::IndexOutOfRange {
                index: slot + 1,
                max: self.count,
            });
        }
        let off = slot as usize * self.entry_size;
        Ok(off..off + GPT_ENTRY_SIZE)
    }

    /// Entry in 0-based `slot`.
    pub fn entry_at(&self, slot: u32) -> PartResult<&GptEntry> {
        let range = self.range(slot)?;
        GptEntry::ref_from_bytes(&self.bytes.as_ref()[range])
            .map_err(|_| PartError::StructuralViolation("misaligned entry".into()))
    }

    pub fn is_free(&self, slot: u32) -> PartResult<bool> {
        Ok(self.entry_at(slot)?.is_free())
    }

    /// Resolves a slot request to a free 0-based slot.
    pub fn find_free_slot(&self, slot: Slot) -> PartResult<u32> {
        match slot {
            Slot::At(i) => {
                if self.is_free(i)? {
                    Ok(i)
                } else {
                    Err(PartError::SlotInUse(i + 1))
                }
            }
            Slot::Auto => (0..self.count)
                .find(|&i| self.is_free(i).unwrap_or(false))
                .ok_or(PartError::TableFull),
        }
    }

    /// All slots with their 0-based index.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &GptEntry)> + '_ {
        (0..self.count).filter_map(move |i| self.entry_at(i).ok().map(|e| (i, e)))
    }

    /// Slots in use.
    pub fn used(&self) -> impl Iterator<Item = (u32, &GptEntry)> + '_ {
        self.iter().filter(|(_, e)| !e.is_free())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> EntryTable<B> {
    pub fn entry_at_mut(&mut self, slot: u32) -> PartResult<&mut GptEntry> {
        let range = self.range(slot)?;
        GptEntry::mut_from_bytes(&mut self.bytes.as_mut()[range])
            .map_err(|_| PartError::StructuralViolation("misaligned entry".into()))
    }
}
