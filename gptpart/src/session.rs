// SPDX-License-Identifier: MIT

//! Device session: an opened medium, its region map and the dual-write
//! protocol that keeps both GPT copies in step.

use gptio::DEFAULT_SECTOR_SIZE;
use gptio::prelude::*;
use log::{debug, info, warn};

use crate::errors::*;
use crate::gpt::{self, CrcStatus, EntryTable, GPT_ENTRY_SIZE, GPT_PRIMARY_HEADER_LBA, GptHeader};
use crate::map::{Region, RegionId, RegionKind, RegionMap};
use crate::mbr::{self, LegacySlices, MbrKind};

/// Smallest medium we accept: MBR, two headers, two tables and one data sector.
pub const MIN_SECTORS: u64 = 6;

/// Session configuration, set from the global command line flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub readonly: bool,
    pub quiet: bool,
    pub verbose: u8,
    /// Do not parse the MBR at LBA 0.
    pub no_mbr: bool,
    /// Forced sector size (512 otherwise).
    pub sector_size: Option<u64>,
}

impl OpenFlags {
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn verbose(mut self, level: u8) -> Self {
        self.verbose = level;
        self
    }

    pub fn no_mbr(mut self) -> Self {
        self.no_mbr = true;
        self
    }

    pub fn with_sector_size(mut self, sz: u64) -> Self {
        self.sector_size = Some(sz);
        self
    }
}

/// One GPT copy as found on the medium, trusted or not.
#[derive(Debug, Clone)]
pub struct GptProbe {
    pub lba: u64,
    pub header: GptHeader,
    /// The whole header sector.
    pub header_bytes: Vec<u8>,
    /// Table sectors. Empty when the header points outside the medium.
    pub table: Vec<u8>,
    pub crc: CrcStatus,
}

impl GptProbe {
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.crc.is_valid()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Probes {
    pub primary: Option<GptProbe>,
    pub secondary: Option<GptProbe>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Primary,
    Secondary,
}

impl Side {
    pub fn header_kind(self) -> RegionKind {
        match self {
            Self::Primary => RegionKind::PrimaryGptHeader,
            Self::Secondary => RegionKind::SecondaryGptHeader,
        }
    }

    pub fn table_kind(self) -> RegionKind {
        match self {
            Self::Primary => RegionKind::PrimaryGptTable,
            Self::Secondary => RegionKind::SecondaryGptTable,
        }
    }
}

/// Positions of the four GPT regions. Valid until the map is next mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GptRegions {
    pub primary_header: RegionId,
    pub primary_table: RegionId,
    pub secondary_table: RegionId,
    pub secondary_header: RegionId,
}

pub struct Session<IO: BlockIO> {
    name: String,
    io: IO,
    flags: OpenFlags,
    modified: bool,
    sector_size: u64,
    map: RegionMap,
    probes: Probes,
    legacy: Option<LegacySlices>,
}

impl<IO: BlockIO> Session<IO> {
    /// Opens `io` and maps the MBR, both GPT copies and the partitions.
    pub fn open(name: impl Into<String>, mut io: IO, flags: OpenFlags) -> PartResult<Self> {
        let name = name.into();
        let sector_size = flags.sector_size.unwrap_or(DEFAULT_SECTOR_SIZE);
        if sector_size < DEFAULT_SECTOR_SIZE || !sector_size.is_power_of_two() {
            return Err(PartError::InvalidArgument(format!(
                "invalid sector size {sector_size}"
            )));
        }

        let media = io.size()?;
        if media % sector_size != 0 {
            return Err(PartError::InvalidArgument(format!(
                "{name}: media size {media} is not a multiple of sector size {sector_size}"
            )));
        }
        let sectors = media / sector_size;
        if sectors < MIN_SECTORS {
            return Err(PartError::InsufficientSpace("medium is smaller than 6 sectors"));
        }
        debug!("{name}: mediasize={media}; sectorsize={sector_size}; blocks={sectors}");

        let mut session = Self {
            name,
            io,
            flags,
            modified: false,
            sector_size,
            map: RegionMap::new(sectors)?,
            probes: Probes::default(),
            legacy: None,
        };
        session.scan()?;
        Ok(session)
    }

    /// Flushes the medium and hands the backend back.
    pub fn close(mut self) -> PartResult<IO> {
        self.io.flush()?;
        if self.modified {
            debug!("{}: modified", self.name);
        }
        Ok(self.io)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    #[inline]
    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    #[inline]
    pub fn sectors(&self) -> u64 {
        self.map.sectors()
    }

    #[inline]
    pub fn last_lba(&self) -> u64 {
        self.map.last_lba()
    }

    #[inline]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    #[inline]
    pub fn map(&self) -> &RegionMap {
        &self.map
    }

    #[inline]
    pub fn map_mut(&mut self) -> &mut RegionMap {
        &mut self.map
    }

    /// Both GPT copies as read at open time, including corrupt ones.
    #[inline]
    pub fn probes(&self) -> &Probes {
        &self.probes
    }

    /// The MBR found at open time, if any.
    #[inline]
    pub fn legacy(&self) -> Option<&LegacySlices> {
        self.legacy.as_ref()
    }

    /// Reports a completed mutation, `"<dev>p<N>: msg"` or `"<dev>: msg"`.
    pub fn status(&self, index: Option<u32>, msg: &str) {
        if self.flags.quiet {
            return;
        }
        match index {
            Some(i) => info!("{}p{}: {}", self.name, i, msg),
            None => info!("{}: {}", self.name, msg),
        }
    }

    fn scan(&mut self) -> PartResult<()> {
        let last = self.last_lba();
        if !self.flags.no_mbr {
            if let Some(legacy) = mbr::read_mbr(&mut self.io, self.sector_size, last)? {
                self.map_legacy(&legacy)?;
                self.legacy = Some(legacy);
            }
        }

        let primary = self.probe_gpt(GPT_PRIMARY_HEADER_LBA)?;
        let secondary = self.probe_gpt(last)?;

        let mut source = None;
        if let Some(probe) = primary.as_ref().filter(|p| p.is_valid()) {
            self.map_copy(probe, Side::Primary)?;
            source = Some(probe);
        }
        if let Some(probe) = secondary.as_ref().filter(|p| p.is_valid()) {
            self.map_copy(probe, Side::Secondary)?;
            if source.is_none() {
                warn!("{}: using the secondary GPT", self.name);
                source = Some(probe);
            }
        }
        if let Some(probe) = source {
            self.map_partitions(probe)?;
        }

        self.probes = Probes { primary, secondary };
        self.map.check()
    }

    fn map_legacy(&mut self, legacy: &LegacySlices) -> PartResult<()> {
        let kind = match legacy.kind {
            MbrKind::Protective => RegionKind::ProtectiveMbr,
            MbrKind::Legacy => RegionKind::LegacyMbr,
        };
        let sector = self.io.read_sectors(0, 1, self.sector_size)?;
        self.map.add(0, 1, kind, sector)?;

        for &lba in &legacy.extended {
            let sector = self.io.read_sectors(lba, 1, self.sector_size)?;
            self.map.add(lba, 1, RegionKind::LegacyMbr, sector)?;
        }
        for slice in &legacy.slices {
            let id = self
                .map
                .add(slice.start, slice.size, RegionKind::MbrPartition, Vec::new())?;
            self.region_mut(id)?.index = slice.index;
        }
        Ok(())
    }

    fn probe_gpt(&mut self, lba: u64) -> PartResult<Option<GptProbe>> {
        let header_bytes = self.io.read_sectors(lba, 1, self.sector_size)?;
        let header = match gpt::parse_header(&header_bytes) {
            Ok(hdr) => hdr,
            Err(PartError::InvalidSignature) => {
                debug!("{}: no GPT header at sector {lba}", self.name);
                return Ok(None);
            }
            Err(PartError::TooSmall) => {
                warn!("{}: bad GPT header size at sector {lba}", self.name);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let header_ok = gpt::header_crc_ok(&header_bytes);
        if !header_ok {
            warn!("{}: bad CRC in GPT header at sector {lba}", self.name);
        }

        let table = self.read_table(&header)?;
        let table_ok = !table.is_empty() && gpt::verify(&header_bytes, &table)?.table_ok;
        if !table.is_empty() && !table_ok {
            warn!(
                "{}: bad CRC in GPT table at sector {}",
                self.name,
                header.entries_lba.get()
            );
        }
        debug!(
            "{}: GPT header at sector {lba}, table at sector {}",
            self.name,
            header.entries_lba.get()
        );

        Ok(Some(GptProbe {
            lba,
            header,
            header_bytes,
            table,
            crc: CrcStatus {
                header_ok,
                table_ok,
            },
        }))
    }

    fn read_table(&mut self, hdr: &GptHeader) -> PartResult<Vec<u8>> {
        let lba = hdr.entries_lba.get();
        let count = hdr.table_sectors(self.sector_size);
        let fits = hdr.num_entries.get() > 0
            && hdr.entry_size.get() as usize >= GPT_ENTRY_SIZE
            && lba > 0
            && lba
                .checked_add(count)
                .is_some_and(|end| end <= self.sectors());
        if !fits {
            warn!(
                "{}: GPT table at sector {lba} does not fit the medium",
                self.name
            );
            return Ok(Vec::new());
        }
        Ok(self.io.read_sectors(lba, count, self.sector_size)?)
    }

    fn map_copy(&mut self, probe: &GptProbe, side: Side) -> PartResult<()> {
        let sectors = probe.table.len() as u64 / self.sector_size;
        self.map
            .add(probe.lba, 1, side.header_kind(), probe.header_bytes.clone())?;
        self.map.add(
            probe.header.entries_lba.get(),
            sectors,
            side.table_kind(),
            probe.table.clone(),
        )?;
        Ok(())
    }

    fn map_partitions(&mut self, probe: &GptProbe) -> PartResult<()> {
        let table = EntryTable::for_header(&probe.table[..], &probe.header)?;
        for (slot, entry) in table.used() {
            let (start, end) = (entry.start_lba.get(), entry.end_lba.get());
            if end < start {
                return Err(PartError::StructuralViolation(format!(
                    "partition {} ends before it starts",
                    slot + 1
                )));
            }
            let id = self
                .map
                .add(start, end - start + 1, RegionKind::GptPartition, Vec::new())?;
            self.region_mut(id)?.index = slot + 1;
        }
        Ok(())
    }

    pub(crate) fn region_mut(&mut self, id: RegionId) -> PartResult<&mut Region> {
        self.map
            .get_mut(id)
            .ok_or_else(|| PartError::StructuralViolation(format!("no region #{id}")))
    }

    fn region(&self, id: RegionId) -> PartResult<&Region> {
        self.map
            .get(id)
            .ok_or_else(|| PartError::StructuralViolation(format!("no region #{id}")))
    }

    /// Parsed header held by region `id`.
    pub fn header_at(&self, id: RegionId) -> PartResult<GptHeader> {
        gpt::parse_header(self.region(id)?.data())
    }

    /// The primary header, required by every entry operation.
    pub fn primary_header(&self) -> PartResult<GptHeader> {
        let id = self.map.find(RegionKind::PrimaryGptHeader).ok_or(PartError::NotFound(
            "no primary GPT header; run create or recover",
        ))?;
        self.header_at(id)
    }

    /// Header and table of one copy.
    pub fn side_regions(&self, side: Side) -> PartResult<(RegionId, RegionId)> {
        let header = self.map.find(side.header_kind()).ok_or(match side {
            Side::Primary => PartError::NotFound("no primary GPT header; run create or recover"),
            Side::Secondary => PartError::NotFound("no secondary GPT header; run recover"),
        })?;
        let table = self.map.find(side.table_kind()).ok_or(PartError::NotFound(
            "no GPT table; run recover",
        ))?;
        Ok((header, table))
    }

    /// All four GPT regions, or guidance on what to run first.
    pub fn gpt_regions(&self) -> PartResult<GptRegions> {
        let (primary_header, primary_table) = self.side_regions(Side::Primary)?;
        let (secondary_header, secondary_table) = self.side_regions(Side::Secondary)?;
        Ok(GptRegions {
            primary_header,
            primary_table,
            secondary_table,
            secondary_header,
        })
    }

    /// Read-only view of one copy's entry table.
    pub fn table(&self, side: Side) -> PartResult<EntryTable<&[u8]>> {
        let (hdr, tbl) = self.side_regions(side)?;
        let header = self.header_at(hdr)?;
        EntryTable::for_header(self.region(tbl)?.data(), &header)
    }

    /// The table partitions were mapped from: primary, else secondary.
    pub fn active_table(&self) -> PartResult<EntryTable<&[u8]>> {
        self.table(Side::Primary)
            .or_else(|_| self.table(Side::Secondary))
    }

    fn check_writable(&self) -> PartResult<()> {
        if self.flags.readonly {
            return Err(BlockIOError::ReadOnly.into());
        }
        Ok(())
    }

    pub fn read_sectors(&mut self, lba: u64, count: u64) -> PartResult<Vec<u8>> {
        Ok(self.io.read_sectors(lba, count, self.sector_size)?)
    }

    pub(crate) fn io_mut(&mut self) -> &mut IO {
        &mut self.io
    }

    pub fn write_sectors(&mut self, lba: u64, data: &[u8]) -> PartResult<()> {
        self.check_writable()?;
        self.io.write_at_lba(lba, self.sector_size, data)?;
        self.modified = true;
        Ok(())
    }

    pub fn zero_sectors(&mut self, lba: u64, count: u64) -> PartResult<()> {
        self.check_writable()?;
        let offset = lba
            .checked_mul(self.sector_size)
            .ok_or(BlockIOError::Invalid("zero_sectors: offset overflow"))?;
        let len = count
            .checked_mul(self.sector_size)
            .and_then(|l| usize::try_from(l).ok())
            .ok_or(BlockIOError::Invalid("zero_sectors: length overflow"))?;
        self.io.zero_fill(offset, len)?;
        self.modified = true;
        Ok(())
    }

    /// Writes the in-memory buffer of region `id` at its start.
    pub fn write_region(&mut self, id: RegionId) -> PartResult<()> {
        self.check_writable()?;
        let region = self
            .map
            .get(id)
            .ok_or_else(|| PartError::StructuralViolation(format!("no region #{id}")))?;
        self.io
            .write_at_lba(region.start, self.sector_size, region.data())?;
        self.modified = true;
        Ok(())
    }

    /// Recomputes both CRCs of the header in `hdr` over the table in `tbl`.
    pub fn refresh_crcs(&mut self, hdr: RegionId, tbl: RegionId) -> PartResult<()> {
        let mut header = self.region_mut(hdr)?.take_data();
        let outcome = match self.map.get(tbl) {
            Some(table) => gpt::recompute_crcs(&mut header, table.data()),
            None => Err(PartError::StructuralViolation(format!("no region #{tbl}"))),
        };
        self.region_mut(hdr)?.set_data(header);
        outcome
    }

    /// Refreshes the CRCs of one copy and writes it. The primary goes
    /// header then table, the secondary table then header.
    pub fn commit_side(&mut self, side: Side) -> PartResult<()> {
        let (hdr, tbl) = self.side_regions(side)?;
        self.refresh_crcs(hdr, tbl)?;
        match side {
            Side::Primary => {
                self.write_region(hdr)?;
                self.write_region(tbl)
            }
            Side::Secondary => {
                self.write_region(tbl)?;
                self.write_region(hdr)
            }
        }
    }

    /// Applies `mutate` to the primary table, commits the primary copy, then
    /// applies it again to the secondary table and commits that copy.
    ///
    /// `mutate` must be deterministic: it runs once per copy. An error from
    /// the primary run leaves the medium untouched.
    pub fn update_tables<R, F>(&mut self, mut mutate: F) -> PartResult<R>
    where
        F: FnMut(&mut EntryTable<&mut [u8]>) -> PartResult<R>,
    {
        self.check_writable()?;
        let ids = self.gpt_regions()?;

        let result = self.mutate_table(ids.primary_header, ids.primary_table, &mut mutate)?;
        self.write_region(ids.primary_header)?;
        self.write_region(ids.primary_table)?;

        self.mutate_table(ids.secondary_header, ids.secondary_table, &mut mutate)?;
        self.write_region(ids.secondary_table)?;
        self.write_region(ids.secondary_header)?;
        Ok(result)
    }

    fn mutate_table<R, F>(&mut self, hdr: RegionId, tbl: RegionId, mutate: &mut F) -> PartResult<R>
    where
        F: FnMut(&mut EntryTable<&mut [u8]>) -> PartResult<R>,
    {
        let header = self.header_at(hdr)?;
        let mut table = self.region_mut(tbl)?.take_data();
        let outcome =
            EntryTable::for_header(&mut table[..], &header).and_then(|mut view| mutate(&mut view));
        self.region_mut(tbl)?.set_data(table);
        let result = outcome?;
        self.refresh_crcs(hdr, tbl)?;
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ops::create::{CreateOptions, create};
    use crate::types::GPT_ENT_TYPE_EFI;

    pub(crate) const MIB: u64 = 1024 * 1024;

    pub(crate) fn blank(bytes: u64) -> Session<MemBlockIO> {
        Session::open("md0", MemBlockIO::zeroed(bytes as usize), OpenFlags::default()).unwrap()
    }

    /// A fresh image with a GPT, reopened from its bytes.
    pub(crate) fn with_gpt(bytes: u64) -> Session<MemBlockIO> {
        let mut s = blank(bytes);
        create(&mut s, &CreateOptions::default()).unwrap();
        reopen(s)
    }

    pub(crate) fn reopen(s: Session<MemBlockIO>) -> Session<MemBlockIO> {
        let flags = s.flags();
        let io = s.close().unwrap();
        Session::open("md0", io, flags).unwrap()
    }

    #[test]
    fn test_open_blank() {
        let s = blank(MIB);
        assert_eq!(s.sectors(), 2048);
        assert_eq!(s.map().len(), 1);
        assert!(s.probes().primary.is_none());
        assert!(s.legacy().is_none());
        assert!(matches!(
            s.primary_header(),
            Err(PartError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_rejects_bad_media() {
        let too_small = Session::open("md0", MemBlockIO::zeroed(5 * 512), OpenFlags::default());
        assert!(matches!(too_small, Err(PartError::InsufficientSpace(_))));

        let ragged = Session::open("md0", MemBlockIO::zeroed(4097), OpenFlags::default());
        assert!(matches!(ragged, Err(PartError::InvalidArgument(_))));

        let odd = Session::open(
            "md0",
            MemBlockIO::zeroed(8192),
            OpenFlags::default().with_sector_size(1000),
        );
        assert!(matches!(odd, Err(PartError::InvalidArgument(_))));
    }

    #[test]
    fn test_open_maps_gpt() {
        let s = with_gpt(4 * MIB);
        let map = s.map();
        assert_eq!(map.first().kind, RegionKind::ProtectiveMbr);
        assert_eq!(map.last().kind, RegionKind::SecondaryGptHeader);
        assert!(s.gpt_regions().is_ok());
        assert!(s.probes().primary.as_ref().unwrap().is_valid());
        assert!(s.probes().secondary.as_ref().unwrap().is_valid());
        map.check().unwrap();
    }

    #[test]
    fn test_open_falls_back_to_secondary() {
        let mut s = with_gpt(4 * MIB);
        s.update_tables(|t| {
            t.entry_at_mut(0)?.set_type(&GPT_ENT_TYPE_EFI);
            let e = t.entry_at_mut(0)?;
            e.start_lba.set(100);
            e.end_lba.set(199);
            Ok(())
        })
        .unwrap();
        let mut io = s.close().unwrap();
        // corrupt the primary header CRC
        io.as_mut_slice()[512 + 16] ^= 0xFF;

        let s = Session::open("md0", io, OpenFlags::default()).unwrap();
        assert!(s.map().find(RegionKind::PrimaryGptHeader).is_none());
        let p = s.probes().primary.as_ref().unwrap();
        assert!(!p.crc.header_ok && p.crc.table_ok);
        let part = s.map().find_index(RegionKind::GptPartition, 1).unwrap();
        assert_eq!(s.map().get(part).unwrap().start, 100);
    }

    #[test]
    fn test_update_tables_keeps_copies_identical() {
        let mut s = with_gpt(4 * MIB);
        s.update_tables(|t| {
            t.entry_at_mut(3)?.set_label("data");
            Ok(())
        })
        .unwrap();
        let ids = s.gpt_regions().unwrap();
        assert_eq!(
            s.map().get(ids.primary_table).unwrap().data(),
            s.map().get(ids.secondary_table).unwrap().data()
        );

        let s = reopen(s);
        assert_eq!(s.table(Side::Secondary).unwrap().entry_at(3).unwrap().label(), "data");
        assert!(s.probes().secondary.as_ref().unwrap().is_valid());
    }

    #[test]
    fn test_update_tables_error_writes_nothing() {
        let mut s = with_gpt(4 * MIB);
        let before = s.io.as_slice().to_vec();
        let err = s.update_tables(|t| t.entry_at_mut(500).map(|_| ()));
        assert!(matches!(err, Err(PartError::IndexOutOfRange { .. })));
        assert_eq!(s.io.as_slice(), &before[..]);
        assert!(!s.is_modified());
    }

    #[test]
    fn test_readonly_session_refuses_writes() {
        let s = with_gpt(4 * MIB);
        let io = s.close().unwrap();
        let mut s = Session::open("md0", io, OpenFlags::default().readonly()).unwrap();
        let err = s.update_tables(|_| Ok(()));
        assert!(matches!(err, Err(PartError::Io(BlockIOError::ReadOnly))));
        assert!(s.zero_sectors(0, 1).is_err());
    }

    #[test]
    fn test_legacy_mbr_is_mapped() {
        let mut io = MemBlockIO::zeroed((4 * MIB) as usize);
        let mut m = mbr::Mbr::new_protective(100);
        m.records[0].part_type = 0x83;
        m.records[0].start_lba.set(2048);
        m.records[0].sectors.set(1024);
        io.write_at(0, &m.to_sector(512)).unwrap();

        let s = Session::open("md0", io, OpenFlags::default()).unwrap();
        assert_eq!(s.map().first().kind, RegionKind::LegacyMbr);
        let id = s.map().find(RegionKind::MbrPartition).unwrap();
        let r = s.map().get(id).unwrap();
        assert_eq!((r.start, r.size, r.index), (2048, 1024, 1));

        let io = s.close().unwrap();
        let s = Session::open("md0", io, OpenFlags::default().no_mbr()).unwrap();
        assert_eq!(s.map().len(), 1);
    }
}
