// SPDX-License-Identifier: MIT

//! Region map: an ordered, gap-free list of extents covering the whole medium.
//!
//! Every sector of the medium belongs to exactly one region. Regions are
//! addressed by their position (`RegionId`); positions shift when a region is
//! split or merged, so ids must not be kept across a mutating call.

use log::debug;

use crate::errors::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    Unused,
    LegacyMbr,
    ProtectiveMbr,
    MbrPartition,
    PrimaryGptHeader,
    SecondaryGptHeader,
    PrimaryGptTable,
    SecondaryGptTable,
    GptPartition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub start: u64,
    pub size: u64,
    pub kind: RegionKind,
    /// 1-based partition (or MBR slot) number, 0 when not numbered.
    pub index: u32,
    data: Vec<u8>,
}

impl Region {
    fn new(start: u64, size: u64, kind: RegionKind, data: Vec<u8>) -> Self {
        Self {
            start,
            size,
            kind,
            index: 0,
            data,
        }
    }

    fn unused(start: u64, size: u64) -> Self {
        Self::new(start, size, RegionKind::Unused, Vec::new())
    }

    /// Last LBA of the region (inclusive).
    #[inline]
    pub fn end(&self) -> u64 {
        self.start + self.size - 1
    }

    #[inline]
    fn end_exclusive(&self) -> u64 {
        self.start + self.size
    }

    #[inline]
    pub fn is_unused(&self) -> bool {
        self.kind == RegionKind::Unused
    }

    /// In-memory copy of the on-disk bytes (empty for unused and partition regions).
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    #[inline]
    pub fn take_data(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.data)
    }
}

/// Position of a region inside the map.
pub type RegionId = usize;

#[derive(Debug, Clone)]
pub struct RegionMap {
    regions: Vec<Region>,
}

#[inline]
fn round_up(v: u64, align: u64) -> u64 {
    if align == 0 || v % align == 0 {
        v
    } else {
        (v / align + 1) * align
    }
}

#[inline]
fn round_down(v: u64, align: u64) -> u64 {
    if align == 0 { v } else { v / align * align }
}

impl RegionMap {
    /// A map of `sectors` sectors, entirely unused.
    pub fn new(sectors: u64) -> PartResult<Self> {
        if sectors == 0 {
            return Err(PartError::StructuralViolation(
                "medium has no sectors".into(),
            ));
        }
        Ok(Self {
            regions: vec![Region::unused(0, sectors)],
        })
    }

    /// Total number of sectors covered.
    #[inline]
    pub fn sectors(&self) -> u64 {
        self.last().end_exclusive()
    }

    #[inline]
    pub fn last_lba(&self) -> u64 {
        self.last().end()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    #[inline]
    pub fn first(&self) -> &Region {
        &self.regions[0]
    }

    #[inline]
    pub fn last(&self) -> &Region {
        &self.regions[self.regions.len() - 1]
    }

    #[inline]
    pub fn next(&self, id: RegionId) -> Option<RegionId> {
        (id + 1 < self.regions.len()).then_some(id + 1)
    }

    #[inline]
    pub fn get(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.get_mut(id)
    }

    /// First region of `kind`.
    pub fn find(&self, kind: RegionKind) -> Option<RegionId> {
        self.regions.iter().position(|r| r.kind == kind)
    }

    /// Region of `kind` numbered `index`. Index 0 never matches.
    pub fn find_index(&self, kind: RegionKind, index: u32) -> Option<RegionId> {
        if index == 0 {
            return None;
        }
        self.regions
            .iter()
            .position(|r| r.kind == kind && r.index == index)
    }

    /// Region containing `lba`.
    pub fn locate(&self, lba: u64) -> Option<RegionId> {
        let pos = self.regions.partition_point(|r| r.end_exclusive() <= lba);
        (pos < self.regions.len()).then_some(pos)
    }

    /// Free sectors from `start` to the end of the unused run holding it,
    /// capped at `max`. Zero when `start` is not in an unused region.
    pub fn free_run(&self, start: u64, max: Option<u64>) -> u64 {
        let Some(region) = self.locate(start).map(|id| &self.regions[id]) else {
            return 0;
        };
        if !region.is_unused() {
            return 0;
        }
        let avail = region.end_exclusive() - start;
        max.map_or(avail, |m| avail.min(m))
    }

    /// Inserts a region at an exact, currently unused location.
    ///
    /// A GPT partition may be laid over an MBR partition (hybrid layouts).
    pub fn add(
        &mut self,
        start: u64,
        size: u64,
        kind: RegionKind,
        data: Vec<u8>,
    ) -> PartResult<RegionId> {
        if size == 0 {
            return Err(PartError::StructuralViolation(format!(
                "zero-sized region at {start}"
            )));
        }
        let end = start.checked_add(size).ok_or_else(|| {
            PartError::StructuralViolation(format!("region {start}+{size} overflows"))
        })?;
        let pos = self.locate(start).ok_or_else(|| {
            PartError::StructuralViolation(format!("region {start}+{size} is past the medium"))
        })?;

        let host = &self.regions[pos];
        if host.end_exclusive() < end {
            return Err(PartError::StructuralViolation(format!(
                "region {start}+{size} crosses the region at {}",
                host.end_exclusive()
            )));
        }
        if !host.is_unused() {
            let mirrors = host.kind == RegionKind::MbrPartition
                && kind == RegionKind::GptPartition
                && host.start == start
                && host.size == size;
            if !mirrors {
                return Err(PartError::StructuralViolation(format!(
                    "region {start}+{size} overlaps {:?} at {}",
                    host.kind, host.start
                )));
            }
            debug!("GPT partition {start}+{size} mirrors an MBR partition");
        }

        if host.start == start && host.size == size {
            let region = &mut self.regions[pos];
            region.kind = kind;
            region.index = 0;
            region.data = data;
            return Ok(pos);
        }

        let (host_start, host_end) = (host.start, host.end_exclusive());
        let mut pieces = Vec::with_capacity(3);
        if start > host_start {
            pieces.push(Region::unused(host_start, start - host_start));
        }
        let id = pos + pieces.len();
        pieces.push(Region::new(start, size, kind, data));
        if host_end > end {
            pieces.push(Region::unused(end, host_end - end));
        }
        self.regions.splice(pos..=pos, pieces);
        Ok(id)
    }

    /// Places a new GPT partition region.
    ///
    /// With `alignment > 0` the start and the size are rounded up to it. A
    /// `size` of 0 takes the whole run found.
    pub fn alloc(&mut self, start: Option<u64>, size: u64, alignment: u64) -> PartResult<RegionId> {
        let start = round_up(start.unwrap_or(0), alignment);
        let size = round_up(size, alignment);

        let mut found = None;
        for region in self.regions.iter() {
            if !region.is_unused() || region.start < 2 {
                continue;
            }
            if start != 0 && region.start > start {
                break;
            }

            let delta = if start != 0 {
                start - region.start
            } else {
                round_up(region.start, alignment) - region.start
            };
            let Some(avail) = region.size.checked_sub(delta) else {
                continue;
            };
            if avail == 0 || (size != 0 && avail < size) || avail < alignment {
                continue;
            }

            let take = if size == 0 {
                round_down(avail, alignment)
            } else {
                size
            };
            found = Some((region.start + delta, take));
            break;
        }

        let (at, len) = found.ok_or(PartError::InsufficientSpace(
            "no free space for the requested partition",
        ))?;
        self.add(at, len, RegionKind::GptPartition, Vec::new())
    }

    /// Grows or shrinks `id` using only the following unused region.
    ///
    /// A `size` of 0 grows the region to fill its neighbour. Returns the new size.
    pub fn resize(&mut self, id: RegionId, size: u64, alignment: u64) -> PartResult<u64> {
        let current = self
            .regions
            .get(id)
            .map(|r| r.size)
            .ok_or_else(|| PartError::StructuralViolation(format!("no region #{id}")))?;
        let neighbour = self
            .regions
            .get(id + 1)
            .filter(|r| r.is_unused())
            .map(|r| r.size);

        let target = if size == 0 {
            let free = neighbour.ok_or(PartError::InsufficientSpace(
                "no free space after the partition",
            ))?;
            let target = round_down(current + free, alignment);
            if target <= current {
                return Err(PartError::InsufficientSpace(
                    "alignment leaves no room to grow",
                ));
            }
            target
        } else {
            round_up(size, alignment)
        };

        if target > current {
            let grow = target - current;
            if neighbour.is_none_or(|free| free < grow) {
                return Err(PartError::InsufficientSpace(
                    "not enough free space after the partition",
                ));
            }
            let next = &mut self.regions[id + 1];
            next.start += grow;
            next.size -= grow;
            if next.size == 0 {
                self.regions.remove(id + 1);
            }
            self.regions[id].size = target;
        } else if target < current {
            let freed = current - target;
            self.regions[id].size = target;
            match self.regions.get_mut(id + 1).filter(|r| r.is_unused()) {
                Some(next) => {
                    next.start -= freed;
                    next.size += freed;
                }
                None => {
                    let start = self.regions[id].end_exclusive();
                    self.regions.insert(id + 1, Region::unused(start, freed));
                }
            }
        }
        Ok(target)
    }

    /// Turns `id` back into unused space, merging it with unused neighbours.
    /// Returns the id of the resulting unused region.
    pub fn release(&mut self, id: RegionId) -> PartResult<RegionId> {
        let region = self
            .regions
            .get_mut(id)
            .ok_or_else(|| PartError::StructuralViolation(format!("no region #{id}")))?;
        region.kind = RegionKind::Unused;
        region.index = 0;
        region.data = Vec::new();

        let mut id = id;
        if self.regions.get(id + 1).is_some_and(|r| r.is_unused()) {
            let next = self.regions.remove(id + 1);
            self.regions[id].size += next.size;
        }
        if id > 0 && self.regions[id - 1].is_unused() {
            let cur = self.regions.remove(id);
            id -= 1;
            self.regions[id].size += cur.size;
        }
        Ok(id)
    }

    /// Verifies coverage and contiguity of the map.
    pub fn check(&self) -> PartResult<()> {
        let mut expected = 0u64;
        for r in &self.regions {
            if r.size == 0 {
                return Err(PartError::StructuralViolation(format!(
                    "empty region at {}",
                    r.start
                )));
            }
            if r.start != expected {
                return Err(PartError::StructuralViolation(format!(
                    "region at {} should start at {expected}",
                    r.start
                )));
            }
            expected = r.end_exclusive();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic xorshift for the invariant test.
    struct Rng(u64);

    impl Rng {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 7;
            self.0 ^= self.0 << 17;
            self.0
        }

        fn below(&mut self, n: u64) -> u64 {
            self.next() % n.max(1)
        }
    }

    fn kinds(map: &RegionMap) -> Vec<(u64, u64, RegionKind)> {
        map.iter().map(|r| (r.start, r.size, r.kind)).collect()
    }

    #[test]
    fn test_new_covers_medium() {
        let map = RegionMap::new(1000).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.last_lba(), 999);
        assert!(map.first().is_unused());
        assert!(RegionMap::new(0).is_err());
        map.check().unwrap();
    }

    #[test]
    fn test_add_splits_into_three() {
        let mut map = RegionMap::new(100).unwrap();
        let id = map
            .add(10, 5, RegionKind::PrimaryGptTable, vec![1; 4])
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(
            kinds(&map),
            vec![
                (0, 10, RegionKind::Unused),
                (10, 5, RegionKind::PrimaryGptTable),
                (15, 85, RegionKind::Unused)
            ]
        );
        assert_eq!(map.get(id).unwrap().data(), &[1; 4]);
        map.check().unwrap();
    }

    #[test]
    fn test_add_at_edges() {
        let mut map = RegionMap::new(100).unwrap();
        assert_eq!(map.add(0, 1, RegionKind::ProtectiveMbr, vec![]).unwrap(), 0);
        assert_eq!(map.add(99, 1, RegionKind::SecondaryGptHeader, vec![]).unwrap(), 2);
        assert_eq!(map.len(), 3);
        map.check().unwrap();
    }

    #[test]
    fn test_add_rejects_overlap() {
        let mut map = RegionMap::new(100).unwrap();
        map.add(10, 10, RegionKind::GptPartition, vec![]).unwrap();
        assert!(matches!(
            map.add(15, 10, RegionKind::GptPartition, vec![]),
            Err(PartError::StructuralViolation(_))
        ));
        assert!(map.add(5, 10, RegionKind::GptPartition, vec![]).is_err());
        assert!(map.add(95, 10, RegionKind::GptPartition, vec![]).is_err());
        assert!(map.add(200, 1, RegionKind::GptPartition, vec![]).is_err());
        assert!(map.add(30, 0, RegionKind::GptPartition, vec![]).is_err());
        map.check().unwrap();
    }

    #[test]
    fn test_gpt_part_over_mbr_part() {
        let mut map = RegionMap::new(100).unwrap();
        let id = map.add(10, 20, RegionKind::MbrPartition, vec![]).unwrap();
        map.get_mut(id).unwrap().index = 1;
        assert!(map.add(10, 5, RegionKind::GptPartition, vec![]).is_err());

        let id = map.add(10, 20, RegionKind::GptPartition, vec![]).unwrap();
        assert_eq!(map.get(id).unwrap().kind, RegionKind::GptPartition);
        assert_eq!(map.get(id).unwrap().index, 0);
        assert!(map.add(10, 20, RegionKind::PrimaryGptTable, vec![]).is_err());
    }

    #[test]
    fn test_find_and_traverse() {
        let mut map = RegionMap::new(100).unwrap();
        let id = map.add(40, 10, RegionKind::GptPartition, vec![]).unwrap();
        map.get_mut(id).unwrap().index = 3;

        assert_eq!(map.find(RegionKind::GptPartition), Some(1));
        assert_eq!(map.find_index(RegionKind::GptPartition, 3), Some(1));
        assert_eq!(map.find_index(RegionKind::GptPartition, 0), None);
        assert_eq!(map.find(RegionKind::PrimaryGptHeader), None);
        assert_eq!(map.next(1), Some(2));
        assert_eq!(map.next(2), None);
        assert_eq!(map.locate(49), Some(1));
        assert_eq!(map.locate(100), None);
    }

    #[test]
    fn test_free_run() {
        let mut map = RegionMap::new(100).unwrap();
        map.add(0, 1, RegionKind::ProtectiveMbr, vec![]).unwrap();
        map.add(60, 10, RegionKind::GptPartition, vec![]).unwrap();

        assert_eq!(map.free_run(0, Some(1)), 0);
        assert_eq!(map.free_run(1, None), 59);
        assert_eq!(map.free_run(10, None), 50);
        assert_eq!(map.free_run(1, Some(8)), 8);
        assert_eq!(map.free_run(65, None), 0);
        assert_eq!(map.free_run(70, None), 30);
        assert_eq!(map.free_run(500, None), 0);
    }

    #[test]
    fn test_alloc_first_fit_with_alignment() {
        let mut map = RegionMap::new(10_000).unwrap();
        map.add(0, 34, RegionKind::PrimaryGptTable, vec![]).unwrap();

        let id = map.alloc(None, 100, 64).unwrap();
        let r = map.get(id).unwrap();
        assert_eq!((r.start, r.size), (64, 128));

        let id = map.alloc(None, 10, 0).unwrap();
        assert_eq!(map.get(id).unwrap().start, 34);
        map.check().unwrap();
    }

    #[test]
    fn test_alloc_explicit_start() {
        let mut map = RegionMap::new(1000).unwrap();
        map.add(0, 2, RegionKind::PrimaryGptHeader, vec![]).unwrap();

        let id = map.alloc(Some(500), 100, 0).unwrap();
        assert_eq!(map.get(id).unwrap().start, 500);
        // occupied
        assert!(matches!(
            map.alloc(Some(550), 10, 0),
            Err(PartError::InsufficientSpace(_))
        ));
        // too large for the run holding the start
        assert!(map.alloc(Some(450), 100, 0).is_err());
        assert!(map.alloc(Some(450), 50, 0).is_ok());
    }

    #[test]
    fn test_alloc_whole_run() {
        let mut map = RegionMap::new(1000).unwrap();
        map.add(0, 34, RegionKind::PrimaryGptTable, vec![]).unwrap();
        map.add(967, 33, RegionKind::SecondaryGptTable, vec![]).unwrap();

        let id = map.alloc(None, 0, 0).unwrap();
        let r = map.get(id).unwrap();
        assert_eq!((r.start, r.size), (34, 933));
        assert!(map.alloc(None, 0, 0).is_err());
    }

    #[test]
    fn test_alloc_skips_low_regions() {
        let mut map = RegionMap::new(100).unwrap();
        assert!(map.alloc(None, 5, 0).is_err());

        map.add(0, 2, RegionKind::PrimaryGptHeader, vec![]).unwrap();
        let id = map.alloc(None, 5, 0).unwrap();
        assert_eq!(map.get(id).unwrap().start, 2);
    }

    #[test]
    fn test_resize_grow_and_shrink() {
        let mut map = RegionMap::new(1000).unwrap();
        map.add(0, 10, RegionKind::PrimaryGptTable, vec![]).unwrap();
        let id = map.alloc(Some(10), 100, 0).unwrap();

        assert_eq!(map.resize(id, 200, 0).unwrap(), 200);
        assert_eq!(map.get(id + 1).unwrap().start, 210);

        assert_eq!(map.resize(id, 50, 0).unwrap(), 50);
        assert_eq!(map.get(id + 1).unwrap().start, 60);
        assert_eq!(map.get(id + 1).unwrap().size, 940);

        assert_eq!(map.resize(id, 0, 0).unwrap(), 990);
        assert_eq!(map.len(), 2);
        map.check().unwrap();
    }

    #[test]
    fn test_resize_shrink_before_used_neighbour() {
        let mut map = RegionMap::new(1000).unwrap();
        map.add(0, 10, RegionKind::PrimaryGptTable, vec![]).unwrap();
        let a = map.alloc(Some(10), 100, 0).unwrap();
        map.alloc(Some(110), 100, 0).unwrap();
        map.add(210, 790, RegionKind::SecondaryGptTable, vec![]).unwrap();

        assert_eq!(map.resize(a, 60, 0).unwrap(), 60);
        let gap = map.get(a + 1).unwrap();
        assert!(gap.is_unused());
        assert_eq!((gap.start, gap.size), (70, 40));
        // never borrows from the preceding region
        assert!(matches!(
            map.resize(a + 2, 150, 0),
            Err(PartError::InsufficientSpace(_))
        ));
        map.check().unwrap();
    }

    #[test]
    fn test_resize_failure_leaves_map_unchanged() {
        let mut map = RegionMap::new(1000).unwrap();
        map.add(0, 10, RegionKind::PrimaryGptTable, vec![]).unwrap();
        let id = map.alloc(Some(10), 100, 0).unwrap();
        map.add(900, 100, RegionKind::SecondaryGptTable, vec![]).unwrap();

        let before = kinds(&map);
        assert!(map.resize(id, 5000, 0).is_err());
        assert_eq!(kinds(&map), before);
    }

    #[test]
    fn test_resize_alignment() {
        let mut map = RegionMap::new(1000).unwrap();
        map.add(0, 10, RegionKind::PrimaryGptTable, vec![]).unwrap();
        let id = map.alloc(Some(10), 100, 0).unwrap();

        assert_eq!(map.resize(id, 130, 64).unwrap(), 192);
        assert_eq!(map.resize(id, 0, 64).unwrap(), 960);
        assert!(map.resize(id, 0, 64).is_err());
    }

    #[test]
    fn test_release_coalesces() {
        let mut map = RegionMap::new(100).unwrap();
        let a = map.add(10, 10, RegionKind::GptPartition, vec![]).unwrap();
        map.add(20, 10, RegionKind::GptPartition, vec![]).unwrap();

        let id = map.release(a).unwrap();
        assert_eq!(id, 0);
        assert_eq!(map.get(0).unwrap().size, 20);
        let id = map.release(1).unwrap();
        assert_eq!(id, 0);
        assert_eq!(map.len(), 1);
        map.check().unwrap();
    }

    #[test]
    fn test_random_sequences_keep_invariant() {
        let mut rng = Rng(0x9E37_79B9_7F4A_7C15);
        for _ in 0..50 {
            let sectors = 64 + rng.below(4096);
            let mut map = RegionMap::new(sectors).unwrap();

            for _ in 0..200 {
                match rng.below(4) {
                    0 => {
                        let start = rng.below(sectors);
                        let size = 1 + rng.below(64);
                        let _ = map.add(start, size, RegionKind::GptPartition, Vec::new());
                    }
                    1 => {
                        let start = (rng.below(2) == 0).then(|| rng.below(sectors));
                        let _ = map.alloc(start, rng.below(128), rng.below(3) * 8);
                    }
                    2 => {
                        let id = rng.below(map.len() as u64) as usize;
                        if !map.get(id).unwrap().is_unused() {
                            let _ = map.resize(id, rng.below(256), rng.below(2) * 4);
                        }
                    }
                    _ => {
                        let id = rng.below(map.len() as u64) as usize;
                        let _ = map.release(id);
                    }
                }
                map.check().unwrap();
                assert_eq!(map.sectors(), sectors);
                assert_eq!(map.last_lba(), sectors - 1);
            }
        }
    }
}
