// SPDX-License-Identifier: MIT

use core::fmt;

use gptio::prelude::*;
use uuid::Uuid;

use crate::errors::*;
use crate::gpt::{EntryTable, GptAttributes};
use crate::map::{Region, RegionKind};
use crate::session::Session;
use crate::types::PartitionKind;

/// What to print after `GPT part - `.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShowColumn {
    #[default]
    Type,
    Label,
    Guid,
    RawType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRow {
    pub start: u64,
    pub size: u64,
    pub index: Option<u32>,
    pub contents: String,
}

/// The region map rendered as a table, one row per region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapListing {
    pub rows: Vec<MapRow>,
    lba_width: usize,
}

impl fmt::Display for MapListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let w = self.lba_width;
        writeln!(f, "  {:>w$}  {:>w$}  index  contents", "start", "size")?;
        for row in &self.rows {
            write!(f, "  {:>w$}  {:>w$}  ", row.start, row.size)?;
            match row.index {
                Some(i) => write!(f, "{i:>5}")?,
                None => f.write_str("     ")?,
            }
            writeln!(f, "  {}", row.contents)?;
        }
        Ok(())
    }
}

fn lba_width(last: u64) -> usize {
    last.to_string().len().max(5)
}

pub fn show<IO: BlockIO>(s: &Session<IO>, column: ShowColumn) -> PartResult<MapListing> {
    // partitions stay readable when only the secondary copy survived
    let table = s.active_table().ok();
    let mut rows = Vec::with_capacity(s.map().len());
    for region in s.map().iter() {
        let (index, contents) = describe(s, table.as_ref(), region, column)?;
        rows.push(MapRow {
            start: region.start,
            size: region.size,
            index,
            contents,
        });
    }
    Ok(MapListing {
        rows,
        lba_width: lba_width(s.last_lba()),
    })
}

fn describe<IO: BlockIO>(
    s: &Session<IO>,
    table: Option<&EntryTable<&[u8]>>,
    region: &Region,
    column: ShowColumn,
) -> PartResult<(Option<u32>, String)> {
    let numbered = (region.index > 0).then_some(region.index);
    let text = match region.kind {
        RegionKind::Unused => "Unused".to_string(),
        RegionKind::LegacyMbr if region.start == 0 => "MBR".to_string(),
        RegionKind::LegacyMbr => "Extended MBR".to_string(),
        RegionKind::ProtectiveMbr => "PMBR".to_string(),
        RegionKind::PrimaryGptHeader => "Pri GPT header".to_string(),
        RegionKind::PrimaryGptTable => "Pri GPT table".to_string(),
        RegionKind::SecondaryGptTable => "Sec GPT table".to_string(),
        RegionKind::SecondaryGptHeader => "Sec GPT header".to_string(),
        RegionKind::MbrPartition => {
            let slice = s
                .legacy()
                .and_then(|l| l.slices.iter().find(|sl| sl.start == region.start));
            match slice {
                Some(sl) if sl.record_lba != 0 => format!("Extended MBR part {}", sl.part_type),
                Some(sl) => format!("MBR part {}", sl.part_type),
                None => "MBR part".to_string(),
            }
        }
        RegionKind::GptPartition => {
            let Some(table) = table else {
                return Ok((numbered, "GPT part".to_string()));
            };
            let entry = table.entry_at(region.index.saturating_sub(1))?;
            let what = match column {
                ShowColumn::Label => format!("\"{}\"", entry.label()),
                ShowColumn::Guid => entry.unique_uuid().to_string(),
                ShowColumn::RawType => entry.type_uuid().to_string(),
                ShowColumn::Type => entry.kind().to_string(),
            };
            format!("GPT part - {what}")
        }
    };
    Ok((numbered, text))
}

/// Everything known about one partition entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDetails {
    pub index: u32,
    pub start: u64,
    pub size: u64,
    pub sector_size: u64,
    pub kind: Uuid,
    pub unique: Uuid,
    pub label: String,
    pub attributes: GptAttributes,
}

impl fmt::Display for EntryDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = PartitionKind::from_uuid(&self.kind);
        let friendly = if kind.is_known() {
            kind.to_string()
        } else {
            "unknown".to_string()
        };
        let bytes = self.size.saturating_mul(self.sector_size);

        writeln!(f, "Details for index {}:", self.index)?;
        writeln!(f, "Start: {}", self.start)?;
        writeln!(f, "Size:  {} ({})", self.size, pretty_bytes(bytes))?;
        writeln!(f, "Type: {} ({})", friendly, self.kind)?;
        writeln!(f, "GUID: {}", self.unique)?;
        writeln!(f, "Label: \"{}\"", self.label)?;
        writeln!(f, "Attributes:")?;
        let described = self.attributes.describe();
        if described.is_empty() {
            writeln!(f, "  None")?;
        }
        for line in described {
            writeln!(f, "  {line}")?;
        }
        Ok(())
    }
}

pub fn show_entry<IO: BlockIO>(s: &Session<IO>, index: u32) -> PartResult<EntryDetails> {
    let id = s
        .map()
        .find_index(RegionKind::GptPartition, index)
        .ok_or(PartError::NotFound("could not find index"))?;
    let region = s
        .map()
        .get(id)
        .ok_or_else(|| PartError::StructuralViolation(format!("no region #{id}")))?;
    let table = s.active_table()?;
    let entry = table.entry_at(index - 1)?;
    Ok(EntryDetails {
        index,
        start: region.start,
        size: region.size,
        sector_size: s.sector_size(),
        kind: entry.type_uuid(),
        unique: entry.unique_uuid(),
        label: entry.label(),
        attributes: entry.attributes(),
    })
}

fn pretty_bytes(n: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];
    let mut val = n as f64;
    let mut unit = 0usize;
    while val >= 1024.0 && unit + 1 < UNITS.len() {
        val /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n}{}", UNITS[0])
    } else {
        format!("{val:.1}{}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::add::{AddRequest, add};
    use crate::ops::entries::{FlagChange, flag};
    use crate::session::tests::{MIB, blank, reopen, with_gpt};
    use crate::types::{GPT_ENT_TYPE_DRAGONFLY_HAMMER2, GPT_ENT_TYPE_EFI};

    #[test]
    fn test_show_blank_medium() {
        let s = blank(4 * MIB);
        let listing = show(&s, ShowColumn::Type).unwrap();
        assert_eq!(
            listing.to_string(),
            "  start   size  index  contents\n      0   8192         Unused\n"
        );
    }

    #[test]
    fn test_show_gpt_layout() {
        let mut s = with_gpt(4 * MIB);
        add(&mut s, &AddRequest::new(GPT_ENT_TYPE_EFI, 100).with_label("esp")).unwrap();
        let s = reopen(s);

        let listing = show(&s, ShowColumn::Type).unwrap();
        let contents: Vec<&str> = listing.rows.iter().map(|r| r.contents.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "PMBR",
                "Pri GPT header",
                "Pri GPT table",
                "GPT part - EFI System",
                "Unused",
                "Sec GPT table",
                "Sec GPT header",
            ]
        );
        let text = listing.to_string();
        assert!(text.contains("     34    100      1  GPT part - EFI System\n"));

        let labels = show(&s, ShowColumn::Label).unwrap();
        assert_eq!(labels.rows[3].contents, "GPT part - \"esp\"");
        let raw = show(&s, ShowColumn::RawType).unwrap();
        assert_eq!(
            raw.rows[3].contents,
            "GPT part - c12a7328-f81f-11d2-ba4b-00a0c93ec93b"
        );
    }

    #[test]
    fn test_show_entry_details() {
        let mut s = with_gpt(100 * MIB);
        add(
            &mut s,
            &AddRequest::new(GPT_ENT_TYPE_DRAGONFLY_HAMMER2, 2048).with_label("root"),
        )
        .unwrap();
        let change = FlagChange {
            set: GptAttributes::BOOTME,
            ..Default::default()
        };
        flag(&mut s, 1, &change).unwrap();
        let s = reopen(s);

        let details = show_entry(&s, 1).unwrap();
        let text = details.to_string();
        assert!(text.starts_with("Details for index 1:\nStart: 34\nSize:  2048 (1.0MB)\n"));
        assert!(text.contains("Type: DragonFly HAMMER2 (5cbb9ad1-862d-11dc-a94d-01301bb8a9f5)"));
        assert!(text.contains(&format!("GUID: {}", details.unique)));
        assert!(text.contains("Label: \"root\""));
        assert!(text.ends_with("Attributes:\n  indicates a bootable partition\n"));

        assert!(matches!(show_entry(&s, 2), Err(PartError::NotFound(_))));
    }

    #[test]
    fn test_unknown_type_details() {
        let details = EntryDetails {
            index: 4,
            start: 100,
            size: 1,
            sector_size: 512,
            kind: uuid::uuid!("01234567-89ab-cdef-0123-456789abcdef"),
            unique: Uuid::nil(),
            label: String::new(),
            attributes: GptAttributes::empty(),
        };
        let text = details.to_string();
        assert!(text.contains("Size:  1 (512B)"));
        assert!(text.contains("Type: unknown (01234567-89ab-cdef-0123-456789abcdef)"));
        assert!(text.ends_with("Attributes:\n  None\n"));
    }
}
