// SPDX-License-Identifier: MIT

//! Read-only consistency report over both GPT copies, as found at open time.

use gptio::prelude::*;
use log::warn;

use crate::errors::*;
use crate::gpt::{EntryTable, GptEntry, GptHeader};
use crate::map::RegionKind;
use crate::session::{GptProbe, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyScope {
    #[default]
    Both,
    /// Check and dump the primary header only.
    Primary,
    /// Check and dump the secondary header only.
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub what: String,
    pub ok: bool,
    /// Nesting depth, for display.
    pub depth: u8,
    /// Verbosity needed to show the line when it passes.
    pub level: u8,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub checks: Vec<Check>,
    /// The primary header no longer points at the last sector.
    pub media_changed: bool,
    /// Header requested with a single-side scope.
    pub dump: Option<GptHeader>,
}

impl VerifyReport {
    fn push(&mut self, what: impl Into<String>, ok: bool, depth: u8, level: u8) -> bool {
        self.checks.push(Check {
            what: what.into(),
            ok,
            depth,
            level,
        });
        ok
    }

    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.ok)
    }

    pub fn is_ok(&self) -> bool {
        !self.media_changed && self.failures().next().is_none()
    }

    /// Printable lines: failures always, passes from `check.level` up.
    pub fn lines(&self, verbose: u8) -> impl Iterator<Item = String> + '_ {
        self.checks
            .iter()
            .filter(move |c| !c.ok || verbose >= c.level)
            .map(|c| {
                format!(
                    "{:indent$}{} - {}",
                    "",
                    c.what,
                    if c.ok { "OK" } else { "FAIL" },
                    indent = c.depth as usize * 2
                )
            })
    }
}

pub fn verify<IO: BlockIO>(s: &Session<IO>, scope: VerifyScope) -> PartResult<VerifyReport> {
    let mut report = VerifyReport::default();
    let probes = s.probes();
    let map = s.map();
    let want_primary = scope != VerifyScope::Secondary;
    let want_secondary = scope != VerifyScope::Primary;

    if want_primary {
        check_copy(&mut report, "Primary", probes.primary.as_ref());
        if let Some(p) = &probes.primary {
            if p.header.backup_lba.get() != s.last_lba() {
                warn!("{}: media size has changed", s.name());
                report.media_changed = true;
                report.push("media size unchanged", false, 0, 1);
                return Ok(report);
            }
        }
    }
    if want_secondary {
        check_copy(&mut report, "Secondary", probes.secondary.as_ref());
    }

    match scope {
        VerifyScope::Both => {
            report.push(
                "Have PMBR",
                map.find(RegionKind::ProtectiveMbr).is_some(),
                0,
                1,
            );
            let (primary, secondary) = (probes.primary.as_ref(), probes.secondary.as_ref());
            let headers = match (primary, secondary) {
                (Some(p), Some(s)) => compare_headers(&mut report, p, s),
                _ => false,
            };
            report.push("Both headers match", headers, 0, 1);
            let tables = match (primary, secondary) {
                (Some(p), Some(s)) => compare_tables(&mut report, p, s)?,
                _ => false,
            };
            report.push("Both tables match", tables, 0, 1);
        }
        VerifyScope::Primary => {
            report.dump = probes.primary.as_ref().map(|p| p.header);
        }
        VerifyScope::Secondary => {
            report.dump = probes.secondary.as_ref().map(|p| p.header);
        }
    }
    Ok(report)
}

fn check_copy(report: &mut VerifyReport, side: &str, probe: Option<&GptProbe>) {
    report.push(format!("Have {side} header"), probe.is_some(), 0, 1);
    let table = probe.is_some_and(|p| !p.table.is_empty());
    report.push(format!("Have {side} table"), table, 0, 1);
    if let Some(p) = probe {
        report.push(format!("{side} header CRC"), p.crc.header_ok, 1, 1);
        if table {
            report.push(format!("{side} table CRC"), p.crc.table_ok, 1, 1);
        }
    }
}

fn compare_headers(report: &mut VerifyReport, p: &GptProbe, s: &GptProbe) -> bool {
    let (hp, hs) = (&p.header, &s.header);
    let crc_p = crate::crc::crc_with_field_zeroed(header_bytes(p), 16, 4);
    let crc_s = crate::crc::crc_with_field_zeroed(header_bytes(s), 16, 4);

    let checks = [
        ("signatures", hp.signature == hs.signature),
        ("revisions", hp.revision == hs.revision),
        ("size", hp.header_size == hs.header_size),
        ("crc_self differs", crc_p != crc_s),
        ("lba_self == lba_alt", hp.current_lba == hs.backup_lba),
        ("lba_alt == lba_self", hp.backup_lba == hs.current_lba),
        ("lba_start", hp.first_usable_lba == hs.first_usable_lba),
        ("lba_end", hp.last_usable_lba == hs.last_usable_lba),
        ("lba_table differs", hp.entries_lba != hs.entries_lba),
        ("guid", hp.disk_guid == hs.disk_guid),
        ("entries", hp.num_entries == hs.num_entries),
        ("entsz", hp.entry_size == hs.entry_size),
        ("crc_table", hp.entries_crc == hs.entries_crc),
    ];
    let mut all = true;
    for (what, ok) in checks {
        all &= report.push(what, ok, 1, 1);
    }
    all
}

fn header_bytes(p: &GptProbe) -> &[u8] {
    let size = (p.header.header_size.get() as usize).min(p.header_bytes.len());
    &p.header_bytes[..size]
}

fn compare_entries(report: &mut VerifyReport, slot: u32, a: &GptEntry, b: &GptEntry) -> bool {
    let checks = [
        ("type", a.type_guid == b.type_guid),
        ("guid", a.unique_guid == b.unique_guid),
        ("lba_start", a.start_lba == b.start_lba),
        ("lba_end", a.end_lba == b.end_lba),
        ("attr", a.attributes == b.attributes),
        ("name", a.name == b.name),
    ];
    let mut all = true;
    for (what, ok) in checks {
        all &= report.push(format!("entry {}: {what}", slot + 1), ok, 2, 2);
    }
    all
}

fn compare_tables(report: &mut VerifyReport, p: &GptProbe, s: &GptProbe) -> PartResult<bool> {
    if p.table.is_empty() || s.table.is_empty() {
        return Ok(false);
    }
    let (hp, hs) = (&p.header, &s.header);
    if hp.num_entries != hs.num_entries {
        warn!("hdr_entries differ");
    }
    if hp.entry_size != hs.entry_size {
        warn!("hdr_entsz differ");
    }
    let tp = EntryTable::for_header(&p.table[..], hp)?;
    let ts = EntryTable::for_header(&s.table[..], hs)?;
    let count = tp.count().min(ts.count());

    let mut all = hp.num_entries == hs.num_entries;
    for slot in 0..count {
        let same = compare_entries(report, slot, tp.entry_at(slot)?, ts.entry_at(slot)?);
        all &= report.push(format!("entry {}", slot + 1), same, 1, 2);
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::OpenFlags;
    use crate::session::tests::{MIB, blank, with_gpt};

    fn failed(report: &VerifyReport) -> Vec<&str> {
        report.failures().map(|c| c.what.as_str()).collect()
    }

    #[test]
    fn test_verify_clean_disk() {
        let s = with_gpt(4 * MIB);
        let report = verify(&s, VerifyScope::Both).unwrap();
        assert!(report.is_ok(), "{:?}", failed(&report));
        assert_eq!(report.lines(0).count(), 0);
        assert!(report.lines(1).any(|l| l == "Both tables match - OK"));
        assert!(report.lines(2).any(|l| l == "  entry 128 - OK"));
    }

    #[test]
    fn test_verify_corrupt_secondary_header_crc() {
        let s = with_gpt(100 * MIB);
        let mut io = s.close().unwrap();
        io.as_mut_slice()[204799 * 512 + 16] ^= 0x01;
        let s = Session::open("md0", io, OpenFlags::default()).unwrap();

        let report = verify(&s, VerifyScope::Both).unwrap();
        assert_eq!(failed(&report), vec!["Secondary header CRC"]);
    }

    #[test]
    fn test_verify_reports_differing_entry() {
        let s = with_gpt(4 * MIB);
        let mut io = s.close().unwrap();
        // primary slot 0 name, then fix up the CRCs of the primary copy
        let table = 2 * 512;
        io.as_mut_slice()[table + 56] = b'x';
        let mut header = io.as_slice()[512..1024].to_vec();
        crate::gpt::recompute_crcs(&mut header, &io.as_slice()[table..table + 32 * 512]).unwrap();
        io.as_mut_slice()[512..1024].copy_from_slice(&header);
        let s = Session::open("md0", io, OpenFlags::default()).unwrap();

        let report = verify(&s, VerifyScope::Both).unwrap();
        let fails = failed(&report);
        assert!(fails.contains(&"entry 1: name"));
        assert!(fails.contains(&"entry 1"));
        assert!(fails.contains(&"crc_table"));
        assert!(fails.contains(&"Both tables match"));
        assert!(!fails.contains(&"entry 2"));
    }

    #[test]
    fn test_verify_single_side_and_blank() {
        let s = with_gpt(4 * MIB);
        let report = verify(&s, VerifyScope::Secondary).unwrap();
        assert_eq!(report.dump.unwrap().current_lba.get(), 8191);
        assert!(report.checks.iter().all(|c| !c.what.starts_with("Primary")));

        let s = blank(4 * MIB);
        let report = verify(&s, VerifyScope::Both).unwrap();
        assert!(failed(&report).contains(&"Have Primary header"));
        assert!(failed(&report).contains(&"Both headers match"));
    }
}
