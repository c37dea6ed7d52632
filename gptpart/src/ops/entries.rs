// SPDX-License-Identifier: MIT

//! Operations applied to every entry matching a filter: remove, label,
//! rename and flag.

use gptio::prelude::*;
use uuid::Uuid;

use crate::errors::*;
use crate::gpt::{GptAttributes, GptEntry};
use crate::map::RegionKind;
use crate::session::Session;

/// Selects partitions by slot, start, size and type. Unset fields match
/// everything; `all` selects every partition and excludes the others.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub all: bool,
    pub index: Option<u32>,
    pub start: Option<u64>,
    pub size: Option<u64>,
    pub kind: Option<Uuid>,
}

impl EntryFilter {
    pub fn all() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }

    pub fn index(index: u32) -> Self {
        Self {
            index: Some(index),
            ..Default::default()
        }
    }

    fn has_criteria(&self) -> bool {
        self.index.is_some_and(|i| i > 0)
            || self.start.is_some_and(|b| b > 0)
            || self.size.is_some_and(|s| s > 0)
            || self.kind.is_some_and(|k| !k.is_nil())
    }

    /// Exactly one of `all` or a criterion must be given.
    pub fn validate(&self) -> PartResult<()> {
        match (self.all, self.has_criteria()) {
            (true, false) | (false, true) => Ok(()),
            (true, true) => Err(PartError::InvalidArgument(
                "-a cannot be combined with other selectors".into(),
            )),
            (false, false) => Err(PartError::InvalidArgument(
                "no partition selected; use -a or a selector".into(),
            )),
        }
    }

    fn matches(&self, index: u32, start: u64, size: u64, entry: &GptEntry) -> bool {
        self.index.is_none_or(|i| i == 0 || i == index)
            && self.start.is_none_or(|b| b == 0 || b == start)
            && self.size.is_none_or(|s| s == 0 || s == size)
            && self.kind.is_none_or(|k| k.is_nil() || k == entry.type_uuid())
    }
}

/// 1-based indices of the mapped partitions selected by `filter`.
fn select<IO: BlockIO>(s: &Session<IO>, filter: &EntryFilter) -> PartResult<Vec<u32>> {
    let table = s.table(crate::session::Side::Primary)?;
    let mut out = Vec::new();
    for region in s.map().iter() {
        if region.kind != RegionKind::GptPartition || region.index < 1 {
            continue;
        }
        let entry = table.entry_at(region.index - 1)?;
        if entry.is_free() {
            continue;
        }
        if filter.matches(region.index, region.start, region.size, entry) {
            out.push(region.index);
        }
    }
    Ok(out)
}

fn apply<IO, F>(s: &mut Session<IO>, filter: &EntryFilter, done: &str, mutate: F) -> PartResult<Vec<u32>>
where
    IO: BlockIO,
    F: Fn(&mut GptEntry),
{
    filter.validate()?;
    s.gpt_regions()?;
    let selected = select(s, filter)?;
    if selected.is_empty() {
        return Ok(selected);
    }

    s.update_tables(|t| {
        for &index in &selected {
            mutate(t.entry_at_mut(index - 1)?);
        }
        Ok(())
    })?;
    for &index in &selected {
        s.status(Some(index), done);
    }
    Ok(selected)
}

/// Frees the selected slots by clearing their type.
pub fn remove<IO: BlockIO>(s: &mut Session<IO>, filter: &EntryFilter) -> PartResult<Vec<u32>> {
    apply(s, filter, "removed", |e| e.set_type(&Uuid::nil()))
}

pub fn label<IO: BlockIO>(s: &mut Session<IO>, filter: &EntryFilter, name: &str) -> PartResult<Vec<u32>> {
    apply(s, filter, "labeled", |e| e.set_label(name))
}

/// Changes the partition type of the selected entries.
pub fn rename<IO: BlockIO>(s: &mut Session<IO>, filter: &EntryFilter, kind: &Uuid) -> PartResult<Vec<u32>> {
    if kind.is_nil() {
        return Err(PartError::InvalidArgument("new type must not be nil".into()));
    }
    apply(s, filter, "renamed", |e| e.set_type(kind))
}

/// Attribute edits, applied as `set`, then `toggle`, then `unset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagChange {
    pub set: GptAttributes,
    pub toggle: GptAttributes,
    pub unset: GptAttributes,
}

impl Default for FlagChange {
    fn default() -> Self {
        Self {
            set: GptAttributes::empty(),
            toggle: GptAttributes::empty(),
            unset: GptAttributes::empty(),
        }
    }
}

impl FlagChange {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.toggle.is_empty() && self.unset.is_empty()
    }

    /// Bits outside the known flags pass through unchanged.
    pub fn apply(&self, attrs: GptAttributes) -> GptAttributes {
        let bits = ((attrs.bits() | self.set.bits()) ^ self.toggle.bits()) & !self.unset.bits();
        GptAttributes::from_bits_retain(bits)
    }
}

pub fn flag<IO: BlockIO>(s: &mut Session<IO>, index: u32, change: &FlagChange) -> PartResult<Vec<u32>> {
    if index == 0 {
        return Err(PartError::InvalidArgument("a partition index is required".into()));
    }
    if change.is_empty() {
        return Err(PartError::InvalidArgument(
            "at least one of set, toggle or unset is required".into(),
        ));
    }
    apply(s, &EntryFilter::index(index), "flags changed", |e| {
        e.set_attributes(change.apply(e.attributes()))
    })
}
