// SPDX-License-Identifier: MIT

use gptio::prelude::*;
use log::debug;
use uuid::Uuid;

use crate::errors::*;
use crate::gpt::Slot;
use crate::guid;
use crate::ops::alignment_sectors;
use crate::session::Session;
use crate::types::GPT_ENT_TYPE_DRAGONFLY_UFS1;

/// A new partition. `size` is in sectors (0 = the whole free run found),
/// `alignment` in bytes (0 = none).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequest {
    pub kind: Uuid,
    pub start: Option<u64>,
    pub size: u64,
    pub alignment: u64,
    /// 1-based slot; none picks the first free one.
    pub index: Option<u32>,
    pub label: Option<String>,
}

impl Default for AddRequest {
    fn default() -> Self {
        Self {
            kind: GPT_ENT_TYPE_DRAGONFLY_UFS1,
            start: None,
            size: 0,
            alignment: 0,
            index: None,
            label: None,
        }
    }
}

impl AddRequest {
    pub fn new(kind: Uuid, size: u64) -> Self {
        Self {
            kind,
            size,
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Added {
    pub index: u32,
    pub start: u64,
    pub size: u64,
}

/// Places a partition and records it in both tables.
pub fn add<IO: BlockIO>(s: &mut Session<IO>, req: &AddRequest) -> PartResult<Added> {
    let added = add_quiet(s, req)?;
    s.status(Some(added.index), "added");
    Ok(added)
}

pub(crate) fn add_quiet<IO: BlockIO>(s: &mut Session<IO>, req: &AddRequest) -> PartResult<Added> {
    s.gpt_regions()?;
    let slot = s
        .table(crate::session::Side::Primary)?
        .find_free_slot(Slot::from_index(req.index))?;
    let align = alignment_sectors(s, req.alignment)?;

    let id = s.map_mut().alloc(req.start, req.size, align).map_err(|e| match e {
        PartError::InsufficientSpace(_) if align > 0 => PartError::InsufficientSpace(
            "not enough space available on device for an aligned partition",
        ),
        PartError::InsufficientSpace(_) => {
            PartError::InsufficientSpace("not enough space available on device")
        }
        other => other,
    })?;
    let (start, size) = s
        .map()
        .get(id)
        .map(|r| (r.start, r.size))
        .ok_or_else(|| PartError::StructuralViolation(format!("no region #{id}")))?;
    debug!("{}: placing slot {} at {start}+{size}", s.name(), slot + 1);

    let unique = guid::generate();
    let written = s.update_tables(|t| {
        let e = t.entry_at_mut(slot)?;
        e.clear();
        e.set_type(&req.kind);
        e.unique_guid = guid::encode(&unique);
        e.start_lba.set(start);
        e.end_lba.set(start + size - 1);
        if let Some(label) = &req.label {
            e.set_label(label);
        }
        Ok(())
    });
    if let Err(e) = written {
        s.map_mut().release(id)?;
        return Err(e);
    }

    let index = slot + 1;
    s.region_mut(id)?.index = index;
    Ok(Added { index, start, size })
}
