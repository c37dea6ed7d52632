// SPDX-License-Identifier: MIT

//! remove, label, rename and flag: commands that edit selected entries.

use std::path::PathBuf;

use anyhow::bail;
use clap::Args;
use gptpart::OpenFlags;
use gptpart::gpt::GptAttributes;
use gptpart::ops::{self, EntryFilter, FlagChange};
use uuid::Uuid;

use super::{Devices, each_device};
use crate::utils::{parse_type, read_first_line};

/// Entry selectors shared by the editing commands.
#[derive(Args, Debug, Clone, Default)]
pub struct Selector {
    /// Starting LBA
    #[arg(short = 'b', long)]
    pub start: Option<u64>,
    /// Table slot (1-based)
    #[arg(short, long)]
    pub index: Option<u32>,
    /// Size in sectors
    #[arg(short, long)]
    pub size: Option<u64>,
    /// Partition type: UUID or alias
    #[arg(short = 't', long = "type", value_parser = parse_type)]
    pub kind: Option<Uuid>,
}

impl Selector {
    pub fn filter(&self, all: bool) -> EntryFilter {
        EntryFilter {
            all,
            index: self.index,
            start: self.start,
            size: self.size,
            kind: self.kind,
        }
    }
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Every partition
    #[arg(short, long)]
    pub all: bool,
    #[command(flatten)]
    pub select: Selector,
    #[command(flatten)]
    pub devices: Devices,
}

pub fn remove(args: &RemoveArgs, flags: OpenFlags) -> anyhow::Result<()> {
    let filter = args.select.filter(args.all);
    filter.validate()?;
    each_device(&args.devices, flags, |disk| {
        ops::remove(disk, &filter)?;
        Ok(())
    })
}

#[derive(Args, Debug)]
pub struct LabelArgs {
    #[arg(short, long)]
    pub all: bool,
    #[command(flatten)]
    pub select: Selector,
    #[arg(short, long, conflicts_with = "file")]
    pub label: Option<String>,
    /// Read the label from the first line of a file, `-` for stdin
    #[arg(short, long)]
    pub file: Option<PathBuf>,
    #[command(flatten)]
    pub devices: Devices,
}

pub fn label(args: &LabelArgs, flags: OpenFlags) -> anyhow::Result<()> {
    let name = match (&args.label, &args.file) {
        (Some(l), _) => l.clone(),
        (None, Some(path)) => read_first_line(path)?,
        (None, None) => bail!("a label is required (-l or -f)"),
    };
    let filter = args.select.filter(args.all);
    filter.validate()?;
    each_device(&args.devices, flags, |disk| {
        ops::label(disk, &filter, &name)?;
        Ok(())
    })
}

#[derive(Args, Debug)]
pub struct RenameArgs {
    #[command(flatten)]
    pub select: Selector,
    /// New partition type
    #[arg(short = 'T', long = "new-type", value_parser = parse_type)]
    pub new_type: Uuid,
    #[command(flatten)]
    pub devices: Devices,
}

pub fn rename(args: &RenameArgs, flags: OpenFlags) -> anyhow::Result<()> {
    let filter = args.select.filter(false);
    filter.validate()?;
    each_device(&args.devices, flags, |disk| {
        ops::rename(disk, &filter, &args.new_type)?;
        Ok(())
    })
}

fn parse_attribute(s: &str) -> Result<GptAttributes, String> {
    GptAttributes::parse_name(s).ok_or_else(|| format!("unknown attribute {s}"))
}

#[derive(Args, Debug)]
pub struct FlagArgs {
    #[arg(short, long)]
    pub index: u32,
    /// Attribute to set: bootme, bootonce or bootfailed
    #[arg(short, long, value_parser = parse_attribute)]
    pub set: Vec<GptAttributes>,
    /// Attribute to toggle
    #[arg(short, long, value_parser = parse_attribute)]
    pub toggle: Vec<GptAttributes>,
    /// Attribute to clear
    #[arg(short, long, value_parser = parse_attribute)]
    pub unset: Vec<GptAttributes>,
    #[command(flatten)]
    pub devices: Devices,
}

impl FlagArgs {
    pub fn change(&self) -> FlagChange {
        let fold = |v: &[GptAttributes]| v.iter().fold(GptAttributes::empty(), |a, &b| a | b);
        FlagChange {
            set: fold(&self.set),
            toggle: fold(&self.toggle),
            unset: fold(&self.unset),
        }
    }
}

pub fn flag(args: &FlagArgs, flags: OpenFlags) -> anyhow::Result<()> {
    let change = args.change();
    each_device(&args.devices, flags, |disk| {
        ops::flag(disk, args.index, &change)?;
        Ok(())
    })
}
