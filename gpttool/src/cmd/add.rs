// SPDX-License-Identifier: MIT

use clap::Args;
use gptpart::OpenFlags;
use gptpart::ops::{self, AddRequest};
use gptpart::types::GPT_ENT_TYPE_DRAGONFLY_UFS1;
use uuid::Uuid;

use super::{Devices, each_device};
use crate::utils::parse_type;

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Alignment in bytes
    #[arg(short, long, default_value_t = 0)]
    pub alignment: u64,
    /// Starting LBA
    #[arg(short = 'b', long)]
    pub start: Option<u64>,
    /// Table slot (1-based)
    #[arg(short, long)]
    pub index: Option<u32>,
    #[arg(short, long)]
    pub label: Option<String>,
    /// Size in sectors, 0 takes the whole free run
    #[arg(short, long, default_value_t = 0)]
    pub size: u64,
    /// Partition type: UUID or alias
    #[arg(short = 't', long = "type", value_parser = parse_type, default_value_t = GPT_ENT_TYPE_DRAGONFLY_UFS1)]
    pub kind: Uuid,
    #[command(flatten)]
    pub devices: Devices,
}

impl AddArgs {
    pub fn request(&self) -> AddRequest {
        AddRequest {
            kind: self.kind,
            start: self.start,
            size: self.size,
            alignment: self.alignment,
            index: self.index,
            label: self.label.clone(),
        }
    }
}

pub fn run(args: &AddArgs, flags: OpenFlags) -> anyhow::Result<()> {
    let req = args.request();
    each_device(&args.devices, flags, |disk| {
        let added = ops::add(disk, &req)?;
        log::debug!(
            "{}p{}: {} sectors at {}",
            disk.name(),
            added.index,
            added.size,
            added.start
        );
        Ok(())
    })
}
