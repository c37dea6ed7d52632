// SPDX-License-Identifier: MIT

use clap::Args;
use gptpart::OpenFlags;
use gptpart::ops::{self, ResizeOutcome};

use super::{Devices, each_device};

#[derive(Args, Debug)]
pub struct ResizeArgs {
    #[arg(short, long)]
    pub index: u32,
    /// Alignment in bytes
    #[arg(short, long, default_value_t = 0)]
    pub alignment: u64,
    /// New size in sectors, 0 grows into all of the following free space
    #[arg(short, long, default_value_t = 0)]
    pub size: u64,
    #[command(flatten)]
    pub devices: Devices,
}

pub fn run(args: &ResizeArgs, flags: OpenFlags) -> anyhow::Result<()> {
    each_device(&args.devices, flags, |disk| {
        if let ResizeOutcome::Resized(size) = ops::resize(disk, args.index, args.size, args.alignment)? {
            log::debug!("{}p{}: now {size} sectors", disk.name(), args.index);
        }
        Ok(())
    })
}
