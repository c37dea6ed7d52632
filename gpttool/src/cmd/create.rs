// SPDX-License-Identifier: MIT

use clap::Args;
use gptpart::OpenFlags;
use gptpart::gpt::GPT_DEFAULT_NUM_ENTRIES;
use gptpart::ops::{self, CreateOptions};

use super::{Devices, each_device};

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Overwrite an existing MBR
    #[arg(short, long)]
    pub force: bool,
    /// Only write the primary GPT
    #[arg(short = 'P', long)]
    pub primary_only: bool,
    /// Number of table entries
    #[arg(short = 'p', long, default_value_t = GPT_DEFAULT_NUM_ENTRIES)]
    pub entries: u32,
    #[command(flatten)]
    pub devices: Devices,
}

pub fn run(args: &CreateArgs, flags: OpenFlags) -> anyhow::Result<()> {
    let opts = CreateOptions {
        force: args.force,
        primary_only: args.primary_only,
        entries: args.entries,
    };
    each_device(&args.devices, flags, |disk| Ok(ops::create(disk, &opts)?))
}
