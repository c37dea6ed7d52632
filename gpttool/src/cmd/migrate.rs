// SPDX-License-Identifier: MIT

use clap::Args;
use gptpart::OpenFlags;
use gptpart::gpt::GPT_DEFAULT_NUM_ENTRIES;
use gptpart::ops::{self, MigrateOptions};

use super::{Devices, each_device};

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Skip slices of unknown type
    #[arg(short, long)]
    pub force: bool,
    /// Convert BSD slices as a whole, ignoring their disklabel
    #[arg(short, long)]
    pub slice: bool,
    #[arg(short = 'p', long, default_value_t = GPT_DEFAULT_NUM_ENTRIES)]
    pub entries: u32,
    #[command(flatten)]
    pub devices: Devices,
}

pub fn run(args: &MigrateArgs, flags: OpenFlags) -> anyhow::Result<()> {
    let opts = MigrateOptions {
        force: args.force,
        slice: args.slice,
        entries: args.entries,
    };
    each_device(&args.devices, flags, |disk| Ok(ops::migrate(disk, &opts)?))
}
