// SPDX-License-Identifier: MIT

use clap::Args;
use gptpart::OpenFlags;
use gptpart::ops;

use super::{Devices, each_device};

#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Keep the secondary GPT so that recover can bring the label back
    #[arg(short, long)]
    pub recoverable: bool,
    #[command(flatten)]
    pub devices: Devices,
}

pub fn run(args: &DestroyArgs, flags: OpenFlags) -> anyhow::Result<()> {
    each_device(&args.devices, flags, |disk| {
        Ok(ops::destroy(disk, args.recoverable)?)
    })
}
