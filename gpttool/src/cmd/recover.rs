// SPDX-License-Identifier: MIT

use clap::Args;
use gptpart::OpenFlags;
use gptpart::ops::{self, RecoverOptions};

use super::{Devices, each_device};

#[derive(Args, Debug)]
pub struct RecoverArgs {
    #[arg(short, long)]
    pub force: bool,
    /// Write a fresh protective MBR instead
    #[arg(short = 'P', long)]
    pub pmbr: bool,
    #[command(flatten)]
    pub devices: Devices,
}

pub fn run(args: &RecoverArgs, flags: OpenFlags) -> anyhow::Result<()> {
    let opts = RecoverOptions {
        force: args.force,
        rewrite_pmbr: args.pmbr,
    };
    each_device(&args.devices, flags, |disk| {
        let done = ops::recover(disk, &opts)?;
        if done.is_empty() {
            log::info!("{}: nothing to recover", disk.name());
        }
        Ok(())
    })
}
