// SPDX-License-Identifier: MIT

use clap::Args;
use gptpart::OpenFlags;
use gptpart::ops::{self, VerifyScope};

use super::{Devices, each_device};

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Check and dump the primary header only
    #[arg(short = 'P', long, conflicts_with = "secondary")]
    pub primary: bool,
    /// Check and dump the secondary header only
    #[arg(short = 'S', long)]
    pub secondary: bool,
    #[command(flatten)]
    pub devices: Devices,
}

impl VerifyArgs {
    pub fn scope(&self) -> VerifyScope {
        match (self.primary, self.secondary) {
            (true, _) => VerifyScope::Primary,
            (_, true) => VerifyScope::Secondary,
            _ => VerifyScope::Both,
        }
    }
}

pub fn run(args: &VerifyArgs, flags: OpenFlags) -> anyhow::Result<()> {
    let scope = args.scope();
    each_device(&args.devices, flags.readonly(), |disk| {
        let report = ops::verify(disk, scope)?;
        for line in report.lines(flags.verbose) {
            println!("{line}");
        }
        if let Some(header) = report.dump {
            println!("{header}");
        }
        if !report.is_ok() {
            log::warn!("{}: GPT is inconsistent", disk.name());
        }
        Ok(())
    })
}
