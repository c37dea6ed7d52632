// SPDX-License-Identifier: MIT

use clap::Args;
use gptpart::OpenFlags;
use gptpart::ops::{self, ShowColumn};

use super::{Devices, each_device};

#[derive(Args, Debug)]
#[group(id = "column", multiple = false)]
pub struct ShowColumnArgs {
    /// Print labels instead of types
    #[arg(short, long)]
    pub label: bool,
    /// Print unique partition GUIDs
    #[arg(short, long)]
    pub guid: bool,
    /// Print raw type UUIDs
    #[arg(short, long)]
    pub uuid: bool,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[command(flatten)]
    pub column: ShowColumnArgs,
    /// Details of a single partition
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub index: Option<u32>,
    #[command(flatten)]
    pub devices: Devices,
}

impl ShowArgs {
    pub fn column(&self) -> ShowColumn {
        let c = &self.column;
        if c.label {
            ShowColumn::Label
        } else if c.guid {
            ShowColumn::Guid
        } else if c.uuid {
            ShowColumn::RawType
        } else {
            ShowColumn::Type
        }
    }
}

pub fn run(args: &ShowArgs, flags: OpenFlags) -> anyhow::Result<()> {
    let column = args.column();
    each_device(&args.devices, flags.readonly(), |disk| {
        match args.index {
            Some(index) => {
                let details = ops::show_entry(disk, index)
                    .map_err(|e| anyhow::anyhow!("{e} {index}"))?;
                print!("{details}");
            }
            None => print!("{}", ops::show(disk, column)?),
        }
        Ok(())
    })
}
