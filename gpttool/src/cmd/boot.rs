// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use clap::Args;
use gptpart::OpenFlags;
use gptpart::ops::{self, BootRequest, EfiRequest};

use super::{Devices, each_device};
use crate::utils::read_image;

#[derive(Args, Debug)]
pub struct BootArgs {
    /// Toggle the bootable flag of the protective record
    #[arg(short = 'H', long)]
    pub toggle_active: bool,
    /// PMBR boot loader, one sector
    #[arg(short = 'b', long, default_value = "/boot/pmbr")]
    pub pmbr: PathBuf,
    /// gptboot stage
    #[arg(short = 'g', long, default_value = "/boot/gptboot")]
    pub gptboot: PathBuf,
    /// Size of a new boot partition in sectors
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    pub size: Option<u64>,
    #[command(flatten)]
    pub devices: Devices,
}

pub fn install_boot(args: &BootArgs, flags: OpenFlags) -> anyhow::Result<()> {
    let req = BootRequest {
        pmbr_code: Some(read_image(&args.pmbr)?),
        stage: read_image(&args.gptboot)?,
        size: args.size,
        toggle_active: args.toggle_active,
    };
    each_device(&args.devices, flags, |disk| {
        ops::install_boot(disk, &req)?;
        Ok(())
    })
}

#[derive(Args, Debug)]
pub struct EfiArgs {
    /// FAT image of the EFI system partition
    #[arg(short = 'b', long, default_value = "/boot/boot1.efifat")]
    pub image: PathBuf,
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    pub size: Option<u64>,
    #[command(flatten)]
    pub devices: Devices,
}

pub fn install_efi(args: &EfiArgs, flags: OpenFlags) -> anyhow::Result<()> {
    let req = EfiRequest {
        image: read_image(&args.image)?,
        size: args.size,
    };
    each_device(&args.devices, flags, |disk| {
        ops::install_efi(disk, &req)?;
        Ok(())
    })
}
