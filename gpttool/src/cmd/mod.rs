// SPDX-License-Identifier: MIT

pub mod add;
pub mod boot;
pub mod create;
pub mod destroy;
pub mod entries;
pub mod migrate;
pub mod recover;
pub mod resize;
pub mod show;
pub mod verify;

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use gptio::FileBlockIO;
use gptpart::{OpenFlags, Session};

pub type Disk = Session<FileBlockIO<File>>;

/// Devices every command operates on, in order.
#[derive(Args, Debug, Clone)]
pub struct Devices {
    #[arg(required = true, value_name = "DEVICE")]
    pub devices: Vec<PathBuf>,
}

/// Opens each device in turn and runs `f` on it. A device that fails is
/// reported and the next one is attempted.
pub fn each_device<F>(devices: &Devices, flags: OpenFlags, mut f: F) -> anyhow::Result<()>
where
    F: FnMut(&mut Disk) -> anyhow::Result<()>,
{
    for dev in &devices.devices {
        let name = dev.display().to_string();
        if let Err(e) = run_one(&name, dev, flags, &mut f) {
            log::error!("{name}: {e:#}");
        }
    }
    Ok(())
}

fn run_one<F>(name: &str, dev: &Path, flags: OpenFlags, f: &mut F) -> anyhow::Result<()>
where
    F: FnMut(&mut Disk) -> anyhow::Result<()>,
{
    let io = FileBlockIO::open(dev, !flags.readonly).context("unable to open device")?;
    let mut disk = Session::open(name, io, flags)?;
    let outcome = f(&mut disk);
    disk.close()?;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use gptpart::ops::{AddRequest, CreateOptions, show};
    use gptpart::types::GPT_ENT_TYPE_EFI;

    fn image(bytes: u64) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(bytes).unwrap();
        file
    }

    #[test]
    fn test_each_device_on_image_files() {
        let a = image(4 << 20);
        let b = image(4 << 20);
        let devices = Devices {
            devices: vec![a.path().to_path_buf(), b.path().to_path_buf()],
        };
        let flags = OpenFlags::default().quiet();
        each_device(&devices, flags, |disk| {
            gptpart::ops::create(disk, &CreateOptions::default())?;
            gptpart::ops::add(disk, &AddRequest::new(GPT_ENT_TYPE_EFI, 100))?;
            Ok(())
        })
        .unwrap();

        let mut rows = Vec::new();
        each_device(&devices, flags.readonly(), |disk| {
            let listing = show(disk, Default::default())?;
            rows.push(listing.rows.len());
            Ok(())
        })
        .unwrap();
        assert_eq!(rows, vec![7, 7]);
    }

    #[test]
    fn test_failing_device_does_not_stop_the_others() {
        let good = image(4 << 20);
        let devices = Devices {
            devices: vec![PathBuf::from("/nonexistent/disk"), good.path().to_path_buf()],
        };
        let mut seen = 0;
        each_device(&devices, OpenFlags::default().quiet(), |disk| {
            seen += 1;
            assert!(!disk.is_modified());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_readonly_session_refuses_writes() {
        let file = image(4 << 20);
        let devices = Devices {
            devices: vec![file.path().to_path_buf()],
        };
        let mut failed = false;
        each_device(&devices, OpenFlags::default().readonly(), |disk| {
            failed = gptpart::ops::create(disk, &CreateOptions::default()).is_err();
            Ok(())
        })
        .unwrap();
        assert!(failed);
    }
}
