// SPDX-License-Identifier: MIT

mod cmd;
mod utils;

use clap::{ArgAction, Parser, Subcommand};
use gptpart::OpenFlags;

use crate::cmd::add::AddArgs;
use crate::cmd::boot::{BootArgs, EfiArgs};
use crate::cmd::create::CreateArgs;
use crate::cmd::destroy::DestroyArgs;
use crate::cmd::entries::{FlagArgs, LabelArgs, RemoveArgs, RenameArgs};
use crate::cmd::migrate::MigrateArgs;
use crate::cmd::recover::RecoverArgs;
use crate::cmd::resize::ResizeArgs;
use crate::cmd::show::ShowArgs;
use crate::cmd::verify::VerifyArgs;
use crate::utils::LogLevel;

#[derive(Parser, Debug)]
#[command(name = "gpttool", version, about = "GUID partition table editor", long_about = None)]
struct Cli {
    /// Open devices read-only
    #[arg(short, long)]
    readonly: bool,
    /// More output, repeat for more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Only report problems
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
    /// Sector size in bytes (default 512)
    #[arg(long, value_name = "BYTES")]
    sector_size: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a new GPT partition
    Add(AddArgs),
    /// Create a new GPT disk layout
    Create(CreateArgs),
    /// Destroy the GPT disk layout
    Destroy(DestroyArgs),
    /// Install gptboot with its PMBR code for BIOS boot
    #[command(alias = "installboot")]
    Boot(BootArgs),
    /// Install an EFI system partition image
    #[command(alias = "installefi")]
    Efi(EfiArgs),
    /// Change partition attributes
    Flag(FlagArgs),
    /// Change partition labels
    Label(LabelArgs),
    /// Convert MBR slices to GPT partitions
    Migrate(MigrateArgs),
    /// Rebuild a damaged GPT copy from the other one
    Recover(RecoverArgs),
    /// Remove GPT partitions
    Remove(RemoveArgs),
    /// Change partition types
    Rename(RenameArgs),
    /// Grow or shrink a partition
    Resize(ResizeArgs),
    /// Print the disk map or a partition's details
    Show(ShowArgs),
    /// Compare both GPT copies
    Verify(VerifyArgs),
}

impl Cli {
    fn level(&self) -> LogLevel {
        LogLevel::from_flags(self.quiet, self.verbose)
    }

    fn open_flags(&self) -> OpenFlags {
        OpenFlags {
            readonly: self.readonly,
            quiet: self.quiet,
            verbose: self.level().verbosity(),
            no_mbr: false,
            sector_size: self.sector_size,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    utils::log::init(cli.level());
    let flags = cli.open_flags();

    match &cli.command {
        Commands::Add(args) => cmd::add::run(args, flags),
        Commands::Create(args) => cmd::create::run(args, flags),
        Commands::Destroy(args) => cmd::destroy::run(args, flags),
        Commands::Boot(args) => cmd::boot::install_boot(args, flags),
        Commands::Efi(args) => cmd::boot::install_efi(args, flags),
        Commands::Flag(args) => cmd::entries::flag(args, flags),
        Commands::Label(args) => cmd::entries::label(args, flags),
        Commands::Migrate(args) => cmd::migrate::run(args, flags),
        Commands::Recover(args) => cmd::recover::run(args, flags),
        Commands::Remove(args) => cmd::entries::remove(args, flags),
        Commands::Rename(args) => cmd::entries::rename(args, flags),
        Commands::Resize(args) => cmd::resize::run(args, flags),
        Commands::Show(args) => cmd::show::run(args, flags),
        Commands::Verify(args) => cmd::verify::run(args, flags),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gptpart::gpt::GptAttributes;
    use gptpart::ops::{ShowColumn, VerifyScope};
    use gptpart::types::{GPT_ENT_TYPE_DRAGONFLY_UFS1, GPT_ENT_TYPE_EFI};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_global_flags() {
        let cli = parse(&["gpttool", "-r", "-vv", "show", "disk.img"]);
        let flags = cli.open_flags();
        assert!(flags.readonly);
        assert_eq!(flags.verbose, 2);
        assert!(!flags.quiet);

        let cli = parse(&["gpttool", "-q", "--sector-size", "4096", "create", "a", "b"]);
        assert_eq!(cli.level(), LogLevel::Quiet);
        assert_eq!(cli.open_flags().sector_size, Some(4096));
        let Commands::Create(args) = cli.command else {
            panic!("expected create");
        };
        assert_eq!(args.devices.devices.len(), 2);
        assert_eq!(args.entries, 128);
    }

    #[test]
    fn test_add_defaults_and_type_alias() {
        let Commands::Add(args) = parse(&["gpttool", "add", "-s", "2048", "da0"]).command else {
            panic!("expected add");
        };
        assert_eq!(args.kind, GPT_ENT_TYPE_DRAGONFLY_UFS1);
        assert_eq!(args.request().size, 2048);

        let Commands::Add(args) =
            parse(&["gpttool", "add", "-t", "efi", "-a", "1048576", "-l", "esp", "da0"]).command
        else {
            panic!("expected add");
        };
        let req = args.request();
        assert_eq!(req.kind, GPT_ENT_TYPE_EFI);
        assert_eq!(req.alignment, 1 << 20);
        assert_eq!(req.label.as_deref(), Some("esp"));
        assert!(Cli::try_parse_from(["gpttool", "add", "-t", "bogus", "da0"]).is_err());
    }

    #[test]
    fn test_destroy_recoverable_is_not_readonly() {
        let cli = parse(&["gpttool", "destroy", "-r", "da0"]);
        assert!(!cli.open_flags().readonly);
        let Commands::Destroy(args) = cli.command else {
            panic!("expected destroy");
        };
        assert!(args.recoverable);
    }

    #[test]
    fn test_flag_and_filters() {
        let Commands::Flag(args) = parse(&[
            "gpttool", "flag", "-i", "2", "-s", "bootme", "-t", "bootonce", "-s", "bootfailed", "da0",
        ])
        .command
        else {
            panic!("expected flag");
        };
        let change = args.change();
        assert_eq!(change.set, GptAttributes::BOOTME | GptAttributes::BOOTFAILED);
        assert_eq!(change.toggle, GptAttributes::BOOTONCE);
        assert!(change.unset.is_empty());

        let Commands::Remove(args) = parse(&["gpttool", "remove", "-t", "swap", "da0"]).command else {
            panic!("expected remove");
        };
        assert!(args.select.filter(args.all).validate().is_ok());
        let Commands::Remove(args) = parse(&["gpttool", "remove", "-a", "-i", "1", "da0"]).command else {
            panic!("expected remove");
        };
        assert!(args.select.filter(args.all).validate().is_err());
    }

    #[test]
    fn test_show_and_verify_options() {
        let Commands::Show(args) = parse(&["gpttool", "show", "-l", "da0"]).command else {
            panic!("expected show");
        };
        assert_eq!(args.column(), ShowColumn::Label);
        assert!(Cli::try_parse_from(["gpttool", "show", "-l", "-g", "da0"]).is_err());
        assert!(Cli::try_parse_from(["gpttool", "show", "-i", "0", "da0"]).is_err());

        let Commands::Verify(args) = parse(&["gpttool", "verify", "-S", "da0"]).command else {
            panic!("expected verify");
        };
        assert_eq!(args.scope(), VerifyScope::Secondary);
        assert!(Cli::try_parse_from(["gpttool", "verify", "-P", "-S", "da0"]).is_err());
    }

    #[test]
    fn test_boot_alias_and_devices_required() {
        let Commands::Boot(args) = parse(&["gpttool", "installboot", "-H", "da0"]).command else {
            panic!("expected boot");
        };
        assert!(args.toggle_active);
        assert_eq!(args.pmbr, std::path::PathBuf::from("/boot/pmbr"));
        assert!(Cli::try_parse_from(["gpttool", "create"]).is_err());
    }
}
