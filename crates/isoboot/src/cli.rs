//! CLI argument parsing with clap

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};

use isoboot_core::{BootMode, FilesystemFormat};

/// isoboot - boot a disc image from a partition on this machine
#[derive(Parser, Debug)]
#[command(name = "isoboot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to isoboot.yaml config file
    #[arg(short, long, global = true)]
    pub config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the partitions, deploy the image and add a boot entry
    Deploy(DeployArgs),

    /// Remove the boot entries and partitions and return the space
    Recover(RecoverArgs),

    /// Show what is currently provisioned
    Status(StatusArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Load the boot image into memory
    Ramdisk,
    /// Boot the extracted image tree
    Extracted,
    /// Hand the image file to a chained loader
    Chainload,
}

impl From<ModeArg> for BootMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Ramdisk => BootMode::Ramdisk,
            ModeArg::Extracted => BootMode::Extracted,
            ModeArg::Chainload => BootMode::Chainload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Ntfs,
    Fat32,
    Exfat,
}

impl From<FormatArg> for FilesystemFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Ntfs => FilesystemFormat::Ntfs,
            FormatArg::Fat32 => FilesystemFormat::Fat32,
            FormatArg::Exfat => FilesystemFormat::Exfat,
        }
    }
}

// Deploy command
#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Disc image to provision
    pub image: Utf8PathBuf,

    /// Boot mode
    #[arg(short, long, value_enum, default_value = "ramdisk")]
    pub mode: ModeArg,

    /// Filesystem for the data partition
    #[arg(short, long, value_enum, default_value = "ntfs")]
    pub format: FormatArg,

    /// Skip the system volume check before shrinking it
    #[arg(long)]
    pub skip_integrity_check: bool,

    /// Restart into the new entry without asking
    #[arg(long, conflicts_with = "no_restart")]
    pub restart: bool,

    /// Never offer to restart
    #[arg(long)]
    pub no_restart: bool,
}

// Recover command
#[derive(Args, Debug)]
pub struct RecoverArgs {
    /// Skip confirmation
    #[arg(short, long)]
    pub force: bool,
}

// Status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Also list every value of the product boot entries
    #[arg(long)]
    pub entries: bool,
}
