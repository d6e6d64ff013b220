//! Boot strategies
//!
//! Each strategy is a pure mapping from a [`StrategyTarget`] to the ordered
//! store commands that shape the entry, plus a check run against the entry
//! as read back from the store.

use std::fmt;

use isoboot_core::{BootMode, Error, FirmwareKind, Result};

use crate::chainload::CHAINLOADER_ENTRY_PATH;
use crate::store::entry_value;

/// Shared ramdisk options object
pub const RAMDISK_OPTIONS: &str = "{ramdiskoptions}";

/// Boot-time image staged on the data partition
pub const RAMDISK_IMAGE: &str = r"\sources\boot.wim";

/// SDI descriptor staged on the data partition
pub const RAMDISK_SDI: &str = r"\boot\boot.sdi";

pub const UEFI_OS_LOADER: &str = r"\windows\system32\boot\winload.efi";
pub const LEGACY_OS_LOADER: &str = r"\windows\system32\winload.exe";

/// Boot manager at the root of an extracted tree
pub const EXTRACTED_BOOT_MANAGER: &str = r"\bootmgr.efi";

/// Everything a strategy needs to know about the new entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyTarget {
    /// Identifier of the freshly copied entry
    pub entry_id: String,
    /// Data partition drive spec, e.g. `Z:`
    pub data_drive: String,
    /// Firmware partition drive spec, e.g. `Y:`
    pub firmware_drive: String,
    pub data_volume_id: String,
    pub firmware_volume_id: String,
    /// Loader found on the firmware partition, relative to its root
    pub loader_path: String,
    /// The extracted tree carries its boot manager at the data root
    pub boot_manager_on_data: bool,
    pub firmware: FirmwareKind,
}

/// One store mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootCommand {
    pub args: Vec<String>,
    /// An "already exists" reply is success
    pub tolerate_existing: bool,
}

impl BootCommand {
    fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: items.into_iter().map(Into::into).collect(),
            tolerate_existing: false,
        }
    }

    fn set(identifier: &str, key: &str, value: &str) -> Self {
        Self::new(["/set", identifier, key, value])
    }

    fn tolerating_existing(mut self) -> Self {
        self.tolerate_existing = true;
        self
    }
}

impl fmt::Display for BootCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.args.join(" "))
    }
}

/// How the product entry boots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootStrategy {
    Ramdisk,
    Extracted,
    Chainload,
}

impl BootStrategy {
    pub const ALL: [BootStrategy; 3] = [
        BootStrategy::Ramdisk,
        BootStrategy::Extracted,
        BootStrategy::Chainload,
    ];

    /// Descriptions of every entry this tool creates
    pub fn entry_labels() -> [&'static str; 3] {
        Self::ALL.map(|strategy| strategy.entry_label())
    }

    pub fn from_mode(mode: BootMode) -> Self {
        match mode {
            BootMode::Ramdisk => BootStrategy::Ramdisk,
            BootMode::Extracted => BootStrategy::Extracted,
            BootMode::Chainload => BootStrategy::Chainload,
        }
    }

    /// Resolve a mode key; unknown keys are an invalid boot mode
    pub fn from_key(key: &str) -> Result<Self> {
        BootMode::from_key(key).map(Self::from_mode)
    }

    pub fn mode(&self) -> BootMode {
        match self {
            BootStrategy::Ramdisk => BootMode::Ramdisk,
            BootStrategy::Extracted => BootMode::Extracted,
            BootStrategy::Chainload => BootMode::Chainload,
        }
    }

    /// Description given to the entry
    pub fn entry_label(&self) -> &'static str {
        match self {
            BootStrategy::Ramdisk => "ISOBOOT_RAM",
            BootStrategy::Extracted => "ISOBOOT",
            BootStrategy::Chainload => "ISOBOOT_CHAIN",
        }
    }

    /// WinPE still needs `systemroot`; other entries drop the inherited value
    pub fn retains_system_root(&self) -> bool {
        matches!(self, BootStrategy::Ramdisk)
    }

    /// Chain-loader binary and script must be on the firmware partition first
    pub fn needs_chainload_staging(&self) -> bool {
        matches!(self, BootStrategy::Chainload)
    }

    /// Value the entry's `path` will hold
    pub fn entry_path(&self, target: &StrategyTarget) -> String {
        let path = match self {
            BootStrategy::Ramdisk => match target.firmware {
                FirmwareKind::Uefi => UEFI_OS_LOADER,
                FirmwareKind::Legacy => LEGACY_OS_LOADER,
            },
            BootStrategy::Extracted if target.boot_manager_on_data => EXTRACTED_BOOT_MANAGER,
            BootStrategy::Extracted => target.loader_path.as_str(),
            BootStrategy::Chainload => CHAINLOADER_ENTRY_PATH,
        };
        path.to_string()
    }

    /// Partition the entry's `device` will name
    fn entry_device(&self, target: &StrategyTarget) -> String {
        match self {
            BootStrategy::Extracted if target.boot_manager_on_data => {
                format!("partition={}", target.data_drive)
            }
            _ => format!("partition={}", target.firmware_drive),
        }
    }

    /// Ordered store commands for this strategy
    pub fn commands(&self, target: &StrategyTarget) -> Vec<BootCommand> {
        let id = target.entry_id.as_str();
        let path = self.entry_path(target);

        match self {
            BootStrategy::Ramdisk => {
                let data_partition = format!("partition={}", target.data_drive);
                let ramdisk = format!(
                    "ramdisk=[{}]{},{}",
                    target.data_drive, RAMDISK_IMAGE, RAMDISK_OPTIONS
                );
                vec![
                    BootCommand::new(["/create", RAMDISK_OPTIONS, "/d", "Ramdisk Options"])
                        .tolerating_existing(),
                    BootCommand::set(RAMDISK_OPTIONS, "ramdisksdidevice", &data_partition),
                    BootCommand::set(RAMDISK_OPTIONS, "ramdisksdipath", RAMDISK_SDI),
                    BootCommand::set(id, "device", &ramdisk),
                    BootCommand::set(id, "osdevice", &ramdisk),
                    BootCommand::set(id, "path", &path),
                    BootCommand::set(id, "systemroot", r"\windows"),
                    BootCommand::set(id, "winpe", "yes"),
                    BootCommand::set(id, "detecthal", "yes"),
                ]
            }
            BootStrategy::Extracted => {
                // Without a boot manager on the data root the firmware copy boots it
                let data_partition = format!("partition={}", target.data_drive);
                vec![
                    BootCommand::set(id, "device", &self.entry_device(target)),
                    BootCommand::set(id, "osdevice", &data_partition),
                    BootCommand::set(id, "path", &path),
                ]
            }
            BootStrategy::Chainload => {
                let firmware_partition = self.entry_device(target);
                vec![
                    BootCommand::set(id, "device", &firmware_partition),
                    BootCommand::set(id, "osdevice", &firmware_partition),
                    BootCommand::set(id, "path", &path),
                    BootCommand::set(id, "winpe", "no"),
                    BootCommand::set(id, "detecthal", "no"),
                    BootCommand::set(id, "ems", "no"),
                ]
            }
        }
    }

    /// Check the entry as read back. `read_entry` returns `/enum <id>` text.
    pub fn verify<F>(&self, target: &StrategyTarget, read_entry: F) -> Result<()>
    where
        F: Fn(&str) -> Result<String>,
    {
        let id = target.entry_id.as_str();
        let text = read_entry(id)?;
        let fail = |message: String| Err(Error::verification(id, message));

        let device = entry_value(&text, "device").unwrap_or_default();
        let path = entry_value(&text, "path").unwrap_or_default();
        let expected_path = self.entry_path(target);
        if !path.eq_ignore_ascii_case(&expected_path) {
            return fail(format!("path is '{}', expected '{}'", path, expected_path));
        }

        match self {
            BootStrategy::Ramdisk => {
                let lower = device.to_ascii_lowercase();
                if !lower.contains("ramdisk=") || !lower.contains("boot.wim") {
                    return fail(format!("device '{}' is not a boot.wim ramdisk", device));
                }
                if !text.to_ascii_lowercase().contains(RAMDISK_OPTIONS) {
                    return fail(format!("{} reference missing", RAMDISK_OPTIONS));
                }
                let options = read_entry(RAMDISK_OPTIONS)?;
                let sdi = entry_value(&options, "ramdisksdipath").unwrap_or_default();
                if !sdi.to_ascii_lowercase().contains("boot.sdi") {
                    return Err(Error::verification(
                        RAMDISK_OPTIONS,
                        format!("ramdisksdipath is '{}'", sdi),
                    ));
                }
            }
            BootStrategy::Extracted | BootStrategy::Chainload => {
                let expected = self.entry_device(target);
                if !device.eq_ignore_ascii_case(&expected) {
                    return fail(format!("device is '{}', expected '{}'", device, expected));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for BootStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mode().label())
    }
}
