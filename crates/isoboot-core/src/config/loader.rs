//! Configuration file loading and parsing

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::events::DEFAULT_QUEUE_CAPACITY;

/// Configuration file names to search for
pub const CONFIG_FILE_NAMES: &[&str] = &["isoboot.yaml", "isoboot.yml"];

/// Tunables and tool locations. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory for the per-area diagnostic logs
    pub log_dir: PathBuf,

    /// Boot store tool
    pub bcdedit: String,

    /// Shell used for disk and image queries
    pub powershell: String,

    /// Image servicing tool used on the boot-time image
    pub dism: String,

    /// Delay after mounting before the image tree is read
    pub mount_settle_secs: u64,

    /// Size the firmware partition must have to be reused
    pub required_efi_size_mb: u64,

    /// Free space needed on the system disk to create the partitions
    pub min_system_free_gb: u64,

    /// Free space needed on the firmware partition
    pub min_firmware_free_mb: u64,

    /// Boot menu timeout written after the entry is created
    pub boot_menu_timeout_secs: u32,

    /// Replaces the bundled EFI chain-loader for chainload mode
    pub chainloader_path: Option<PathBuf>,

    /// Directory holding the installed system's EFI boot manager, used when
    /// an image brings no usable removable-media loader
    pub system_loader_dir: PathBuf,

    /// Driver repository whose storage, USB and network drivers are added to
    /// the boot-time image; skipped when absent
    pub driver_store: Option<PathBuf>,

    /// Extra driver directories added to the boot-time image
    pub driver_dirs: Vec<PathBuf>,

    /// Per-subscriber event queue depth
    pub event_queue_capacity: usize,

    /// Volume identifier lookups before giving up
    pub volume_id_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_dir: install_dir()
                .map(|dir| dir.join("logs"))
                .or_else(|| dirs::data_local_dir().map(|dir| dir.join("isoboot").join("logs")))
                .unwrap_or_else(|| PathBuf::from("logs")),
            bcdedit: "bcdedit".to_string(),
            powershell: "powershell".to_string(),
            dism: "dism".to_string(),
            mount_settle_secs: 5,
            required_efi_size_mb: 500,
            min_system_free_gb: 10,
            min_firmware_free_mb: 100,
            boot_menu_timeout_secs: 30,
            chainloader_path: None,
            system_loader_dir: PathBuf::from(r"C:\Windows\Boot\EFI"),
            driver_store: Some(PathBuf::from(
                r"C:\Windows\System32\DriverStore\FileRepository",
            )),
            driver_dirs: Vec::new(),
            event_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            volume_id_attempts: 3,
        }
    }
}

impl Settings {
    pub fn mount_settle_delay(&self) -> Duration {
        Duration::from_secs(self.mount_settle_secs)
    }

    /// Reject values that can never work
    pub fn validate(&self) -> Result<()> {
        if self.required_efi_size_mb == 0 {
            return Err(Error::invalid_config("required_efi_size_mb must be positive"));
        }
        if self.event_queue_capacity == 0 {
            return Err(Error::invalid_config("event_queue_capacity must be positive"));
        }
        if self.volume_id_attempts == 0 {
            return Err(Error::invalid_config("volume_id_attempts must be at least 1"));
        }
        if self.bcdedit.trim().is_empty()
            || self.powershell.trim().is_empty()
            || self.dism.trim().is_empty()
        {
            return Err(Error::invalid_config("tool paths must not be empty"));
        }
        Ok(())
    }
}

fn install_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
}

/// Loaded configuration
#[derive(Debug, Clone, Default)]
pub struct IsobootConfig {
    pub settings: Settings,

    /// File the settings came from, if any
    pub config_path: Option<Utf8PathBuf>,
}

impl IsobootConfig {
    /// Load configuration from the specified path, or search the working directory.
    ///
    /// An explicit path that does not exist is an error; a search that finds
    /// nothing yields the defaults.
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let found = match path {
            Some(p) => {
                let content = fs::read_to_string(p).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        Error::config_not_found(p.as_str())
                    } else {
                        Error::Io(e)
                    }
                })?;
                Some((p.to_owned(), content))
            }
            None => Self::find_config(Utf8Path::new("."))?,
        };

        let Some((config_path, content)) = found else {
            debug!("No configuration file found, using defaults");
            return Ok(Self::default());
        };

        let settings = Self::parse(&content)?;
        debug!("Loaded configuration from {}", config_path);
        Ok(Self {
            settings,
            config_path: Some(config_path),
        })
    }

    /// Parse and validate YAML content
    pub fn parse(content: &str) -> Result<Settings> {
        let settings: Settings = if content.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml_ng::from_str(content)?
        };
        settings.validate()?;
        Ok(settings)
    }

    fn find_config(dir: &Utf8Path) -> Result<Option<(Utf8PathBuf, String)>> {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.is_file() {
                let content = fs::read_to_string(&candidate)?;
                return Ok(Some((candidate, content)));
            }
        }
        Ok(None)
    }
}
