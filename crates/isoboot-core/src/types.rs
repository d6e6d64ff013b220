//! Shared domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::Error;

/// Boot mode selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootMode {
    /// Boot-time image loaded into memory, install payload staged separately
    Ramdisk,
    /// Full image tree extracted and booted directly
    Extracted,
    /// Hand off to a secondary EFI loader that loop-mounts the image
    Chainload,
}

impl BootMode {
    /// All modes, in menu order
    pub const ALL: [BootMode; 3] = [BootMode::Ramdisk, BootMode::Extracted, BootMode::Chainload];

    /// Parse a mode key, rejecting anything unknown
    pub fn from_key(key: &str) -> crate::Result<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "ramdisk" => Ok(BootMode::Ramdisk),
            "extracted" => Ok(BootMode::Extracted),
            "chainload" => Ok(BootMode::Chainload),
            _ => Err(Error::invalid_boot_mode(key)),
        }
    }

    /// Stable key persisted in the fingerprint record
    pub fn key(&self) -> &'static str {
        match self {
            BootMode::Ramdisk => "ramdisk",
            BootMode::Extracted => "extracted",
            BootMode::Chainload => "chainload",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            BootMode::Ramdisk => "Boot from memory",
            BootMode::Extracted => "Full installation",
            BootMode::Chainload => "Chainload image",
        }
    }
}

impl fmt::Display for BootMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Filesystem used for the data partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilesystemFormat {
    Ntfs,
    Fat32,
    Exfat,
}

impl FilesystemFormat {
    /// Name as understood by format tools and persisted in the fingerprint record
    pub fn as_str(&self) -> &'static str {
        match self {
            FilesystemFormat::Ntfs => "NTFS",
            FilesystemFormat::Fat32 => "FAT32",
            FilesystemFormat::Exfat => "EXFAT",
        }
    }
}

impl fmt::Display for FilesystemFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FilesystemFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NTFS" => Ok(FilesystemFormat::Ntfs),
            "FAT32" => Ok(FilesystemFormat::Fat32),
            "EXFAT" => Ok(FilesystemFormat::Exfat),
            _ => Err(Error::InvalidFormat {
                format: s.to_string(),
            }),
        }
    }
}

/// One pipeline invocation. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRequest {
    pub image_path: PathBuf,
    pub format: FilesystemFormat,
    /// Raw mode key; validated by the stages that use it
    pub mode_key: String,
    pub mode_label: String,
    pub skip_integrity_check: bool,
}

impl PipelineRequest {
    pub fn new(image_path: impl Into<PathBuf>, format: FilesystemFormat, mode: BootMode) -> Self {
        Self {
            image_path: image_path.into(),
            format,
            mode_key: mode.key().to_string(),
            mode_label: mode.label().to_string(),
            skip_integrity_check: false,
        }
    }

    pub fn with_skip_integrity_check(mut self, skip: bool) -> Self {
        self.skip_integrity_check = skip;
        self
    }
}

/// Resolved roots of the data and firmware partitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveBinding {
    pub data: PathBuf,
    pub firmware: PathBuf,
}

/// Firmware the running system booted with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareKind {
    Uefi,
    Legacy,
}

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ValidateAndPrepare,
    CopyIsoContent,
    ConfigureBoot,
}

impl Stage {
    pub const ALL: [Stage; 3] = [
        Stage::ValidateAndPrepare,
        Stage::CopyIsoContent,
        Stage::ConfigureBoot,
    ];

    pub fn description(&self) -> &'static str {
        match self {
            Stage::ValidateAndPrepare => "Preparing partitions",
            Stage::CopyIsoContent => "Deploying image content",
            Stage::ConfigureBoot => "Configuring boot entry",
        }
    }
}

/// Byte-level progress of one copy operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub bytes_copied: u64,
    pub bytes_total: u64,
    pub operation: String,
}

impl ProgressEvent {
    /// The zero/zero event observers treat as "progress finished"
    pub fn clear() -> Self {
        Self {
            bytes_copied: 0,
            bytes_total: 0,
            operation: String::new(),
        }
    }

    pub fn is_clear(&self) -> bool {
        self.bytes_total == 0 && self.bytes_copied == 0
    }
}

/// Drive designator used in boot store and tool commands (`Z:`).
///
/// Non drive-letter roots (used in tests) are rendered as their path without a
/// trailing separator.
pub fn drive_spec(root: &Path) -> String {
    let text = root.to_string_lossy();
    let bytes = text.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return text[..2].to_ascii_uppercase();
    }
    text.trim_end_matches(['\\', '/']).to_string()
}

/// Root path for a drive letter (`Z` -> `Z:\`)
pub fn drive_root(letter: char) -> PathBuf {
    PathBuf::from(format!("{}:\\", letter.to_ascii_uppercase()))
}
