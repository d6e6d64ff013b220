//! Content fingerprints of source images
//!
//! A deployment leaves a small ordered text record on the data partition:
//!
//! ```text
//! <sha256 of the image>
//! <producing version>
//! <boot mode key>
//! <filesystem format>
//! [<drivers injected flag>]
//! ```
//!
//! A later run compares the record against the current request to decide
//! whether reformatting and copying can be skipped.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

use isoboot_core::constants::{FINGERPRINT_FILE_NAME, PRODUCING_VERSION};
use isoboot_core::{BootMode, FilesystemFormat, Result};

/// Hex-encoded SHA-256 of the image file
pub fn image_hash(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(1024 * 1024, file);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Location of the record on a data partition
pub fn record_path(data_root: &Path) -> PathBuf {
    data_root.join(FINGERPRINT_FILE_NAME)
}

/// Persisted description of the last successful deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintRecord {
    pub content_hash: String,
    pub producing_version: String,
    pub boot_mode: String,
    pub filesystem_format: String,
    pub drivers_injected: bool,
}

impl FingerprintRecord {
    /// Record for a deployment produced by this build
    pub fn new(content_hash: impl Into<String>, mode: BootMode, format: FilesystemFormat) -> Self {
        Self {
            content_hash: content_hash.into(),
            producing_version: PRODUCING_VERSION.to_string(),
            boot_mode: mode.key().to_string(),
            filesystem_format: format.as_str().to_string(),
            drivers_injected: false,
        }
    }

    pub fn with_drivers_injected(mut self, injected: bool) -> Self {
        self.drivers_injected = injected;
        self
    }

    /// Parse record text; `None` when the first line is empty
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines().map(str::trim);
        let content_hash = lines.next().unwrap_or_default().to_string();
        if content_hash.is_empty() {
            return None;
        }
        let mut next = || lines.next().unwrap_or_default().to_string();
        let producing_version = next();
        let boot_mode = next();
        let filesystem_format = next();
        let drivers_injected = matches!(next().to_ascii_lowercase().as_str(), "1" | "true" | "yes");

        Some(Self {
            content_hash,
            producing_version,
            boot_mode,
            filesystem_format,
            drivers_injected,
        })
    }

    /// Read the record at `path`; a missing or empty file is "no record"
    pub fn read(path: &Path) -> Option<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) => {
                debug!("No fingerprint record at {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn to_text(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n",
            self.content_hash,
            self.producing_version,
            self.boot_mode,
            self.filesystem_format,
            if self.drivers_injected { "1" } else { "0" }
        )
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_text())?;
        Ok(())
    }

    /// Reuse test for the validate stage: same image, same filesystem
    pub fn matches_format(&self, hash: &str, format: FilesystemFormat) -> bool {
        !self.content_hash.is_empty()
            && self.content_hash == hash
            && self.filesystem_format.eq_ignore_ascii_case(format.as_str())
    }

    /// Skip test for the copy stage: same image, build, mode and filesystem
    pub fn matches_deployment(&self, hash: &str, mode: BootMode, format: FilesystemFormat) -> bool {
        self.matches_format(hash, format)
            && self.producing_version == PRODUCING_VERSION
            && self.boot_mode == mode.key()
    }
}
