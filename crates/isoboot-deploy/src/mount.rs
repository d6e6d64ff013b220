//! Image mount service

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use isoboot_core::command::{args, CommandRunner};
use isoboot_core::types::drive_root;
use isoboot_core::{AreaLog, Error, Result};

/// Mounts and dismounts disc images
pub trait ImageMounter: Send + Sync {
    /// Mount `image` and return the root of the assigned drive
    fn mount(&self, image: &Path) -> Result<PathBuf>;

    fn dismount(&self, image: &Path) -> Result<()>;
}

/// Mounts images with the `Mount-DiskImage` PowerShell cmdlets
pub struct PowerShellMounter {
    runner: Arc<dyn CommandRunner>,
    powershell: String,
    log: AreaLog,
}

impl PowerShellMounter {
    pub fn new(runner: Arc<dyn CommandRunner>, powershell: impl Into<String>, log: AreaLog) -> Self {
        Self {
            runner,
            powershell: powershell.into(),
            log,
        }
    }

    fn powershell(&self, script: &str) -> Result<String> {
        let argv = args(["-NoProfile", "-NonInteractive", "-Command", script]);
        let output = self.runner.run(&self.powershell, &argv)?;
        let text = output.text();
        self.log.command(&format!("{} -Command {}", self.powershell, script), &text);
        Ok(text)
    }
}

fn quote(path: &Path) -> String {
    path.display().to_string().replace('\'', "''")
}

/// First drive letter token in mount output; `FAILED` means no volume
pub fn parse_drive_letter(output: &str) -> Option<char> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.eq_ignore_ascii_case("FAILED"))
        .find_map(|line| {
            let mut chars = line.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => Some(c.to_ascii_uppercase()),
                (Some(c), Some(':')) if c.is_ascii_alphabetic() => Some(c.to_ascii_uppercase()),
                _ => None,
            }
        })
}

impl ImageMounter for PowerShellMounter {
    fn mount(&self, image: &Path) -> Result<PathBuf> {
        let path = quote(image);
        let script = format!(
            "$iso = Mount-DiskImage -ImagePath '{path}' -PassThru; \
             $volume = Get-DiskImage -ImagePath '{path}' | Get-Volume; \
             if ($volume) {{ $volume.DriveLetter }} else {{ 'FAILED' }}"
        );
        let output = self.powershell(&script)?;

        let letter = parse_drive_letter(&output).ok_or_else(|| {
            Error::mount(
                image.display().to_string(),
                format!("no drive letter assigned ({})", output.trim()),
            )
        })?;
        info!("Mounted {} at {}:", image.display(), letter);
        Ok(drive_root(letter))
    }

    fn dismount(&self, image: &Path) -> Result<()> {
        let script = format!("Dismount-DiskImage -ImagePath '{}'", quote(image));
        let output = self.powershell(&script)?;
        let trimmed = output.trim();

        // The cmdlet prints the image object on success and an error record otherwise
        let lower = trimmed.to_ascii_lowercase();
        if trimmed.is_empty()
            || lower.contains("successfully")
            || (lower.contains("attached") && lower.contains("false"))
        {
            debug!("Dismounted {}", image.display());
            Ok(())
        } else {
            Err(Error::dismount(image.display().to_string(), trimmed))
        }
    }
}

/// Dismounts the image when dropped unless dismounted explicitly first
pub struct MountGuard<'a> {
    mounter: &'a dyn ImageMounter,
    image: PathBuf,
    root: PathBuf,
    active: bool,
}

impl<'a> MountGuard<'a> {
    pub fn mount(mounter: &'a dyn ImageMounter, image: &Path) -> Result<Self> {
        let root = mounter.mount(image)?;
        Ok(Self {
            mounter,
            image: image.to_path_buf(),
            root,
            active: true,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Dismount now and report the outcome
    pub fn dismount(mut self) -> Result<()> {
        self.active = false;
        self.mounter.dismount(&self.image)
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.mounter.dismount(&self.image) {
                warn!("Dismount of {} after failure did not complete: {}", self.image.display(), e);
            }
        }
    }
}
