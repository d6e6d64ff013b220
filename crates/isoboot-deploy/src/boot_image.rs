//! Boot-time image servicing
//!
//! For an extracted installable OS the boot-time image on the data partition
//! is mounted with DISM, receives storage, USB and network drivers, gets a
//! startup script if it has none, and gives up the boot files that the
//! extracted layout boots from. Any change is committed; an untouched image is
//! discarded so the file stays byte-identical.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use isoboot_core::command::{args, command_line};
use isoboot_core::{AreaLog, CommandRunner, Error, EventBus, Result};

use crate::copy::{ByteTally, Exclusions, TreeCopier};
use crate::engine::{find_child, find_path, resolve_path};

/// Mount point for the boot-time image, under the data partition
pub const MOUNT_DIR_NAME: &str = "temp_mount";
/// Driver folder the user can drop extra drivers into
pub const CUSTOM_DRIVERS_DIR: &str = "CustomDrivers";
/// Where matching system drivers are gathered before injection
pub const DRIVER_STAGING_DIR: &str = "drivers_staging";

const STARTNET_SCRIPT: &str = "@echo off\r\nwpeinit\r\n";

/// Driver store folders worth carrying into the boot-time image
struct DriverClass {
    prefixes: &'static [&'static str],
    tokens: &'static [&'static str],
}

const DRIVER_CLASSES: &[DriverClass] = &[
    // Storage controllers
    DriverClass {
        prefixes: &["storahci", "stornvme", "msahci", "iastor", "iaahci"],
        tokens: &[
            "nvme", "ahci", "rst", "vmd", "raid", "scsi", "ide", "disk", "storage", "sata",
            "pciide", "atapi",
        ],
    },
    // USB host controllers
    DriverClass {
        prefixes: &["usb", "xhci"],
        tokens: &["iusb3", "usb3", "xhc", "amdhub3", "amdxhc", "intelusb3"],
    },
    // Network adapters
    DriverClass {
        prefixes: &["net", "vwifi", "vwlan"],
        tokens: &["wifi", "wlan", "wwan"],
    },
];

/// One image listed inside a WIM file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WimImage {
    pub index: u32,
    pub name: String,
}

/// Result of servicing the boot-time image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootImageReport {
    /// Image index that was mounted
    pub index: u32,
    /// At least one driver folder was added
    pub drivers_injected: bool,
    /// The startup script had to be written
    pub startnet_written: bool,
    /// Changes were committed back into the WIM
    pub committed: bool,
    /// Boot files pulled out of the mounted image
    pub boot_files: u64,
}

/// Parse `dism /Get-WimInfo` output into its listed images
pub fn parse_wim_info(text: &str) -> Vec<WimImage> {
    let mut images = Vec::new();
    let mut index: Option<u32> = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "index" => index = value.parse().ok(),
            "name" => {
                if let Some(index) = index.take() {
                    images.push(WimImage {
                        index,
                        name: value.to_string(),
                    });
                }
            }
            _ => {}
        }
    }
    images
}

/// The setup image when one is named, else the second image, else the first
pub fn select_index(images: &[WimImage]) -> u32 {
    if let Some(setup) = images
        .iter()
        .find(|i| i.name.to_ascii_lowercase().contains("setup"))
    {
        return setup.index;
    }
    if images.len() >= 2 {
        2
    } else {
        1
    }
}

/// Whether a driver store folder belongs to a class carried into the image
pub fn is_boot_critical_driver(folder: &str) -> bool {
    let name = folder.to_ascii_lowercase();
    let tokens: Vec<&str> = name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    DRIVER_CLASSES.iter().any(|class| {
        class.prefixes.iter().any(|p| name.starts_with(p))
            || tokens.iter().any(|t| class.tokens.contains(t))
    })
}

pub struct BootImageProcessor {
    runner: Arc<dyn CommandRunner>,
    dism: String,
    driver_store: Option<PathBuf>,
    driver_dirs: Vec<PathBuf>,
    events: EventBus,
    trace: AreaLog,
}

impl BootImageProcessor {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        dism: impl Into<String>,
        events: EventBus,
        trace: AreaLog,
    ) -> Self {
        Self {
            runner,
            dism: dism.into(),
            driver_store: None,
            driver_dirs: Vec::new(),
            events,
            trace,
        }
    }

    /// System driver repository scanned for boot-critical drivers
    pub fn with_driver_store(mut self, store: Option<PathBuf>) -> Self {
        self.driver_store = store;
        self
    }

    /// Extra driver folders injected as-is
    pub fn with_driver_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.driver_dirs = dirs;
        self
    }

    /// Mount `wim`, service it, and unmount it again.
    ///
    /// Boot files are copied onto `data` and `firmware`. A failure after the
    /// mount discards every change before the error is returned.
    pub fn process(
        &self,
        wim: &Path,
        data: &Path,
        firmware: &Path,
        copier: &TreeCopier,
    ) -> Result<BootImageReport> {
        self.events.log("Processing boot image");
        let mount_dir = data.join(MOUNT_DIR_NAME);
        self.prepare_mount_dir(&mount_dir)?;

        let info = self.dism(&args([
            "/Get-WimInfo".to_string(),
            format!("/WimFile:{}", wim.display()),
        ]))?;
        if !info.success() {
            self.remove_dir(&mount_dir);
            return Err(Error::boot_image(format!(
                "cannot list images in {}: {}",
                wim.display(),
                info.text().trim()
            )));
        }
        let images = parse_wim_info(&info.stdout);
        let index = select_index(&images);
        self.trace.line(format!(
            "Boot image lists {} image(s), mounting index {}",
            images.len(),
            index
        ));

        let mounted = self.dism(&args([
            "/Mount-Wim".to_string(),
            format!("/WimFile:{}", wim.display()),
            format!("/index:{}", index),
            format!("/MountDir:{}", mount_dir.display()),
        ]))?;
        if !mounted.success() {
            self.remove_dir(&mount_dir);
            return Err(Error::boot_image(format!(
                "cannot mount index {} of {}: {}",
                index,
                wim.display(),
                mounted.text().trim()
            )));
        }

        let result = self.service(&mount_dir, data, firmware, copier);
        let report = match result {
            Ok(mut report) => {
                report.index = index;
                let changed = report.drivers_injected || report.startnet_written;
                match self.unmount(&mount_dir, changed) {
                    Ok(committed) => report.committed = committed,
                    Err(e) => {
                        self.cleanup(&mount_dir, data);
                        return Err(e);
                    }
                }
                report
            }
            Err(e) => {
                warn!("Boot image servicing failed: {}", e);
                self.trace
                    .line(format!("ERROR: boot image servicing failed: {}", e));
                // Best effort, the original error is what matters
                let _ = self.unmount(&mount_dir, false);
                self.cleanup(&mount_dir, data);
                return Err(e);
            }
        };
        self.cleanup(&mount_dir, data);

        info!(
            "Boot image index {} processed (drivers injected: {}, committed: {})",
            report.index, report.drivers_injected, report.committed
        );
        Ok(report)
    }

    fn service(
        &self,
        mount_dir: &Path,
        data: &Path,
        firmware: &Path,
        copier: &TreeCopier,
    ) -> Result<BootImageReport> {
        let mut report = BootImageReport {
            boot_files: self.extract_boot_files(mount_dir, data, firmware, copier),
            ..BootImageReport::default()
        };

        for source in self.driver_sources(data, copier) {
            if self.add_driver(mount_dir, &source)? {
                report.drivers_injected = true;
            }
        }

        report.startnet_written = self.ensure_startnet(mount_dir)?;
        Ok(report)
    }

    fn prepare_mount_dir(&self, mount_dir: &Path) -> Result<()> {
        if mount_dir.exists() {
            // Left behind by an interrupted run
            self.trace.line(format!(
                "Stale mount directory {} found, discarding",
                mount_dir.display()
            ));
            let _ = self.unmount(mount_dir, false);
            fs::remove_dir_all(mount_dir).map_err(|e| {
                Error::boot_image(format!(
                    "cannot clear mount directory {}: {}",
                    mount_dir.display(),
                    e
                ))
            })?;
        }
        fs::create_dir_all(mount_dir).map_err(|e| {
            Error::boot_image(format!(
                "cannot create mount directory {}: {}",
                mount_dir.display(),
                e
            ))
        })
    }

    /// Copy the loader, store and SDI out of the mounted image. Missing or
    /// unreadable files are logged and skipped.
    fn extract_boot_files(
        &self,
        mount_dir: &Path,
        data: &Path,
        firmware: &Path,
        copier: &TreeCopier,
    ) -> u64 {
        let loader = ["Windows", "Boot", "EFI", "bootmgfw.efi"];
        let singles: [(&[&str], PathBuf); 5] = [
            (&loader, data.join("bootmgr.efi")),
            (&["Boot", "BCD"], resolve_path(data, &["boot", "bcd"])),
            (&["Boot", "boot.sdi"], resolve_path(data, &["boot", "boot.sdi"])),
            (
                &["Windows", "Boot", "EFI", "bootx64.efi"],
                resolve_path(firmware, &["EFI", "BOOT", "BOOTX64.EFI"]),
            ),
            (
                &loader,
                resolve_path(firmware, &["EFI", "Microsoft", "Boot", "bootmgfw.efi"]),
            ),
        ];

        let files: Vec<(PathBuf, PathBuf)> = singles
            .into_iter()
            .filter_map(|(parts, dest)| {
                let found = find_path(mount_dir, parts);
                if found.is_none() {
                    self.trace
                        .line(format!("Not in boot image: {}", parts.join("\\")));
                }
                found.map(|src| (src, dest))
            })
            .collect();

        // Nothing here is counted against the image size
        let mut tally = ByteTally::new(0);
        let mut copied = 0;
        match copier.copy_files(&files, "Extracting boot files", &mut tally) {
            Ok(stats) => copied += stats.files,
            Err(e) => {
                warn!("Could not extract boot files: {}", e);
                self.trace
                    .line(format!("WARNING: could not extract boot files: {}", e));
            }
        }

        for (folder, dest) in [("Fonts", "fonts"), ("Resources", "resources")] {
            let Some(src) = find_path(mount_dir, &["Windows", "Boot", folder]) else {
                continue;
            };
            match copier.copy_tree(
                &src,
                &resolve_path(data, &["boot", dest]),
                &Exclusions::none(),
                "Extracting boot files",
                &mut tally,
            ) {
                Ok(stats) => copied += stats.files,
                Err(e) => {
                    self.trace
                        .line(format!("WARNING: could not copy boot {}: {}", dest, e));
                }
            }
        }
        copied
    }

    /// Configured folders, then user drop-ins, then staged system drivers
    fn driver_sources(&self, data: &Path, copier: &TreeCopier) -> Vec<PathBuf> {
        let mut sources: Vec<PathBuf> = self
            .driver_dirs
            .iter()
            .filter(|dir| {
                let present = dir.is_dir();
                if !present {
                    self.trace
                        .line(format!("Driver folder {} not found", dir.display()));
                }
                present
            })
            .cloned()
            .collect();

        if let Some(custom) = find_child(data, CUSTOM_DRIVERS_DIR).filter(|p| p.is_dir()) {
            sources.push(custom);
        }
        if let Some(staged) = self.stage_system_drivers(data, copier) {
            sources.push(staged);
        }
        sources
    }

    fn stage_system_drivers(&self, data: &Path, copier: &TreeCopier) -> Option<PathBuf> {
        let store = self.driver_store.as_ref()?;
        let entries = match fs::read_dir(store) {
            Ok(entries) => entries,
            Err(e) => {
                self.trace.line(format!(
                    "Driver store {} not readable: {}",
                    store.display(),
                    e
                ));
                return None;
            }
        };

        let staging = data.join(DRIVER_STAGING_DIR);
        let mut tally = ByteTally::new(0);
        let mut staged = 0usize;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.path().is_dir() || !is_boot_critical_driver(&name) {
                continue;
            }
            match copier.copy_tree(
                &entry.path(),
                &staging.join(&name),
                &Exclusions::none(),
                "Staging drivers",
                &mut tally,
            ) {
                Ok(_) => staged += 1,
                Err(e) => debug!("Skipping driver {}: {}", name, e),
            }
        }

        self.trace
            .line(format!("Staged {} system driver folder(s)", staged));
        (staged > 0).then_some(staging)
    }

    /// Add one driver folder, retrying unsigned drivers
    fn add_driver(&self, mount_dir: &Path, source: &Path) -> Result<bool> {
        let base = args([
            format!("/Image:{}", mount_dir.display()),
            "/Add-Driver".to_string(),
            format!("/Driver:{}", source.display()),
            "/Recurse".to_string(),
        ]);
        if self.dism(&base)?.success() {
            self.events
                .log(format!("Drivers added from {}", source.display()));
            return Ok(true);
        }

        let mut forced = base;
        forced.push("/ForceUnsigned".to_string());
        let output = self.dism(&forced)?;
        if output.success() {
            self.events
                .log(format!("Unsigned drivers added from {}", source.display()));
            Ok(true)
        } else {
            warn!("No drivers added from {}", source.display());
            self.trace.line(format!(
                "WARNING: no drivers added from {}: {}",
                source.display(),
                output.text().trim()
            ));
            Ok(false)
        }
    }

    /// Write a startup script when the image has none
    fn ensure_startnet(&self, mount_dir: &Path) -> Result<bool> {
        let system32 = mount_dir.join("Windows").join("System32");
        let existing = find_path(mount_dir, &["Windows", "System32", "startnet.cmd"]);
        if existing.is_some() {
            return Ok(false);
        }

        fs::create_dir_all(&system32)
            .and_then(|_| fs::write(system32.join("startnet.cmd"), STARTNET_SCRIPT))
            .map_err(|e| Error::boot_image(format!("cannot write startnet.cmd: {}", e)))?;
        self.trace.line("Wrote startnet.cmd");
        Ok(true)
    }

    /// Commit or discard; returns whether changes were committed
    fn unmount(&self, mount_dir: &Path, commit: bool) -> Result<bool> {
        let mode = if commit { "/Commit" } else { "/Discard" };
        let output = self.dism(&args([
            "/Unmount-Wim".to_string(),
            format!("/MountDir:{}", mount_dir.display()),
            mode.to_string(),
        ]))?;
        if output.success() {
            return Ok(commit);
        }

        if commit {
            let _ = self.dism(&args([
                "/Unmount-Wim".to_string(),
                format!("/MountDir:{}", mount_dir.display()),
                "/Discard".to_string(),
            ]));
        }
        Err(Error::boot_image(format!(
            "cannot unmount {} ({}): {}",
            mount_dir.display(),
            mode,
            output.text().trim()
        )))
    }

    fn cleanup(&self, mount_dir: &Path, data: &Path) {
        self.remove_dir(mount_dir);
        self.remove_dir(&data.join(DRIVER_STAGING_DIR));
    }

    fn remove_dir(&self, dir: &Path) {
        if dir.exists() {
            if let Err(e) = fs::remove_dir_all(dir) {
                self.trace
                    .line(format!("Could not remove {}: {}", dir.display(), e));
            }
        }
    }

    fn dism(&self, arguments: &[String]) -> Result<isoboot_core::CommandOutput> {
        let output = self.runner.run(&self.dism, arguments)?;
        self.trace
            .command(&command_line(&self.dism, arguments), &output.text());
        Ok(output)
    }
}
