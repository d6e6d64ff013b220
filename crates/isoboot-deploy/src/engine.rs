//! Content deployment engine
//!
//! Mounts an image, classifies the mounted tree, copies the parts the selected
//! mode needs onto the data partition, copies the firmware subtree onto the
//! firmware partition and confirms a boot loader landed there. Progress is one
//! byte count against the image size across every copy.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use walkdir::WalkDir;

use isoboot_core::constants::STAGED_IMAGE_NAME;
use isoboot_core::loader::find_loader;
use isoboot_core::{AreaLog, BootMode, Error, EventBus, FilesystemFormat, LogArea, LogContext, Result};

use crate::boot_image::{BootImageProcessor, BootImageReport};
use crate::copy::{has_mz_header, ByteTally, CopyStats, Exclusions, TreeCopier};
use crate::mount::{ImageMounter, MountGuard};
use crate::policy::{deploy_flags, DeployFlags};

const LISTING_DEPTH: usize = 10;
/// Removable-media loaders checked after the firmware copy
const REMOVABLE_LOADERS: [&str; 2] = ["bootx64.efi", "bootia32.efi"];
/// System loaders tried, in order, when the image brings no usable one
const SYSTEM_LOADERS: [&str; 2] = ["bootmgfw.efi", "bootx64.efi"];

/// One deployment
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub image: PathBuf,
    pub data_dest: PathBuf,
    pub firmware_dest: PathBuf,
    pub mode: BootMode,
    pub format: FilesystemFormat,
    /// Classification from reading the unmounted image, if it was read.
    /// The mounted tree decides; a disagreement is only logged.
    pub pre_inspected_installable: Option<bool>,
}

/// Outcome of a successful deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    /// Classification of the mounted tree
    pub installable_os: bool,
    /// What was copied, derived from the mode and `installable_os`
    pub flags: DeployFlags,
    /// Loader found on the firmware partition after copying
    pub loader: PathBuf,
    pub stats: CopyStats,
    /// Set when the boot-time image was serviced
    pub boot_image: Option<BootImageReport>,
    pub drivers_injected: bool,
    /// False when the dismount could not be confirmed
    pub dismounted: bool,
}

pub struct DeploymentEngine {
    mounter: Arc<dyn ImageMounter>,
    events: EventBus,
    trace: AreaLog,
    content_log: AreaLog,
    copier: TreeCopier,
    settle_delay: Duration,
    boot_image: Option<BootImageProcessor>,
    system_loader_dir: Option<PathBuf>,
}

impl DeploymentEngine {
    pub fn new(
        mounter: Arc<dyn ImageMounter>,
        events: EventBus,
        logs: &LogContext,
        settle_delay: Duration,
    ) -> Self {
        Self {
            mounter,
            copier: TreeCopier::new(events.clone(), logs.area(LogArea::CopyErrors)),
            events,
            trace: logs.area(LogArea::Extraction),
            content_log: logs.area(LogArea::ImageContent),
            settle_delay,
            boot_image: None,
            system_loader_dir: None,
        }
    }

    /// Services the boot-time image of extracted installable OS images
    pub fn with_boot_image_processor(mut self, processor: BootImageProcessor) -> Self {
        self.boot_image = Some(processor);
        self
    }

    /// Folder holding the installed system's EFI loaders
    pub fn with_system_loader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.system_loader_dir = Some(dir.into());
        self
    }

    /// Run the deployment. Always ends with a clear progress event.
    pub fn deploy(&self, request: &DeployRequest) -> Result<DeployReport> {
        let result = self.deploy_inner(request);
        if let Err(e) = &result {
            self.trace.line(format!("Deployment failed: {}", e));
        }
        self.events.progress(0, 0, "");
        result
    }

    fn deploy_inner(&self, request: &DeployRequest) -> Result<DeployReport> {
        self.trace.line(format!(
            "Deploying {} (mode {}, format {})",
            request.image.display(),
            request.mode,
            request.format
        ));

        let guard = MountGuard::mount(self.mounter.as_ref(), &request.image)?;
        let root = guard.root().to_path_buf();
        self.events
            .log(format!("Image mounted at {}", root.display()));

        if !self.settle_delay.is_zero() {
            thread::sleep(self.settle_delay);
        }

        self.record_listing(&root);

        let installable_os = is_installable_os(&root);
        self.trace.line(format!(
            "Image classified as {}",
            if installable_os { "installable OS" } else { "generic content" }
        ));
        match request.pre_inspected_installable {
            Some(pre) if pre != installable_os => {
                warn!(
                    "Pre-inspection said installable={}, mounted tree says {}",
                    pre, installable_os
                );
                self.trace.line(format!(
                    "WARNING: pre-inspection said installable={}, using mounted classification {}",
                    pre, installable_os
                ));
            }
            _ => {}
        }

        let flags = deploy_flags(request.mode, installable_os);
        self.trace.line(format!("Deploy flags {:?}", flags));

        let image_size = fs::metadata(&request.image).map(|m| m.len()).unwrap_or(0);
        let mut tally = ByteTally::new(image_size);
        let mut stats = CopyStats::default();

        if flags.extract_full_tree {
            self.events.log("Copying image content");
            let copied = self.copier.copy_tree(
                &root,
                &request.data_dest,
                &Exclusions::firmware_subtree()?,
                "Copying image content",
                &mut tally,
            )?;
            add(&mut stats, copied);
        }

        if flags.extract_boot_image {
            add(&mut stats, self.stage_boot_image(&root, &request.data_dest, &mut tally)?);
        }

        if flags.copy_install_payload {
            add(
                &mut stats,
                self.copy_install_payload(&root, &request.data_dest, &mut tally)?,
            );
        }

        if flags.stage_image_file {
            let dest = request.data_dest.join(STAGED_IMAGE_NAME);
            add(
                &mut stats,
                self.copier.copy_files(
                    &[(request.image.clone(), dest)],
                    "Staging image file",
                    &mut tally,
                )?,
            );
        }

        add(
            &mut stats,
            self.copy_firmware(&root, &request.firmware_dest, &mut tally)?,
        );

        let boot_image = if flags.process_boot_image {
            self.process_boot_image(&request.data_dest, &request.firmware_dest)?
        } else {
            None
        };

        add(
            &mut stats,
            self.ensure_removable_loader(&request.firmware_dest, &mut tally)?,
        );

        let loader = find_loader(&request.firmware_dest).ok_or_else(|| {
            Error::loader_not_found(request.firmware_dest.display().to_string())
        })?;
        self.trace
            .line(format!("Boot loader present: {}", loader.display()));

        let dismounted = match guard.dismount() {
            Ok(()) => true,
            Err(e) => {
                warn!("{}", e);
                self.trace.line(format!("WARNING: {}", e));
                false
            }
        };

        info!(
            "Deployed {} files ({} bytes) from {}",
            stats.files,
            stats.bytes,
            request.image.display()
        );
        Ok(DeployReport {
            installable_os,
            flags,
            loader,
            stats,
            drivers_injected: boot_image
                .as_ref()
                .map(|r| r.drivers_injected)
                .unwrap_or(false),
            boot_image,
            dismounted,
        })
    }

    fn record_listing(&self, root: &Path) {
        let top: Vec<String> = fs::read_dir(root)
            .map(|entries| {
                entries
                    .flatten()
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        self.trace
            .line(format!("Top-level entries: {}", top.join(", ")));

        self.content_log
            .line(format!("Contents of {}", root.display()));
        for entry in WalkDir::new(root)
            .min_depth(1)
            .max_depth(LISTING_DEPTH)
            .sort_by_file_name()
            .into_iter()
            .flatten()
        {
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            let marker = if entry.file_type().is_dir() { "/" } else { "" };
            self.content_log
                .line(format!("{}{}", relative.display(), marker));
        }
    }

    fn stage_boot_image(&self, root: &Path, data: &Path, tally: &mut ByteTally) -> Result<CopyStats> {
        let wim = find_path(root, &["sources", "boot.wim"])
            .ok_or_else(|| Error::missing_content("sources\\boot.wim not found in image"))?;
        let mut files = vec![(wim, data.join("sources").join("boot.wim"))];
        match find_path(root, &["boot", "boot.sdi"]) {
            Some(sdi) => files.push((sdi, data.join("boot").join("boot.sdi"))),
            None => {
                warn!("boot\\boot.sdi not found in image");
                self.trace.line("WARNING: boot\\boot.sdi not found in image");
            }
        }

        self.events.log("Staging boot image");
        self.copier.copy_files(&files, "Staging boot image", tally)
    }

    fn copy_install_payload(&self, root: &Path, data: &Path, tally: &mut ByteTally) -> Result<CopyStats> {
        let payload = ["install.wim", "install.esd"]
            .iter()
            .find_map(|name| find_path(root, &["sources", *name]))
            .ok_or_else(|| Error::missing_content("no install.wim or install.esd in sources"))?;
        let name = payload
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();

        self.events.log("Copying install payload");
        self.copier.copy_files(
            &[(payload, data.join("sources").join(name))],
            "Copying install payload",
            tally,
        )
    }

    fn copy_firmware(&self, root: &Path, firmware: &Path, tally: &mut ByteTally) -> Result<CopyStats> {
        let efi = find_child(root, "efi")
            .filter(|p| p.is_dir())
            .ok_or_else(|| Error::missing_content("image has no EFI directory"))?;

        self.events.log("Copying EFI files");
        let mut stats = self.copier.copy_tree(
            &efi,
            &firmware.join("EFI"),
            &Exclusions::none(),
            "Copying EFI files",
            tally,
        )?;

        if let Some(bootmgr) = find_child(root, "bootmgr.efi").filter(|p| p.is_file()) {
            let dest = firmware
                .join("EFI")
                .join("Microsoft")
                .join("Boot")
                .join("bootmgr.efi");
            add(
                &mut stats,
                self.copier
                    .copy_files(&[(bootmgr, dest)], "Copying boot manager", tally)?,
            );
        }
        Ok(stats)
    }

    /// Service the boot-time image already copied onto the data partition
    fn process_boot_image(&self, data: &Path, firmware: &Path) -> Result<Option<BootImageReport>> {
        let wim = find_path(data, &["sources", "boot.wim"])
            .ok_or_else(|| Error::missing_content("sources\\boot.wim not copied to data partition"))?;
        let Some(processor) = &self.boot_image else {
            warn!("No boot image processor configured, boot image left as shipped");
            self.trace
                .line("WARNING: boot image not processed, no processor configured");
            return Ok(None);
        };
        processor
            .process(&wim, data, firmware, &self.copier)
            .map(Some)
    }

    /// Make sure the removable-media path holds a real EFI executable.
    ///
    /// Loaders without an MZ header are replaced by the system loader, and
    /// when the image brought none at all the system loader is copied in.
    fn ensure_removable_loader(&self, firmware: &Path, tally: &mut ByteTally) -> Result<CopyStats> {
        let Some(system_dir) = &self.system_loader_dir else {
            return Ok(CopyStats::default());
        };
        let boot_dir = find_path(firmware, &["EFI", "BOOT"]);
        let present: Vec<PathBuf> = boot_dir
            .iter()
            .flat_map(|dir| REMOVABLE_LOADERS.iter().filter_map(|name| find_child(dir, name)))
            .filter(|p| p.is_file())
            .collect();
        let system = SYSTEM_LOADERS
            .iter()
            .filter_map(|name| find_child(system_dir, name))
            .find(|p| has_mz_header(p));

        let mut files = Vec::new();
        for loader in present.iter().filter(|p| !has_mz_header(p)) {
            match &system {
                Some(src) => {
                    self.trace.line(format!(
                        "{} has no MZ header, replacing with {}",
                        loader.display(),
                        src.display()
                    ));
                    files.push((src.clone(), loader.clone()));
                }
                None => {
                    warn!("{} has no MZ header and no system loader is available", loader.display());
                    self.trace.line(format!(
                        "WARNING: {} has no MZ header and no system loader is available",
                        loader.display()
                    ));
                }
            }
        }

        if present.is_empty() {
            match &system {
                Some(src) => {
                    let dest = resolve_path(firmware, &["EFI", "BOOT", "BOOTX64.EFI"]);
                    self.events
                        .log(format!("Image has no removable-media loader, using {}", src.display()));
                    self.trace.line(format!(
                        "No removable-media loader, copying {} to {}",
                        src.display(),
                        dest.display()
                    ));
                    files.push((src.clone(), dest));
                }
                None => self.trace.line(format!(
                    "No removable-media loader and none in {}",
                    system_dir.display()
                )),
            }
        }

        if files.is_empty() {
            return Ok(CopyStats::default());
        }
        self.copier.copy_files(&files, "Copying system loader", tally)
    }
}

fn add(total: &mut CopyStats, more: CopyStats) {
    total.files += more.files;
    total.directories += more.directories;
    total.bytes += more.bytes;
}

/// Entry of `dir` named `name`, ignoring case
pub fn find_child(dir: &Path, name: &str) -> Option<PathBuf> {
    fs::read_dir(dir)
        .ok()?
        .flatten()
        .find(|e| e.file_name().to_string_lossy().eq_ignore_ascii_case(name))
        .map(|e| e.path())
}

/// Walk `parts` from `root` ignoring case at each level
pub fn find_path(root: &Path, parts: &[&str]) -> Option<PathBuf> {
    parts
        .iter()
        .try_fold(root.to_path_buf(), |dir, part| find_child(&dir, part))
}

/// `parts` under `root`, reusing existing entries whatever their case
pub fn resolve_path(root: &Path, parts: &[&str]) -> PathBuf {
    parts.iter().fold(root.to_path_buf(), |dir, part| {
        find_child(&dir, part).unwrap_or_else(|| dir.join(part))
    })
}

/// A mounted tree carrying an OS install payload
pub fn is_installable_os(root: &Path) -> bool {
    find_path(root, &["sources", "install.wim"]).is_some()
        || find_path(root, &["sources", "install.esd"]).is_some()
}
