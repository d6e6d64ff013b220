//! The three provisioning stages
//!
//! 1. `validate_and_prepare`: make sure exactly one correctly sized pair of
//!    product partitions exists, reusing them when the fingerprint allows.
//! 2. `copy_iso_content`: deploy what the boot mode needs.
//! 3. `configure_boot`: create and activate the boot entry.
//!
//! A failing step leaves everything done by earlier steps in place.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use isoboot_bcd::{BootStrategy, ConfiguredEntry};
use isoboot_core::constants::{DATA_VOLUME_LABEL, EFI_VOLUME_LABEL};
use isoboot_core::{
    AreaLog, BootMode, DriveBinding, Error, EventBus, FilesystemFormat, LogArea, LogContext,
    Result, Settings,
};
use isoboot_deploy::fingerprint::record_path;
use isoboot_deploy::{
    has_install_payload, image_hash, DeployReport, DeployRequest, DeploymentEngine,
    FingerprintRecord,
};

use crate::services::Services;

const BYTES_PER_MB: u64 = 1024 * 1024;
const BYTES_PER_GB: u64 = 1024 * BYTES_PER_MB;

/// Result of the validate stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preparation {
    pub binding: DriveBinding,
    pub partitions_created: bool,
    pub data_reformatted: bool,
}

/// Result of the copy stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentOutcome {
    Deployed(DeployReport),
    /// The fingerprint showed this exact deployment is already on disk
    AlreadyPresent,
}

pub struct Pipeline {
    services: Services,
    settings: Settings,
    logs: LogContext,
    events: EventBus,
    general: AreaLog,
    binding: Option<DriveBinding>,
    hash: Option<(PathBuf, String)>,
}

impl Pipeline {
    pub fn new(services: Services, settings: Settings, logs: LogContext, events: EventBus) -> Self {
        Self {
            general: logs.area(LogArea::General),
            services,
            settings,
            logs,
            events,
            binding: None,
            hash: None,
        }
    }

    /// Drives resolved by a successful validate stage
    pub fn binding(&self) -> Option<&DriveBinding> {
        self.binding.as_ref()
    }

    fn note(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.general.line(&message);
        self.events.log(message);
    }

    fn caution(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.general.line(format!("WARNING: {}", message));
        self.events.log(message);
    }

    /// Image hash, computed once per image per run
    fn image_hash(&mut self, image: &Path) -> Result<String> {
        if let Some((path, hash)) = &self.hash {
            if path == image {
                return Ok(hash.clone());
            }
        }
        self.note("Computing image fingerprint");
        let hash = image_hash(image)?;
        self.hash = Some((image.to_path_buf(), hash.clone()));
        Ok(hash)
    }

    pub fn validate_and_prepare(
        &mut self,
        image: &Path,
        format: FilesystemFormat,
        skip_integrity_check: bool,
    ) -> Result<Preparation> {
        let storage = self.services.storage.clone();
        self.binding = None;

        let mut recreate = false;
        let count = storage.firmware_partition_count()?;
        if count > 1 {
            self.caution(format!(
                "{} {} partitions found; removing both product partitions to start clean",
                count, EFI_VOLUME_LABEL
            ));
            storage
                .delete_partitions()
                .map_err(|e| Error::DuplicateCleanupFailed {
                    count,
                    message: e.to_string(),
                })?;
            recreate = true;
        } else if let Some(size_mb) = storage.firmware_partition_size_mb()? {
            let required = self.settings.required_efi_size_mb;
            if size_mb > 0 && size_mb != required {
                self.caution(format!(
                    "{} partition is {} MB, {} MB required; recreating both partitions",
                    EFI_VOLUME_LABEL, size_mb, required
                ));
                storage
                    .delete_partitions()
                    .map_err(|e| Error::WrongSizeCleanupFailed {
                        size_mb,
                        expected_mb: required,
                        message: e.to_string(),
                    })?;
                recreate = true;
            }
        }

        let data_exists = !recreate && storage.data_partition_exists()?;

        if !data_exists {
            let free_gb = storage.system_free_bytes()? / BYTES_PER_GB;
            let required_gb = self.settings.min_system_free_gb;
            if free_gb < required_gb {
                return Err(Error::insufficient_space(required_gb, free_gb));
            }
        }

        let mut data_reformatted = false;
        let partitions_created;
        if data_exists {
            partitions_created = false;
            let reusable = match storage.data_drive() {
                Ok(Some(root)) => {
                    let hash = self.image_hash(image)?;
                    FingerprintRecord::read(&record_path(&root))
                        .map(|record| record.matches_format(&hash, format))
                        .unwrap_or(false)
                }
                Ok(None) => {
                    self.caution(format!("{} partition has no drive letter", DATA_VOLUME_LABEL));
                    false
                }
                // Content that cannot be read cannot be reused
                Err(e) => {
                    self.caution(format!(
                        "Could not resolve the {} drive ({}), reformatting",
                        DATA_VOLUME_LABEL, e
                    ));
                    false
                }
            };
            if reusable {
                self.note("Partition already holds this image, skipping format");
            } else {
                self.note(format!("Formatting {} as {}", DATA_VOLUME_LABEL, format));
                storage.reformat_data_partition(format)?;
                data_reformatted = true;
            }
        } else {
            self.note("Creating product partitions");
            storage.create_partitions(format, skip_integrity_check)?;
            partitions_created = true;
        }

        let data = storage
            .data_drive()?
            .ok_or_else(|| Error::drive_unresolved(DATA_VOLUME_LABEL))?;
        let firmware = storage
            .firmware_drive()?
            .ok_or_else(|| Error::drive_unresolved(EFI_VOLUME_LABEL))?;

        match storage.free_bytes(&firmware) {
            Ok(free) => {
                let free_mb = free / BYTES_PER_MB;
                let required_mb = self.settings.min_firmware_free_mb;
                if free_mb < required_mb {
                    return Err(Error::insufficient_firmware_space(required_mb, free_mb));
                }
            }
            Err(e) => self.caution(format!(
                "Could not check free space on {}: {}",
                EFI_VOLUME_LABEL, e
            )),
        }

        if partitions_created {
            storage.reformat_firmware_partition()?;
        }

        let binding = DriveBinding { data, firmware };
        self.general.line(format!(
            "Drives: data {}, firmware {}",
            binding.data.display(),
            binding.firmware.display()
        ));
        self.binding = Some(binding.clone());
        Ok(Preparation {
            binding,
            partitions_created,
            data_reformatted,
        })
    }

    pub fn copy_iso_content(
        &mut self,
        image: &Path,
        format: FilesystemFormat,
        mode_key: &str,
        mode_label: &str,
    ) -> Result<ContentOutcome> {
        let mode = BootMode::from_key(mode_key)?;
        let binding = self
            .binding
            .clone()
            .ok_or_else(|| Error::drive_unresolved(DATA_VOLUME_LABEL))?;

        let hash = self.image_hash(image)?;
        let record_file = record_path(&binding.data);
        if FingerprintRecord::read(&record_file)
            .map(|record| record.matches_deployment(&hash, mode, format))
            .unwrap_or(false)
        {
            self.note(format!("{} content already deployed, skipping copy", mode_label));
            return Ok(ContentOutcome::AlreadyPresent);
        }

        // A partial copy must not look like a finished one on the next run
        if record_file.exists() {
            fs::remove_file(&record_file)?;
        }

        // Only a hint; the engine classifies the mounted tree
        let pre_inspected = has_install_payload(image);
        self.note(format!("Deploying image in {} mode", mode_label));

        let engine = self
            .services
            .deployment_engine(&self.settings, &self.logs, &self.events);
        let report = engine.deploy(&DeployRequest {
            image: image.to_path_buf(),
            data_dest: binding.data.clone(),
            firmware_dest: binding.firmware.clone(),
            mode,
            format,
            pre_inspected_installable: Some(pre_inspected),
        })?;
        if mode == BootMode::Extracted && !report.installable_os {
            self.caution("Image has no Windows install payload; chainload mode may suit it better");
        }
        if report.drivers_injected {
            self.note("Drivers added to the boot image");
        }

        FingerprintRecord::new(hash, mode, format)
            .with_drivers_injected(report.drivers_injected)
            .write(&record_file)?;
        self.note(format!(
            "Copied {} files ({} MB)",
            report.stats.files,
            report.stats.bytes / BYTES_PER_MB
        ));
        Ok(ContentOutcome::Deployed(report))
    }

    pub fn configure_boot(&mut self, mode_key: &str) -> Result<ConfiguredEntry> {
        let strategy = BootStrategy::from_key(mode_key)?;
        let binding = self
            .binding
            .clone()
            .ok_or_else(|| Error::drive_unresolved(DATA_VOLUME_LABEL))?;

        let configurator = self
            .services
            .configurator(&self.settings, &self.logs, &self.events);
        configurator.configure(&binding.data, &binding.firmware, strategy)
    }
}
