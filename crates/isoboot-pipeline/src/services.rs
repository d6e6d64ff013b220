//! Explicitly constructed service set
//!
//! Every collaborator the pipeline talks to is built once here and handed
//! down by reference-counted trait object.

use std::sync::Arc;

use isoboot_bcd::{
    BcdFirmwareInfo, BootConfigurator, BootStore, ChainloadStager, FirmwareInfo, MountvolResolver,
    VolumeResolver,
};
use isoboot_core::constants::BOOTMGR_BACKUP_FILE;
use isoboot_core::{CommandRunner, EventBus, LogArea, LogContext, Settings, SystemCommandRunner};
use isoboot_deploy::{BootImageProcessor, DeploymentEngine, ImageMounter, PowerShellMounter};

use crate::storage::{PowerShellStorage, StorageService};

#[derive(Clone)]
pub struct Services {
    pub runner: Arc<dyn CommandRunner>,
    pub storage: Arc<dyn StorageService>,
    pub mounter: Arc<dyn ImageMounter>,
    pub volumes: Arc<dyn VolumeResolver>,
    pub firmware: Arc<dyn FirmwareInfo>,
}

impl Services {
    /// Services backed by the real system tools
    pub fn system(settings: &Settings, logs: &LogContext) -> Self {
        Self::with_runner(Arc::new(SystemCommandRunner::new()), settings, logs)
    }

    /// Tool-backed services driven through `runner`
    pub fn with_runner(runner: Arc<dyn CommandRunner>, settings: &Settings, logs: &LogContext) -> Self {
        let storage = PowerShellStorage::new(
            runner.clone(),
            settings.powershell.clone(),
            settings.required_efi_size_mb,
            logs.area(LogArea::Storage),
        );
        let mounter = PowerShellMounter::new(
            runner.clone(),
            settings.powershell.clone(),
            logs.area(LogArea::Extraction),
        );
        let volumes = MountvolResolver::new(
            runner.clone(),
            settings.volume_id_attempts,
            logs.area(LogArea::BootConfig),
        );
        let firmware = BcdFirmwareInfo::new(boot_store(runner.clone(), settings, logs));

        Self {
            runner,
            storage: Arc::new(storage),
            mounter: Arc::new(mounter),
            volumes: Arc::new(volumes),
            firmware: Arc::new(firmware),
        }
    }

    pub fn boot_store(&self, settings: &Settings, logs: &LogContext) -> BootStore {
        boot_store(self.runner.clone(), settings, logs)
    }

    /// Engine wired with boot image servicing and the system loader fallback
    pub fn deployment_engine(
        &self,
        settings: &Settings,
        logs: &LogContext,
        events: &EventBus,
    ) -> DeploymentEngine {
        let processor = BootImageProcessor::new(
            self.runner.clone(),
            settings.dism.clone(),
            events.clone(),
            logs.area(LogArea::Extraction),
        )
        .with_driver_store(settings.driver_store.clone())
        .with_driver_dirs(settings.driver_dirs.clone());

        DeploymentEngine::new(
            self.mounter.clone(),
            events.clone(),
            logs,
            settings.mount_settle_delay(),
        )
        .with_boot_image_processor(processor)
        .with_system_loader_dir(settings.system_loader_dir.clone())
    }

    pub fn configurator(
        &self,
        settings: &Settings,
        logs: &LogContext,
        events: &EventBus,
    ) -> BootConfigurator {
        BootConfigurator::new(
            self.boot_store(settings, logs),
            self.volumes.clone(),
            self.firmware.clone(),
            ChainloadStager::new(logs.area(LogArea::BootConfig))
                .with_override(settings.chainloader_path.clone()),
            events.clone(),
        )
        .with_backup_path(logs.file_path(BOOTMGR_BACKUP_FILE))
        .with_menu_timeout(settings.boot_menu_timeout_secs)
    }
}

fn boot_store(runner: Arc<dyn CommandRunner>, settings: &Settings, logs: &LogContext) -> BootStore {
    BootStore::new(runner, settings.bcdedit.clone(), logs.area(LogArea::BootConfig))
}
