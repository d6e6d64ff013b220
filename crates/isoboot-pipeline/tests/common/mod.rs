//! Common test utilities for isoboot-pipeline
//!
//! Provides shared test infrastructure including:
//! - An in-memory disk implementing the storage service
//! - An in-memory boot store answering `bcdedit`, `mountvol` and `dism`
//! - A directory-backed image mounter
//! - A fixture wiring them into [`Services`]

pub mod fake_bcd;
pub mod fake_mounter;
pub mod mock_storage;

pub use fake_bcd::*;
pub use fake_mounter::*;
pub use mock_storage::*;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use isoboot_bcd::{BcdFirmwareInfo, BootStore, MountvolResolver};
use isoboot_core::{
    BootMode, EventBus, FilesystemFormat, LogArea, LogContext, PipelineRequest, Settings,
};
use isoboot_pipeline::Services;
use tempfile::TempDir;

pub struct Fixture {
    pub temp: TempDir,
    pub storage: Arc<MockStorage>,
    pub bcd: Arc<FakeBcd>,
    pub mounter: Arc<FakeMounter>,
    pub events: EventBus,
}

impl Fixture {
    /// Blank disk and a generic image
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let storage = MockStorage::new(&temp.path().join("disk"));
        Self::build(temp, storage, generic_tree)
    }

    #[allow(dead_code)]
    /// Blank disk and a Windows installation image
    pub fn windows() -> Self {
        let temp = TempDir::new().unwrap();
        let storage = MockStorage::new(&temp.path().join("disk"));
        Self::build(temp, storage, windows_tree)
    }

    /// Disk already carrying product partitions with a firmware partition of `efi_mb`
    pub fn provisioned(efi_mb: u64) -> Self {
        let temp = TempDir::new().unwrap();
        let storage = MockStorage::provisioned(&temp.path().join("disk"), efi_mb);
        Self::build(temp, storage, generic_tree)
    }

    fn build(temp: TempDir, storage: Arc<MockStorage>, tree: fn(&Path)) -> Self {
        let image_root = temp.path().join("mounted");
        tree(&image_root);
        fs::write(temp.path().join("image.iso"), b"generic image bytes").unwrap();
        fs::write(temp.path().join("grubx64.efi"), pe_bytes(0x8664)).unwrap();
        Self {
            mounter: Arc::new(FakeMounter::new(&image_root)),
            bcd: FakeBcd::new(),
            storage,
            events: EventBus::new(),
            temp,
        }
    }

    pub fn image(&self) -> PathBuf {
        self.temp.path().join("image.iso")
    }

    pub fn logs(&self) -> LogContext {
        LogContext::new(self.temp.path().join("logs"))
    }

    pub fn settings(&self) -> Settings {
        Settings {
            log_dir: self.temp.path().join("logs"),
            mount_settle_secs: 0,
            chainloader_path: Some(self.temp.path().join("grubx64.efi")),
            system_loader_dir: self.temp.path().join("system"),
            driver_store: None,
            ..Settings::default()
        }
    }

    pub fn services(&self) -> Services {
        let logs = self.logs();
        let log = logs.area(LogArea::BootConfig);
        let store = BootStore::new(self.bcd.clone(), "bcdedit", log.clone());
        Services {
            runner: self.bcd.clone(),
            storage: self.storage.clone(),
            mounter: self.mounter.clone(),
            volumes: Arc::new(
                MountvolResolver::new(self.bcd.clone(), 2, log).with_retry_delay(Duration::ZERO),
            ),
            firmware: Arc::new(BcdFirmwareInfo::new(store)),
        }
    }

    pub fn request(&self, mode: BootMode) -> PipelineRequest {
        PipelineRequest::new(self.image(), FilesystemFormat::Ntfs, mode)
    }
}
