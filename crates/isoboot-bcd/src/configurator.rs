//! Boot manager configuration
//!
//! Creates the product boot entry by copying the current default, shapes it
//! with a [`BootStrategy`], verifies it and makes it the default.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use isoboot_core::loader::{find_loader, relative_loader_path};
use isoboot_core::types::drive_spec;
use isoboot_core::{Error, EventBus, Result};

use crate::bootmgr_state::BootManagerState;
use crate::chainload::ChainloadStager;
use crate::firmware::FirmwareInfo;
use crate::pe;
use crate::store::{BootStore, StoreEntry};
use crate::strategy::{BootStrategy, StrategyTarget};
use crate::volume::VolumeResolver;

/// The entry left in place by a successful [`BootConfigurator::configure`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredEntry {
    pub identifier: String,
    pub label: String,
    pub strategy: BootStrategy,
    /// Loader found on the firmware partition
    pub loader: PathBuf,
    pub machine: u16,
}

pub struct BootConfigurator {
    store: BootStore,
    volumes: Arc<dyn VolumeResolver>,
    firmware: Arc<dyn FirmwareInfo>,
    chainloader: ChainloadStager,
    events: EventBus,
    backup_path: Option<PathBuf>,
    menu_timeout: u32,
}

impl BootConfigurator {
    pub fn new(
        store: BootStore,
        volumes: Arc<dyn VolumeResolver>,
        firmware: Arc<dyn FirmwareInfo>,
        chainloader: ChainloadStager,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            volumes,
            firmware,
            chainloader,
            events,
            backup_path: None,
            menu_timeout: 30,
        }
    }

    /// Where the `{bootmgr}` defaults are saved before the first change
    pub fn with_backup_path(mut self, path: Option<PathBuf>) -> Self {
        self.backup_path = path;
        self
    }

    pub fn with_menu_timeout(mut self, seconds: u32) -> Self {
        self.menu_timeout = seconds;
        self
    }

    pub fn store(&self) -> &BootStore {
        &self.store
    }

    fn step(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.store.log().line(&message);
        self.events.log(message);
    }

    /// Create, shape, verify and activate the product entry
    pub fn configure(
        &self,
        data_root: &Path,
        firmware_root: &Path,
        strategy: BootStrategy,
    ) -> Result<ConfiguredEntry> {
        let data_drive = drive_spec(data_root);
        let firmware_drive = drive_spec(firmware_root);
        self.step(format!(
            "Configuring {} boot entry (data {}, firmware {})",
            strategy, data_drive, firmware_drive
        ));

        if let Some(path) = &self.backup_path {
            if let Err(e) = BootManagerState::capture(&self.store, path) {
                warn!("Could not save boot manager state: {}", e);
            }
        }

        let data_volume_id = self
            .volumes
            .volume_id(&data_drive)
            .map_err(|_| Error::volume_identifier("data", &data_drive))?;
        let firmware_volume_id = self
            .volumes
            .volume_id(&firmware_drive)
            .map_err(|_| Error::volume_identifier("firmware", &firmware_drive))?;
        self.store.log().line(format!(
            "Volumes: data {} = {}, firmware {} = {}",
            data_drive, data_volume_id, firmware_drive, firmware_volume_id
        ));

        // Never delete the entry that is running right now
        self.store.set_default("{current}")?;

        let removed = self.store.delete_labelled(&BootStrategy::entry_labels())?;
        if removed > 0 {
            self.step(format!("Removed {} previous boot entries", removed));
        }

        let entry_id = self.store.copy_default(strategy.entry_label())?;
        self.step(format!("Created boot entry {}", entry_id));

        if strategy.needs_chainload_staging() {
            let staged = self.chainloader.stage(firmware_root)?;
            let machine = pe::ensure_supported(&staged)?;
            self.store.log().line(format!(
                "Chain-loader {} (machine 0x{:04X})",
                staged.display(),
                machine
            ));
        }

        let loader = find_loader(firmware_root)
            .ok_or_else(|| Error::loader_not_found(firmware_root.display().to_string()))?;
        let machine = pe::ensure_supported(&loader)?;
        let loader_path = relative_loader_path(firmware_root, &loader)
            .ok_or_else(|| Error::loader_not_found(loader.display().to_string()))?;
        self.store.log().line(format!(
            "Loader {} (machine 0x{:04X})",
            loader_path, machine
        ));

        let boot_manager_on_data = data_root.join("bootmgr.efi").is_file();
        if strategy == BootStrategy::Extracted && !boot_manager_on_data {
            self.step(format!(
                "No boot manager at the data root, booting {} from the firmware partition",
                loader_path
            ));
        }

        let target = StrategyTarget {
            entry_id: entry_id.clone(),
            data_drive,
            firmware_drive,
            data_volume_id,
            firmware_volume_id,
            loader_path,
            boot_manager_on_data,
            firmware: self.firmware.firmware_kind(),
        };

        for command in strategy.commands(&target) {
            if command.tolerate_existing {
                self.store.run_tolerating_existing(&command.args)?;
            } else {
                self.store.run_checked(&command.args)?;
            }
        }
        strategy.verify(&target, |id| self.store.enum_entry(id))?;
        debug!("Entry {} verified", entry_id);

        if !strategy.retains_system_root() {
            self.store.delete_value(&entry_id, "systemroot")?;
        }

        self.store.set_default(&entry_id)?;

        if let Err(e) = self.store.run_checked(&[
            String::from("/displayorder"),
            entry_id.clone(),
            String::from("/addfirst"),
        ]) {
            warn!("Could not move the entry to the top of the menu: {}", e);
        }
        if let Err(e) = self.store.set_value(
            "{bootmgr}",
            "timeout",
            &self.menu_timeout.to_string(),
        ) {
            warn!("Could not set the boot menu timeout: {}", e);
        }

        self.step(format!("{} is now the default boot entry", entry_id));
        Ok(ConfiguredEntry {
            identifier: entry_id,
            label: strategy.entry_label().to_string(),
            strategy,
            loader,
            machine,
        })
    }

    /// Entries described by one of the product labels
    pub fn product_entries(&self) -> Result<Vec<StoreEntry>> {
        self.store.labelled_entries(&BootStrategy::entry_labels())
    }

    /// Delete all product entries
    pub fn remove_product_entries(&self) -> Result<usize> {
        self.store.set_default("{current}")?;
        self.store.delete_labelled(&BootStrategy::entry_labels())
    }

    /// Put back the saved boot manager defaults, or fall back to the running entry
    pub fn restore_boot_manager(&self) -> Result<bool> {
        if let Some(path) = &self.backup_path {
            if BootManagerState::restore(&self.store, path)? {
                return Ok(true);
            }
        }
        self.store.set_default("{current}")?;
        Ok(false)
    }
}
