//! Platform firmware type

use tracing::warn;

use isoboot_core::FirmwareKind;

use crate::store::{entry_value, BootStore};

pub trait FirmwareInfo: Send + Sync {
    fn firmware_kind(&self) -> FirmwareKind;
}

/// Infers the firmware type from the running loader's path
pub struct BcdFirmwareInfo {
    store: BootStore,
}

impl BcdFirmwareInfo {
    pub fn new(store: BootStore) -> Self {
        Self { store }
    }
}

/// UEFI when the loader path ends in `.efi`
pub fn kind_from_current_entry(text: &str) -> FirmwareKind {
    match entry_value(text, "path") {
        Some(path) if path.to_ascii_lowercase().ends_with(".efi") => FirmwareKind::Uefi,
        Some(_) => FirmwareKind::Legacy,
        None => FirmwareKind::Uefi,
    }
}

impl FirmwareInfo for BcdFirmwareInfo {
    fn firmware_kind(&self) -> FirmwareKind {
        match self.store.enum_entry("{current}") {
            Ok(text) => kind_from_current_entry(&text),
            Err(e) => {
                warn!("Cannot read the running entry, assuming UEFI: {}", e);
                FirmwareKind::Uefi
            }
        }
    }
}
