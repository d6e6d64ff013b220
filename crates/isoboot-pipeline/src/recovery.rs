//! Space recovery: undo what provisioning did to the boot store and disk

use tracing::{info, warn};

use isoboot_bcd::BootConfigurator;
use isoboot_core::{AreaLog, EventBus, Result};

use crate::storage::StorageService;

/// Remove the product entries and partitions and return the space to `C:`.
///
/// Only deleting the volumes is fatal; boot store cleanup and the final
/// extension are reported and skipped on failure.
pub fn recover_space(
    storage: &dyn StorageService,
    configurator: &BootConfigurator,
    events: &EventBus,
    log: &AreaLog,
) -> Result<String> {
    let note = |message: String| {
        info!("{}", message);
        log.line(&message);
        events.log(message);
    };
    let caution = |message: String| {
        warn!("{}", message);
        log.line(format!("WARNING: {}", message));
        events.log(message);
    };

    note("Removing boot entries".to_string());
    match configurator.remove_product_entries() {
        Ok(0) => note("No product boot entries found".to_string()),
        Ok(n) => note(format!("Removed {} boot entries", n)),
        Err(e) => caution(format!("Boot entry cleanup failed: {}", e)),
    }
    match configurator.restore_boot_manager() {
        Ok(true) => note("Boot manager defaults restored".to_string()),
        Ok(false) => note("Default boot entry reset to the running system".to_string()),
        Err(e) => caution(format!("Boot manager defaults not restored: {}", e)),
    }

    note("Deleting product partitions".to_string());
    storage.delete_product_volumes()?;

    let message = match storage.extend_system_partition() {
        Ok(()) => "Space recovered and system partition extended".to_string(),
        Err(e) => {
            caution(format!("System partition not extended: {}", e));
            "Partitions removed; extend the system partition manually to reclaim the space"
                .to_string()
        }
    };
    note(message.clone());
    Ok(message)
}
