//! Names shared by every crate

/// Volume label of the data partition
pub const DATA_VOLUME_LABEL: &str = "ISOBOOT";

/// Volume label of the firmware partition
pub const EFI_VOLUME_LABEL: &str = "ISOEFI";

/// Reserved boot entry label; any entry whose description contains it is ours
pub const BOOT_ENTRY_LABEL: &str = "ISOBOOT";

/// Fingerprint record file at the data partition root
pub const FINGERPRINT_FILE_NAME: &str = "ISOBOOTHASH";

/// Image copy staged on the data partition for chainload mode
pub const STAGED_IMAGE_NAME: &str = "iso.iso";

/// Saved `{bootmgr}` state, kept in the log directory
pub const BOOTMGR_BACKUP_FILE: &str = "bootmgr_backup.ini";

/// Version written into fingerprint records
pub const PRODUCING_VERSION: &str = env!("CARGO_PKG_VERSION");
