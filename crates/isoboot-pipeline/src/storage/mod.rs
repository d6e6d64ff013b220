//! Storage service seam
//!
//! Partition queries and mutations the pipeline needs. All calls block.

mod powershell;

pub use powershell::{diskpart_script, PowerShellStorage, DATA_PARTITION_SIZE_MB};

use std::path::{Path, PathBuf};

use isoboot_core::{FilesystemFormat, Result};

pub trait StorageService: Send + Sync {
    /// Number of partitions carrying the firmware volume label
    fn firmware_partition_count(&self) -> Result<usize>;

    /// Size of the firmware partition, `None` when there is none
    fn firmware_partition_size_mb(&self) -> Result<Option<u64>>;

    fn data_partition_exists(&self) -> Result<bool>;

    /// Free bytes on the system volume
    fn system_free_bytes(&self) -> Result<u64>;

    /// Carve the data partition (and the firmware partition when missing)
    /// out of the system volume
    fn create_partitions(&self, format: FilesystemFormat, skip_integrity_check: bool) -> Result<()>;

    /// Remove both product partitions and give the space back
    fn delete_partitions(&self) -> Result<()>;

    fn reformat_data_partition(&self, format: FilesystemFormat) -> Result<()>;

    fn reformat_firmware_partition(&self) -> Result<()>;

    /// Root of the data partition, assigning a letter when it has none
    fn data_drive(&self) -> Result<Option<PathBuf>>;

    /// Root of the firmware partition, assigning a letter when it has none
    fn firmware_drive(&self) -> Result<Option<PathBuf>>;

    fn free_bytes(&self, root: &Path) -> Result<u64>;

    /// Delete every volume labelled with a product label
    fn delete_product_volumes(&self) -> Result<()>;

    /// Grow the system partition into adjacent free space
    fn extend_system_partition(&self) -> Result<()>;
}
