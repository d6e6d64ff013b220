//! In-memory partition table backed by temporary directories

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use isoboot_core::{Error, FilesystemFormat, Result};
use isoboot_pipeline::StorageService;

const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * MB;

#[derive(Debug, Clone)]
pub struct Disk {
    /// Sizes of the partitions carrying the firmware label
    pub firmware_partitions: Vec<u64>,
    pub data_exists: bool,
    pub data_format: Option<FilesystemFormat>,
    pub system_free_gb: u64,
    pub firmware_free_mb: u64,
    /// Whether the system partition was grown back
    pub system_extended: bool,
    /// Data drive lookups that fail outright before lookups work again
    pub failing_data_lookups: u32,
    /// Data drive lookups that find the partition but no drive letter
    pub unresolved_data_lookups: u32,
}

/// A paused operation: `reached` fires when the caller blocks, `release` lets it go on
pub struct Hold {
    pub reached: Receiver<()>,
    pub release: Sender<()>,
}

/// Records every mutation and lets tests inject failures by operation name
pub struct MockStorage {
    root: PathBuf,
    required_efi_mb: u64,
    disk: Mutex<Disk>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    holds: Mutex<HashMap<String, (Sender<()>, Receiver<()>)>>,
}

impl MockStorage {
    /// A disk with no product partitions and plenty of space
    pub fn new(root: &Path) -> Arc<Self> {
        Arc::new(Self {
            root: root.to_path_buf(),
            required_efi_mb: 500,
            disk: Mutex::new(Disk {
                firmware_partitions: Vec::new(),
                data_exists: false,
                data_format: None,
                system_free_gb: 50,
                firmware_free_mb: 450,
                system_extended: false,
                failing_data_lookups: 0,
                unresolved_data_lookups: 0,
            }),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            holds: Mutex::new(HashMap::new()),
        })
    }

    /// Existing product partitions with the firmware partition at `efi_mb`
    pub fn provisioned(root: &Path, efi_mb: u64) -> Arc<Self> {
        let storage = Self::new(root);
        {
            let mut disk = storage.disk();
            disk.firmware_partitions.push(efi_mb);
            disk.data_exists = true;
            disk.data_format = Some(FilesystemFormat::Ntfs);
        }
        fs::create_dir_all(storage.data_root()).unwrap();
        fs::create_dir_all(storage.firmware_root()).unwrap();
        storage
    }

    pub fn data_root(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn firmware_root(&self) -> PathBuf {
        self.root.join("esp")
    }

    pub fn disk(&self) -> MutexGuard<'_, Disk> {
        self.disk.lock().unwrap()
    }

    /// Make the named operation fail
    pub fn fail_on(&self, operation: &str) {
        self.failing.lock().unwrap().insert(operation.to_string());
    }

    /// Block the next call of `operation` until released
    pub fn hold(&self, operation: &str) -> Hold {
        let (reached_tx, reached) = mpsc::channel();
        let (release, release_rx) = mpsc::channel();
        self.holds
            .lock()
            .unwrap()
            .insert(operation.to_string(), (reached_tx, release_rx));
        Hold { reached, release }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == operation).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, operation: &str) -> Result<()> {
        self.calls.lock().unwrap().push(operation.to_string());
        let held = self.holds.lock().unwrap().remove(operation);
        if let Some((reached, release)) = held {
            let _ = reached.send(());
            let _ = release.recv();
        }
        if self.failing.lock().unwrap().contains(operation) {
            return Err(Error::partition(operation, "injected failure"));
        }
        Ok(())
    }
}

fn wipe(dir: &Path) {
    let _ = fs::remove_dir_all(dir);
    fs::create_dir_all(dir).unwrap();
}

impl StorageService for MockStorage {
    fn firmware_partition_count(&self) -> Result<usize> {
        Ok(self.disk().firmware_partitions.len())
    }

    fn firmware_partition_size_mb(&self) -> Result<Option<u64>> {
        Ok(self.disk().firmware_partitions.first().copied())
    }

    fn data_partition_exists(&self) -> Result<bool> {
        Ok(self.disk().data_exists)
    }

    fn system_free_bytes(&self) -> Result<u64> {
        Ok(self.disk().system_free_gb * GB)
    }

    fn create_partitions(&self, format: FilesystemFormat, _skip_integrity_check: bool) -> Result<()> {
        self.record("create_partitions")?;
        let mut disk = self.disk();
        disk.data_exists = true;
        disk.data_format = Some(format);
        if disk.firmware_partitions.is_empty() {
            disk.firmware_partitions.push(self.required_efi_mb);
        }
        wipe(&self.data_root());
        wipe(&self.firmware_root());
        Ok(())
    }

    fn delete_partitions(&self) -> Result<()> {
        self.record("delete_partitions")?;
        let mut disk = self.disk();
        disk.firmware_partitions.clear();
        disk.data_exists = false;
        disk.data_format = None;
        let _ = fs::remove_dir_all(self.data_root());
        let _ = fs::remove_dir_all(self.firmware_root());
        Ok(())
    }

    fn reformat_data_partition(&self, format: FilesystemFormat) -> Result<()> {
        self.record("reformat_data")?;
        self.disk().data_format = Some(format);
        wipe(&self.data_root());
        Ok(())
    }

    fn reformat_firmware_partition(&self) -> Result<()> {
        self.record("reformat_firmware")?;
        wipe(&self.firmware_root());
        Ok(())
    }

    fn data_drive(&self) -> Result<Option<PathBuf>> {
        let mut disk = self.disk();
        if disk.failing_data_lookups > 0 {
            disk.failing_data_lookups -= 1;
            return Err(Error::partition("data_drive", "volume query failed"));
        }
        if disk.unresolved_data_lookups > 0 {
            disk.unresolved_data_lookups -= 1;
            return Ok(None);
        }
        Ok(disk.data_exists.then(|| self.data_root()))
    }

    fn firmware_drive(&self) -> Result<Option<PathBuf>> {
        Ok((!self.disk().firmware_partitions.is_empty()).then(|| self.firmware_root()))
    }

    fn free_bytes(&self, _root: &Path) -> Result<u64> {
        Ok(self.disk().firmware_free_mb * MB)
    }

    fn delete_product_volumes(&self) -> Result<()> {
        self.record("delete_product_volumes")?;
        let mut disk = self.disk();
        disk.firmware_partitions.clear();
        disk.data_exists = false;
        disk.data_format = None;
        Ok(())
    }

    fn extend_system_partition(&self) -> Result<()> {
        self.record("extend_system_partition")?;
        self.disk().system_extended = true;
        Ok(())
    }
}
