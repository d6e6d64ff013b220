//! Mounter that "mounts" a prepared directory

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use isoboot_core::{Error, Result};
use isoboot_deploy::ImageMounter;

use super::pe_bytes;

/// Serves a fixed directory as the mounted image root and records calls
pub struct FakeMounter {
    root: PathBuf,
    fail_mount: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeMounter {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            fail_mount: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[allow(dead_code)]
    pub fn failing_mount(mut self) -> Self {
        self.fail_mount = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ImageMounter for FakeMounter {
    fn mount(&self, image: &Path) -> Result<PathBuf> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("mount {}", image.display()));
        if self.fail_mount {
            return Err(Error::mount(image.display().to_string(), "FAILED"));
        }
        Ok(self.root.clone())
    }

    fn dismount(&self, image: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("dismount {}", image.display()));
        Ok(())
    }
}

/// Write `content` at `relative` under `root`, creating parents
pub fn write_file(root: &Path, relative: &str, content: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// A generic image tree with a bootable 64-bit removable-media loader
pub fn generic_tree(root: &Path) {
    write_file(root, "casper/vmlinuz", b"kernel");
    write_file(root, "boot/grub/grub.cfg", b"menuentry");
    write_file(root, "EFI/BOOT/BOOTX64.EFI", &pe_bytes(0x8664));
}

/// A Windows installation image tree
pub fn windows_tree(root: &Path) {
    write_file(root, "bootmgr.efi", &pe_bytes(0x8664));
    write_file(root, "setup.exe", b"MZ setup");
    write_file(root, "sources/boot.wim", b"boot image");
    write_file(root, "sources/install.wim", b"install payload");
    write_file(root, "boot/boot.sdi", b"sdi");
    write_file(root, "EFI/BOOT/BOOTX64.EFI", &pe_bytes(0x8664));
    write_file(root, "EFI/Microsoft/Boot/BCD", b"bcd");
}
