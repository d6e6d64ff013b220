//! Mounter that "mounts" a prepared directory

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use isoboot_core::{Error, Result};
use isoboot_deploy::ImageMounter;

/// Serves a fixed directory as the mounted image root and records calls
pub struct FakeMounter {
    root: PathBuf,
    fail_mount: bool,
    fail_dismount: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeMounter {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            fail_mount: false,
            fail_dismount: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_mount(mut self) -> Self {
        self.fail_mount = true;
        self
    }

    pub fn failing_dismount(mut self) -> Self {
        self.fail_dismount = true;
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
        if self.fail_dismount {
            return Err(Error::dismount(image.display().to_string(), "device busy"));
        }
        Ok(())
    }
}

/// Write `content` at `relative` under `root`, creating parents
pub fn write_file(root: &Path, relative: &str, content: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// A Windows-style installation image tree
pub fn windows_tree(root: &Path) {
    write_file(root, "bootmgr.efi", b"MZ bootmgr");
    write_file(root, "setup.exe", b"MZ setup");
    write_file(root, "sources/boot.wim", b"boot image");
    write_file(root, "sources/install.wim", b"install payload");
    write_file(root, "boot/boot.sdi", b"sdi");
    write_file(root, "efi/boot/bootx64.efi", b"MZ loader");
    write_file(root, "efi/microsoft/boot/bcd", b"bcd");
}

/// A generic (non-Windows) image tree
pub fn generic_tree(root: &Path) {
    write_file(root, "casper/vmlinuz", b"kernel");
    write_file(root, "boot/grub/grub.cfg", b"menuentry");
    write_file(root, "EFI/BOOT/BOOTX64.EFI", b"MZ shim");
}
