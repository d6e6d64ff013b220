//! Scripted DISM that records every invocation

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use isoboot_core::{CommandOutput, CommandRunner, Result};

pub const WIM_INFO: &str = "\
Details for image : boot.wim

Index : 1
Name : Microsoft Windows PE (amd64)
Description : Microsoft Windows PE (amd64)

Index : 2
Name : Microsoft Windows Setup (amd64)
Description : Microsoft Windows Setup (amd64)

The operation completed successfully.
";

/// Loader bytes found inside the mounted boot-time image
pub const WIM_LOADER: &[u8] = b"MZ loader from boot.wim";

#[derive(Default)]
pub struct FakeDism {
    calls: Mutex<Vec<String>>,
    fail_mount: bool,
    signed_only: bool,
    fail_add_driver: bool,
    ships_startnet: bool,
}

impl FakeDism {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_mount(mut self) -> Self {
        self.fail_mount = true;
        self
    }

    /// Add-Driver only succeeds with /ForceUnsigned
    pub fn unsigned_drivers(mut self) -> Self {
        self.signed_only = true;
        self
    }

    pub fn failing_add_driver(mut self) -> Self {
        self.fail_add_driver = true;
        self
    }

    /// The mounted image already carries startnet.cmd
    pub fn with_startnet(mut self) -> Self {
        self.ships_startnet = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, needle: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains(needle))
            .collect()
    }

    fn populate(&self, mount_dir: &str) {
        let root = PathBuf::from(mount_dir);
        let files: [(&str, &[u8]); 5] = [
            ("Windows/Boot/EFI/bootmgfw.efi", WIM_LOADER),
            ("Windows/Boot/EFI/bootx64.efi", WIM_LOADER),
            ("Windows/Boot/Fonts/wgl4_boot.ttf", b"font"),
            ("Boot/boot.sdi", b"sdi from boot.wim"),
            ("Boot/BCD", b"bcd from boot.wim"),
        ];
        for (relative, content) in files {
            let path = root.join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        if self.ships_startnet {
            let path = root.join("Windows/System32/startnet.cmd");
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, "wpeinit").unwrap();
        }
    }
}

impl CommandRunner for FakeDism {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", program, args.join(" ")));

        let first = args.first().map(String::as_str).unwrap_or("");
        let output = match first {
            "/Get-WimInfo" => CommandOutput::ok(WIM_INFO),
            "/Mount-Wim" if self.fail_mount => CommandOutput::failed(5, "Error: 0xc1420127"),
            "/Mount-Wim" => {
                if let Some(dir) = args.iter().find_map(|a| a.strip_prefix("/MountDir:")) {
                    self.populate(dir);
                }
                CommandOutput::ok("The operation completed successfully.")
            }
            "/Unmount-Wim" => CommandOutput::ok("The operation completed successfully."),
            image if image.starts_with("/Image:") => {
                let forced = args.iter().any(|a| a == "/ForceUnsigned");
                if self.fail_add_driver || (self.signed_only && !forced) {
                    CommandOutput::failed(50, "Error: 50 driver not signed")
                } else {
                    CommandOutput::ok("The driver package was successfully installed.")
                }
            }
            _ => CommandOutput::failed(87, "unknown option"),
        };
        Ok(output)
    }
}
