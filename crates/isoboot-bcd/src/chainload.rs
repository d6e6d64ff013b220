//! Chain-loader staging for non-Windows images
//!
//! The GRUB binary is copied into `EFI\isoboot` on the firmware partition next
//! to a generated `grub.cfg` that loop-mounts the staged image and hands
//! control to the image's own EFI loader. The binary and the script template
//! are embedded from `assets/`; a configured path replaces the binary.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use rust_embed::RustEmbed;
use tera::{Context, Tera};
use tracing::{debug, info};

use isoboot_core::constants::{BOOT_ENTRY_LABEL, STAGED_IMAGE_NAME};
use isoboot_core::{AreaLog, Error, Result};

/// Chain-loader binary and script template shipped with the tool
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/assets/"]
#[prefix = ""]
struct Bundled;

/// Directory on the firmware partition holding the chain-loader
pub const CHAINLOAD_DIR: [&str; 2] = ["EFI", "isoboot"];

pub const CHAINLOADER_FILE: &str = "grubx64.efi";

pub const CHAINLOAD_CONFIG_FILE: &str = "grub.cfg";

/// Loader path written into the boot entry
pub const CHAINLOADER_ENTRY_PATH: &str = r"\EFI\isoboot\grubx64.efi";

const CONFIG_TEMPLATE: &str = "grub.cfg.tera";

/// Image-side loader GRUB chains into
const IMAGE_LOADER: &str = "/efi/boot/bootx64.efi";

/// The chain-loader binary embedded at build time, if one was packaged
pub fn bundled_chainloader() -> Option<Cow<'static, [u8]>> {
    Bundled::get(CHAINLOADER_FILE).map(|file| file.data)
}

/// Render the loopback boot script
pub fn render_config(image_name: &str, label: &str) -> Result<String> {
    let template = Bundled::get(CONFIG_TEMPLATE)
        .ok_or_else(|| Error::template(format!("{} is not bundled", CONFIG_TEMPLATE)))?;
    let template = std::str::from_utf8(&template.data)
        .map_err(|_| Error::template(format!("invalid UTF-8 in {}", CONFIG_TEMPLATE)))?;

    let mut tera = Tera::default();
    tera.add_raw_template(CHAINLOAD_CONFIG_FILE, template)
        .map_err(|e| Error::template(e.to_string()))?;

    let mut context = Context::new();
    context.insert("image_name", image_name);
    context.insert("label", label);
    context.insert("image_loader", IMAGE_LOADER);

    tera.render(CHAINLOAD_CONFIG_FILE, &context)
        .map_err(|e| Error::template(e.to_string()))
}

pub struct ChainloadStager {
    override_path: Option<PathBuf>,
    log: AreaLog,
}

impl ChainloadStager {
    pub fn new(log: AreaLog) -> Self {
        Self {
            override_path: None,
            log,
        }
    }

    /// Stage this binary instead of the bundled one
    pub fn with_override(mut self, path: Option<PathBuf>) -> Self {
        self.override_path = path;
        self
    }

    fn binary(&self) -> Result<(Cow<'static, [u8]>, String)> {
        match &self.override_path {
            Some(path) => {
                if !path.is_file() {
                    return Err(Error::missing_content(format!(
                        "chain-loader binary not found at {}",
                        path.display()
                    )));
                }
                let bytes = fs::read(path)?;
                Ok((Cow::Owned(bytes), path.display().to_string()))
            }
            None => bundled_chainloader()
                .map(|bytes| (bytes, String::from("bundled chain-loader")))
                .ok_or_else(|| {
                    Error::missing_content(format!(
                        "no chain-loader bundled and none configured ({} missing from assets)",
                        CHAINLOADER_FILE
                    ))
                }),
        }
    }

    /// Copy the chain-loader and write its script; returns the staged binary
    pub fn stage(&self, firmware_root: &Path) -> Result<PathBuf> {
        let (bytes, source) = self.binary()?;

        let dir = CHAINLOAD_DIR
            .iter()
            .fold(firmware_root.to_path_buf(), |path, part| path.join(part));
        fs::create_dir_all(&dir)?;

        let binary = dir.join(CHAINLOADER_FILE);
        fs::write(&binary, &bytes)?;
        debug!("Copied {} to {}", source, binary.display());

        let script = render_config(STAGED_IMAGE_NAME, BOOT_ENTRY_LABEL)?;
        fs::write(dir.join(CHAINLOAD_CONFIG_FILE), script)?;

        self.log
            .line(format!("Staged chain-loader from {} at {}", source, binary.display()));
        info!("Chain-loader staged on the firmware partition");
        Ok(binary)
    }
}
