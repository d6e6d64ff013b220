//! What each boot mode copies

use isoboot_core::BootMode;

/// What to copy besides the firmware subtree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeployFlags {
    /// Copy the whole image tree, minus the firmware subtree
    pub extract_full_tree: bool,
    /// Stage the boot-time image and its SDI descriptor
    pub extract_boot_image: bool,
    /// Service the copied boot-time image: add drivers, pull its boot files
    pub process_boot_image: bool,
    /// Copy the OS install payload
    pub copy_install_payload: bool,
    /// Copy the image file itself onto the data partition
    pub stage_image_file: bool,
}

/// Deployment flags for `mode` given the image classification
pub fn deploy_flags(mode: BootMode, installable_os: bool) -> DeployFlags {
    match (mode, installable_os) {
        (BootMode::Ramdisk, true) => DeployFlags {
            extract_boot_image: true,
            copy_install_payload: true,
            ..DeployFlags::default()
        },
        (BootMode::Extracted, true) => DeployFlags {
            extract_full_tree: true,
            process_boot_image: true,
            ..DeployFlags::default()
        },
        (BootMode::Ramdisk | BootMode::Extracted, false) => DeployFlags {
            extract_full_tree: true,
            ..DeployFlags::default()
        },
        // The chained loader boots the image file directly
        (BootMode::Chainload, _) => DeployFlags {
            stage_image_file: true,
            ..DeployFlags::default()
        },
    }
}
