//! EFI loader candidates on the firmware partition

use std::path::{Component, Path, PathBuf};

/// Loader locations in priority order; the first one present wins.
///
/// The two casing variants matter on case-sensitive views of FAT volumes.
pub const LOADER_CANDIDATES: [&str; 7] = [
    // Microsoft-style loader staged from the image
    r"EFI\Microsoft\Boot\bootmgr.efi",
    // Generic 64-bit removable-media loader
    r"EFI\BOOT\BOOTX64.EFI",
    r"EFI\boot\bootx64.efi",
    // Generic 32-bit loader
    r"EFI\BOOT\BOOTIA32.EFI",
    r"EFI\boot\bootia32.efi",
    // System-installed 64-bit boot manager
    r"EFI\Microsoft\Boot\bootmgfw.efi",
    r"EFI\microsoft\boot\bootmgfw.efi",
];

/// Join a backslash-separated relative path onto `root`
pub fn join_windows_path(root: &Path, relative: &str) -> PathBuf {
    relative
        .split(['\\', '/'])
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

/// First existing loader under `root`
pub fn find_loader(root: &Path) -> Option<PathBuf> {
    LOADER_CANDIDATES
        .iter()
        .map(|candidate| join_windows_path(root, candidate))
        .find(|path| path.is_file())
}

/// Path of `file` relative to `root` in boot store form (`\EFI\BOOT\BOOTX64.EFI`).
///
/// Casing is taken from `file` as given, not re-read from disk.
pub fn relative_loader_path(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(format!("\\{}", parts.join("\\")))
}
