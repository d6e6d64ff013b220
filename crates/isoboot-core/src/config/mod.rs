//! Configuration loading (isoboot.yaml)

mod loader;

pub use loader::{IsobootConfig, Settings, CONFIG_FILE_NAMES};
