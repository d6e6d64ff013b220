//! # isoboot-bcd
//!
//! Boot manager store handling for isoboot:
//! - `bcdedit` invocation and output parsing
//! - Boot strategies (ramdisk, extracted, chainload) as command lists
//! - Loader PE header inspection
//! - Volume identifier and firmware type queries
//! - The configurator that creates and verifies the product boot entry

pub mod bootmgr_state;
pub mod chainload;
pub mod configurator;
pub mod firmware;
pub mod pe;
pub mod store;
pub mod strategy;
pub mod volume;

pub use bootmgr_state::BootManagerState;
pub use chainload::ChainloadStager;
pub use configurator::{BootConfigurator, ConfiguredEntry};
pub use firmware::{BcdFirmwareInfo, FirmwareInfo};
pub use store::{BootStore, StoreEntry};
pub use strategy::{BootCommand, BootStrategy, StrategyTarget};
pub use volume::{MountvolResolver, VolumeResolver};
