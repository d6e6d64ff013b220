//! # isoboot-deploy
//!
//! Getting image content onto disk:
//! - ISO 9660 pre-inspection to classify images without mounting them
//! - The image mount service and a dismount-on-drop guard
//! - Progress-accounted recursive copy with exclusions
//! - What each boot mode copies
//! - Boot-time image servicing with DISM
//! - Content fingerprints for reuse detection
//! - The content deployment engine tying these together

pub mod boot_image;
pub mod copy;
pub mod engine;
pub mod fingerprint;
pub mod iso9660;
pub mod mount;
pub mod policy;

pub use boot_image::{BootImageProcessor, BootImageReport};
pub use copy::{ByteTally, CopyStats, Exclusions, TreeCopier};
pub use engine::{DeployReport, DeployRequest, DeploymentEngine};
pub use fingerprint::{image_hash, FingerprintRecord};
pub use iso9660::has_install_payload;
pub use mount::{ImageMounter, MountGuard, PowerShellMounter};
pub use policy::{deploy_flags, DeployFlags};
