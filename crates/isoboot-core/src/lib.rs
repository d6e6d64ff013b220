//! # isoboot-core
//!
//! Core library for isoboot providing:
//! - Error taxonomy shared by every crate
//! - Configuration file parsing (isoboot.yaml)
//! - The cross-thread event bus
//! - Per-area diagnostic log files
//! - The external command seam and shared domain types

pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod loader;
pub mod logging;
pub mod types;

pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use config::{IsobootConfig, Settings};
pub use error::{Error, ErrorCategory, Result};
pub use events::{Event, EventBus, Subscription};
pub use logging::{AreaLog, LogArea, LogContext};
pub use types::{
    BootMode, DriveBinding, FilesystemFormat, FirmwareKind, PipelineRequest, ProgressEvent, Stage,
};
