//! # isoboot-pipeline
//!
//! Turning a disc image into a bootable on-disk entry:
//! - The storage service seam and its PowerShell/diskpart implementation
//! - The three-stage provisioning pipeline
//! - The orchestrator running pipelines and space recovery on worker threads

pub mod orchestrator;
pub mod pipeline;
pub mod recovery;
pub mod services;
pub mod storage;

pub use orchestrator::{
    CancelOutcome, Orchestrator, RecoveryFlag, RecoveryHandle, RunHandle, RunSummary,
    SingleFlight, StatusReport,
};
pub use pipeline::{ContentOutcome, Pipeline, Preparation};
pub use services::Services;
pub use storage::{PowerShellStorage, StorageService};
