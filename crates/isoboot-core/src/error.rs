//! Error types for isoboot

use serde::Serialize;
use thiserror::Error;

/// Result type alias using isoboot-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Broad failure classes surfaced to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Preconditions on disk space or partition layout were not met
    Validation,
    /// Partitions could not be created, reformatted or resolved
    Provisioning,
    /// Image content could not be mounted, copied or verified
    Deployment,
    /// The boot manager store could not be configured
    BootConfig,
    /// Everything else: I/O, configuration, process spawning, cancellation
    Runtime,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Provisioning => "provisioning",
            ErrorCategory::Deployment => "deployment",
            ErrorCategory::BootConfig => "boot configuration",
            ErrorCategory::Runtime => "runtime",
        };
        write!(f, "{}", name)
    }
}

/// Core error types for isoboot
#[derive(Error, Debug)]
pub enum Error {
    /// Not enough free space on the system disk to carve the partitions
    #[error("Insufficient space: requires at least {required_gb} GB, only {available_gb} GB available")]
    InsufficientSpace { required_gb: u64, available_gb: u64 },

    /// Firmware partition is present but too full
    #[error(
        "Insufficient space on the EFI partition: requires at least {required_mb} MB, only {available_mb} MB available"
    )]
    InsufficientFirmwareSpace { required_mb: u64, available_mb: u64 },

    /// More than one firmware partition carries the product label
    #[error("Cleanup of {count} duplicate EFI partitions failed: {message}")]
    DuplicateCleanupFailed { count: usize, message: String },

    /// Wrong-sized firmware partition could not be removed
    #[error("Cleanup of wrong-sized EFI partition ({size_mb} MB, expected {expected_mb} MB) failed: {message}")]
    WrongSizeCleanupFailed {
        size_mb: u64,
        expected_mb: u64,
        message: String,
    },

    /// Partition create/reformat failure
    #[error("Partition operation '{operation}' failed: {message}")]
    Partition { operation: String, message: String },

    /// Partition drive could not be resolved
    #[error("Cannot access the {label} partition")]
    DriveUnresolved { label: String },

    /// Image could not be mounted
    #[error("Failed to mount image {path}: {message}")]
    Mount { path: String, message: String },

    /// Image could not be dismounted
    #[error("Failed to dismount image {path}: {message}")]
    Dismount { path: String, message: String },

    /// A file or directory copy failed
    #[error("Failed to copy {path}: {cause} (error code {code})")]
    Copy {
        path: String,
        code: i32,
        cause: &'static str,
    },

    /// Image content is missing something the chosen mode needs
    #[error("Image content is incomplete: {message}")]
    MissingContent { message: String },

    /// The boot-time image could not be serviced
    #[error("Boot image processing failed: {message}")]
    BootImage { message: String },

    /// No boot loader could be found
    #[error("No usable EFI boot loader found under {root}")]
    LoaderNotFound { root: String },

    /// Loader targets an unsupported machine
    #[error("Unsupported EFI loader architecture 0x{machine:04X} in {path}")]
    UnsupportedArchitecture { path: String, machine: u16 },

    /// Volume identifier resolution failed
    #[error("Cannot resolve the volume identifier of the {role} drive {drive}")]
    VolumeIdentifier { role: String, drive: String },

    /// The boot manager store rejected a command
    #[error("Boot store command `{command}` failed: {output}")]
    BootStore { command: String, output: String },

    /// A configured boot entry did not read back as expected
    #[error("Boot entry {entry} failed verification: {message}")]
    Verification { entry: String, message: String },

    /// Boot script template failed to render
    #[error("Template error: {message}")]
    Template { message: String },

    /// Unknown boot mode key
    #[error("Invalid boot mode: {key}")]
    InvalidBootMode { key: String },

    /// Unknown filesystem format
    #[error("Unsupported filesystem format: {format}")]
    InvalidFormat { format: String },

    /// External program could not be started
    #[error("Failed to run {program}: {message}")]
    Command { program: String, message: String },

    /// A second recovery was requested while one is running
    #[error("Space recovery is already in progress")]
    RecoveryInProgress,

    /// The run was cancelled between stages
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Category this error belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InsufficientSpace { .. }
            | Error::InsufficientFirmwareSpace { .. }
            | Error::DuplicateCleanupFailed { .. }
            | Error::WrongSizeCleanupFailed { .. } => ErrorCategory::Validation,
            Error::Partition { .. } | Error::DriveUnresolved { .. } => ErrorCategory::Provisioning,
            Error::Mount { .. }
            | Error::Dismount { .. }
            | Error::Copy { .. }
            | Error::MissingContent { .. }
            | Error::BootImage { .. }
            | Error::LoaderNotFound { .. } => ErrorCategory::Deployment,
            Error::UnsupportedArchitecture { .. }
            | Error::VolumeIdentifier { .. }
            | Error::BootStore { .. }
            | Error::Verification { .. }
            | Error::Template { .. }
            | Error::InvalidBootMode { .. } => ErrorCategory::BootConfig,
            Error::InvalidFormat { .. }
            | Error::Command { .. }
            | Error::RecoveryInProgress
            | Error::Cancelled
            | Error::ConfigNotFound { .. }
            | Error::InvalidConfig { .. }
            | Error::YamlParse(_)
            | Error::Io(_) => ErrorCategory::Runtime,
        }
    }

    /// Create an insufficient space error
    pub fn insufficient_space(required_gb: u64, available_gb: u64) -> Self {
        Self::InsufficientSpace {
            required_gb,
            available_gb,
        }
    }

    /// Create an insufficient firmware space error
    pub fn insufficient_firmware_space(required_mb: u64, available_mb: u64) -> Self {
        Self::InsufficientFirmwareSpace {
            required_mb,
            available_mb,
        }
    }

    /// Create a partition operation error
    pub fn partition(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Partition {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an unresolved drive error
    pub fn drive_unresolved(label: impl Into<String>) -> Self {
        Self::DriveUnresolved {
            label: label.into(),
        }
    }

    /// Create a mount error
    pub fn mount(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mount {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a dismount error
    pub fn dismount(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Dismount {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a missing content error
    pub fn missing_content(message: impl Into<String>) -> Self {
        Self::MissingContent {
            message: message.into(),
        }
    }

    /// Create a boot image processing error
    pub fn boot_image(message: impl Into<String>) -> Self {
        Self::BootImage {
            message: message.into(),
        }
    }

    /// Create a loader not found error
    pub fn loader_not_found(root: impl Into<String>) -> Self {
        Self::LoaderNotFound { root: root.into() }
    }

    /// Create a volume identifier error
    pub fn volume_identifier(role: impl Into<String>, drive: impl Into<String>) -> Self {
        Self::VolumeIdentifier {
            role: role.into(),
            drive: drive.into(),
        }
    }

    /// Create a boot store error
    pub fn boot_store(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self::BootStore {
            command: command.into(),
            output: output.into(),
        }
    }

    /// Create a verification error
    pub fn verification(entry: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Verification {
            entry: entry.into(),
            message: message.into(),
        }
    }

    /// Create an invalid boot mode error
    pub fn invalid_boot_mode(key: impl Into<String>) -> Self {
        Self::InvalidBootMode { key: key.into() }
    }

    /// Create a command error
    pub fn command(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Create a template rendering error
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
