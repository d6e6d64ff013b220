//! Per-area diagnostic log files
//!
//! Every subsystem appends timestamped lines to its own file under one log
//! directory. The directory is carried by an explicit [`LogContext`] handed to
//! each service at construction time, so tests can point it at a temporary
//! directory or disable it entirely.

use chrono::Local;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Log file groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogArea {
    General,
    CopyErrors,
    BootConfig,
    ImageContent,
    Extraction,
    Storage,
}

impl LogArea {
    pub fn file_name(&self) -> &'static str {
        match self {
            LogArea::General => "general_log.log",
            LogArea::CopyErrors => "copy_error_log.log",
            LogArea::BootConfig => "bcd_config_log.log",
            LogArea::ImageContent => "iso_content.log",
            LogArea::Extraction => "iso_extract_log.log",
            LogArea::Storage => "diskpart_log.log",
        }
    }
}

/// Owns the log directory for one process
#[derive(Debug, Clone)]
pub struct LogContext {
    dir: Option<PathBuf>,
    // Serialises appends coming from the worker and recovery threads
    lock: Arc<Mutex<()>>,
}

impl LogContext {
    /// Log into `dir`, creating it on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// A context that discards everything
    pub fn disabled() -> Self {
        Self {
            dir: None,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Path of a file inside the log directory
    pub fn file_path(&self, name: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(name))
    }

    pub fn area(&self, area: LogArea) -> AreaLog {
        AreaLog {
            context: self.clone(),
            area,
        }
    }

    fn append(&self, area: LogArea, text: &str) {
        let Some(dir) = &self.dir else {
            return;
        };
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Err(e) = fs::create_dir_all(dir) {
            warn!("Failed to create log directory {}: {}", dir.display(), e);
            return;
        }

        let path = dir.join(area.file_name());
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| {
                for line in text.lines() {
                    writeln!(file, "[{}] {}", stamp, line)?;
                }
                Ok(())
            });

        if let Err(e) = result {
            warn!("Failed to write log file {}: {}", path.display(), e);
        }
    }
}

/// Append-only handle for one log area
#[derive(Debug, Clone)]
pub struct AreaLog {
    context: LogContext,
    area: LogArea,
}

impl AreaLog {
    pub fn line(&self, text: impl AsRef<str>) {
        self.context.append(self.area, text.as_ref());
    }

    /// Record an executed command and its raw result
    pub fn command(&self, command_line: &str, output: &str) {
        self.line(format!("> {}", command_line));
        let trimmed = output.trim();
        if trimmed.is_empty() {
            self.line("  (no output)");
        } else {
            for line in trimmed.lines() {
                self.line(format!("  {}", line.trim_end()));
            }
        }
    }

    pub fn area(&self) -> LogArea {
        self.area
    }
}
