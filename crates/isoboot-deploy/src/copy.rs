//! Progress-accounted recursive copy
//!
//! Every copy feeds a [`ByteTally`] shared by the whole deployment, so progress
//! is reported as cumulative bytes against one fixed total. Any failure aborts
//! the operation and is written to the copy error log with its OS error code
//! and a readable cause.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use isoboot_core::{AreaLog, Error, EventBus, Result};

const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Subtree carrying the firmware payload on optical images
pub const FIRMWARE_SUBTREE_PATTERNS: &[&str] = &["efi", "efi/**"];

/// Executable extensions whose copies must start with an MZ header
const PE_EXTENSIONS: &[&str] = &["efi", "exe", "dll"];

/// Case-insensitive relative-path exclusions
#[derive(Debug, Clone)]
pub struct Exclusions {
    globset: GlobSet,
}

impl Exclusions {
    pub fn new(patterns: &[&str]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = GlobBuilder::new(pattern)
                .case_insensitive(true)
                .literal_separator(true)
                .build()
                .map_err(|e| {
                    Error::invalid_config(format!("Invalid exclusion pattern '{}': {}", pattern, e))
                })?;
            builder.add(glob);
        }
        let globset = builder
            .build()
            .map_err(|e| Error::invalid_config(format!("Failed to build exclusions: {}", e)))?;
        Ok(Self { globset })
    }

    pub fn none() -> Self {
        Self {
            globset: GlobSet::empty(),
        }
    }

    /// The image tree minus its firmware subtree
    pub fn firmware_subtree() -> Result<Self> {
        Self::new(FIRMWARE_SUBTREE_PATTERNS)
    }

    /// `relative` uses `/` separators
    pub fn should_exclude(&self, relative: &Path) -> bool {
        self.globset.is_match(relative)
    }
}

/// OS error code and readable cause for a failed copy
pub fn describe_io_error(err: &io::Error) -> (i32, &'static str) {
    let code = err.raw_os_error().unwrap_or(-1);

    #[cfg(windows)]
    {
        let cause = match code {
            5 => Some("access denied"),
            2 => Some("file not found"),
            3 => Some("path not found"),
            15 => Some("invalid drive"),
            32 => Some("sharing violation"),
            _ => None,
        };
        if let Some(cause) = cause {
            return (code, cause);
        }
    }

    let cause = match err.kind() {
        io::ErrorKind::PermissionDenied => "access denied",
        io::ErrorKind::NotFound => "file not found",
        _ => "unknown",
    };
    (code, cause)
}

/// Whether `path` starts with the `MZ` executable signature
pub fn has_mz_header(path: &Path) -> bool {
    let mut magic = [0u8; 2];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| &magic == b"MZ")
        .unwrap_or(false)
}

fn is_executable_name(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            PE_EXTENSIONS
                .iter()
                .any(|pe| ext.to_string_lossy().eq_ignore_ascii_case(pe))
        })
        .unwrap_or(false)
}

/// Cumulative bytes copied against a fixed total, shared by every copy of
/// one deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteTally {
    copied: u64,
    total: u64,
}

impl ByteTally {
    pub fn new(total: u64) -> Self {
        Self { copied: 0, total }
    }

    pub fn copied(&self) -> u64 {
        self.copied
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Count `bytes` more; the position never passes the total
    fn advance(&mut self, bytes: u64) {
        self.copied = (self.copied + bytes).min(self.total);
    }
}

/// Totals for one finished copy operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: u64,
    pub directories: u64,
    pub bytes: u64,
}

#[derive(Debug)]
enum PlannedEntry {
    Dir(PathBuf),
    File { src: PathBuf, dest: PathBuf, size: u64 },
}

/// Copies files and trees, publishing progress on the event bus
pub struct TreeCopier {
    events: EventBus,
    error_log: AreaLog,
}

impl TreeCopier {
    pub fn new(events: EventBus, error_log: AreaLog) -> Self {
        Self { events, error_log }
    }

    /// Copy the tree under `src` into `dest`, skipping excluded relative paths
    pub fn copy_tree(
        &self,
        src: &Path,
        dest: &Path,
        exclusions: &Exclusions,
        label: &str,
        tally: &mut ByteTally,
    ) -> Result<CopyStats> {
        let plan = self.plan_tree(src, dest, exclusions)?;
        self.execute(plan, label, tally)
    }

    /// Copy individual files as one progress-accounted operation
    pub fn copy_files(
        &self,
        files: &[(PathBuf, PathBuf)],
        label: &str,
        tally: &mut ByteTally,
    ) -> Result<CopyStats> {
        let mut plan = Vec::with_capacity(files.len());
        for (src, dest) in files {
            let size = fs::metadata(src)
                .map_err(|e| self.fail(src, &e))?
                .len();
            plan.push(PlannedEntry::File {
                src: src.clone(),
                dest: dest.clone(),
                size,
            });
        }
        self.execute(plan, label, tally)
    }

    fn plan_tree(&self, src: &Path, dest: &Path, exclusions: &Exclusions) -> Result<Vec<PlannedEntry>> {
        let mut plan = vec![PlannedEntry::Dir(dest.to_path_buf())];

        let walker = WalkDir::new(src)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
                !exclusions.should_exclude(&slash_path(relative))
            });

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
                let io_err = e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop"));
                self.fail(&path, &io_err)
            })?;

            let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
            let target = dest.join(relative);
            if entry.file_type().is_dir() {
                plan.push(PlannedEntry::Dir(target));
            } else {
                let size = entry
                    .metadata()
                    .map(|m| m.len())
                    .map_err(|e| {
                        let io_err = e
                            .into_io_error()
                            .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "metadata unavailable"));
                        self.fail(entry.path(), &io_err)
                    })?;
                plan.push(PlannedEntry::File {
                    src: entry.path().to_path_buf(),
                    dest: target,
                    size,
                });
            }
        }
        Ok(plan)
    }

    fn execute(&self, plan: Vec<PlannedEntry>, label: &str, tally: &mut ByteTally) -> Result<CopyStats> {
        let mut progress = Progress::new(&self.events, label, tally);
        let mut stats = CopyStats::default();

        for entry in plan {
            match entry {
                PlannedEntry::Dir(dir) => {
                    // create_dir_all treats an existing directory as success
                    fs::create_dir_all(&dir).map_err(|e| self.fail(&dir, &e))?;
                    stats.directories += 1;
                }
                PlannedEntry::File { src, dest, .. } => {
                    if let Some(parent) = dest.parent() {
                        fs::create_dir_all(parent).map_err(|e| self.fail(parent, &e))?;
                    }
                    let bytes = self
                        .copy_file(&src, &dest, &mut progress)
                        .map_err(|e| self.fail(&src, &e))?;
                    self.check_executable(&dest);
                    stats.files += 1;
                    stats.bytes += bytes;
                }
            }
        }

        debug!(
            "{}: {} files, {} directories, {} bytes",
            label, stats.files, stats.directories, stats.bytes
        );
        Ok(stats)
    }

    fn copy_file(&self, src: &Path, dest: &Path, progress: &mut Progress<'_>) -> io::Result<u64> {
        let mut reader = File::open(src)?;
        let mut writer = File::create(dest)?;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut written = 0u64;

        loop {
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            writer.write_all(&buffer[..n])?;
            written += n as u64;
            progress.advance(n as u64);
        }
        writer.flush()?;
        Ok(written)
    }

    fn check_executable(&self, path: &Path) {
        if is_executable_name(path) && !has_mz_header(path) {
            warn!("Copied executable {} has no MZ header", path.display());
            self.error_log
                .line(format!("WARNING: {} does not start with an MZ header", path.display()));
        }
    }

    fn fail(&self, path: &Path, err: &io::Error) -> Error {
        let (code, cause) = describe_io_error(err);
        self.error_log.line(format!(
            "Copy failed: {} (error {}: {}) {}",
            path.display(),
            code,
            cause,
            err
        ));
        Error::Copy {
            path: path.display().to_string(),
            code,
            cause,
        }
    }
}

/// Publishes the tally position under one operation label
struct Progress<'a> {
    events: &'a EventBus,
    label: &'a str,
    tally: &'a mut ByteTally,
}

impl<'a> Progress<'a> {
    fn new(events: &'a EventBus, label: &'a str, tally: &'a mut ByteTally) -> Self {
        let progress = Self {
            events,
            label,
            tally,
        };
        progress.publish();
        progress
    }

    fn publish(&self) {
        if self.tally.total > 0 {
            self.events
                .progress(self.tally.copied, self.tally.total, self.label);
        }
    }

    fn advance(&mut self, bytes: u64) {
        self.tally.advance(bytes);
        self.publish();
    }
}

fn slash_path(relative: &Path) -> PathBuf {
    PathBuf::from(
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"),
    )
}
