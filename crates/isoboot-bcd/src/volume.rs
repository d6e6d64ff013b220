//! Volume identifier resolution

use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use isoboot_core::command::{args, command_line, CommandRunner};
use isoboot_core::{AreaLog, Error, Result};

static VOLUME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\\\\?\\Volume\{[0-9A-Fa-f-]+\}\\").expect("volume regex is valid")
});

/// Maps a drive spec (`Z:`) to its stable volume identifier
pub trait VolumeResolver: Send + Sync {
    fn volume_id(&self, drive: &str) -> Result<String>;
}

/// First `\\?\Volume{…}\` path in `mountvol` output
pub fn parse_volume_id(output: &str) -> Option<String> {
    VOLUME_RE.find(output).map(|m| m.as_str().to_string())
}

/// Resolves identifiers with `mountvol <drive> /L`
pub struct MountvolResolver {
    runner: Arc<dyn CommandRunner>,
    attempts: u32,
    retry_delay: Duration,
    log: AreaLog,
}

impl MountvolResolver {
    pub fn new(runner: Arc<dyn CommandRunner>, attempts: u32, log: AreaLog) -> Self {
        Self {
            runner,
            attempts: attempts.max(1),
            retry_delay: Duration::from_secs(1),
            log,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

impl VolumeResolver for MountvolResolver {
    fn volume_id(&self, drive: &str) -> Result<String> {
        let argv = args([drive, "/L"]);
        for attempt in 1..=self.attempts {
            let output = self.runner.run("mountvol", &argv)?;
            let text = output.text();
            self.log.command(&command_line("mountvol", &argv), &text);

            if let Some(id) = parse_volume_id(&text) {
                debug!("{} is {}", drive, id);
                return Ok(id);
            }
            warn!(
                "No volume identifier for {} (attempt {}/{})",
                drive, attempt, self.attempts
            );
            if attempt < self.attempts && !self.retry_delay.is_zero() {
                thread::sleep(self.retry_delay);
            }
        }
        Err(Error::command(
            "mountvol",
            format!("no volume identifier for {}", drive),
        ))
    }
}
