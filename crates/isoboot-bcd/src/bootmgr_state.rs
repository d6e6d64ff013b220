//! Saved boot manager defaults
//!
//! The `{bootmgr}` default entry and menu timeout are written to a small
//! `key=value` file before the first change so space recovery can put them back.

use std::fs;
use std::path::Path;
use tracing::{debug, info};

use isoboot_core::Result;

use crate::store::{entry_value, BootStore};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootManagerState {
    pub default: Option<String>,
    pub timeout: Option<u32>,
}

impl BootManagerState {
    /// Read from `/enum {bootmgr}` output
    pub fn from_enum(text: &str) -> Self {
        Self {
            default: entry_value(text, "default").filter(|v| !v.is_empty()),
            timeout: entry_value(text, "timeout").and_then(|v| v.parse().ok()),
        }
    }

    pub fn parse(text: &str) -> Self {
        let mut state = Self::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "default" if !value.is_empty() => state.default = Some(value.to_string()),
                "timeout" => state.timeout = value.parse().ok(),
                _ => {}
            }
        }
        state
    }

    pub fn to_text(&self) -> String {
        format!(
            "default={}\ntimeout={}\n",
            self.default.as_deref().unwrap_or_default(),
            self.timeout.map(|t| t.to_string()).unwrap_or_default()
        )
    }

    /// Save the current state unless a backup is already on disk
    pub fn capture(store: &BootStore, path: &Path) -> Result<bool> {
        if path.exists() {
            debug!("Boot manager backup already present at {}", path.display());
            return Ok(false);
        }
        let state = Self::from_enum(&store.enum_entry("{bootmgr}")?);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, state.to_text())?;
        store
            .log()
            .line(format!("Saved boot manager state to {}", path.display()));
        Ok(true)
    }

    /// Re-apply a saved state and remove the backup. `Ok(false)` when none was saved.
    pub fn restore(store: &BootStore, path: &Path) -> Result<bool> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => return Ok(false),
        };
        let state = Self::parse(&text);

        if let Some(default) = &state.default {
            store.set_default(default)?;
        }
        if let Some(timeout) = state.timeout {
            store.run_checked(&[
                String::from("/timeout"),
                timeout.to_string(),
            ])?;
        }
        fs::remove_file(path)?;
        info!("Restored boot manager defaults from {}", path.display());
        Ok(true)
    }
}
