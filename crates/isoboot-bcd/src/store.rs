//! Boot manager store access through `bcdedit`
//!
//! The store has no structured status contract. A command is considered
//! rejected when the tool exits non-zero or its text mentions an error.

use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use isoboot_core::command::{command_line, CommandOutput, CommandRunner};
use isoboot_core::{AreaLog, Error, Result};

static GUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{[0-9A-Fa-f]{8}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{4}-[0-9A-Fa-f]{12}\}")
        .expect("guid regex is valid")
});

/// Identifiers the product never deletes
pub const PROTECTED_IDENTIFIERS: [&str; 2] = ["{current}", "{bootmgr}"];

/// One entry block from `/enum` output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreEntry {
    /// Block heading such as "Windows Boot Loader"
    pub kind: String,
    pub identifier: String,
    pub values: Vec<(String, String)>,
}

impl StoreEntry {
    /// First value stored under `key`, compared case-insensitively
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn description(&self) -> Option<&str> {
        self.value("description")
    }

    /// Whether the description is exactly one of `labels`, ignoring case
    pub fn is_labelled(&self, labels: &[&str]) -> bool {
        self.description()
            .map(|d| labels.iter().any(|label| d.trim().eq_ignore_ascii_case(label)))
            .unwrap_or(false)
    }

    pub fn is_protected(&self) -> bool {
        PROTECTED_IDENTIFIERS
            .iter()
            .any(|id| self.identifier.eq_ignore_ascii_case(id))
    }
}

/// Split `/enum` output into entry blocks.
///
/// Blocks are separated by blank lines. Each starts with a heading and a
/// dashed underline followed by `key   value` lines. Continuation lines
/// (a value wrapped onto the next line) are appended to the previous key.
pub fn parse_entries(text: &str) -> Vec<StoreEntry> {
    let lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    let mut entries = Vec::new();
    let mut current = StoreEntry::default();

    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            push_entry(&mut entries, std::mem::take(&mut current));
            continue;
        }
        if line.trim_start().starts_with("---") {
            continue;
        }
        let underlined = lines
            .get(index + 1)
            .map(|next| next.trim_start().starts_with("---"))
            .unwrap_or(false);
        if underlined {
            push_entry(&mut entries, std::mem::take(&mut current));
            current.kind = line.trim().to_string();
            continue;
        }

        if line.starts_with(char::is_whitespace) {
            if let Some((_, last)) = current.values.last_mut() {
                last.push(' ');
                last.push_str(line.trim());
            }
            continue;
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let key = parts.next().unwrap_or_default();
        let value = parts.next().map(str::trim).unwrap_or_default();
        if key.eq_ignore_ascii_case("identifier") {
            current.identifier = value.to_string();
        } else {
            current.values.push((key.to_string(), value.to_string()));
        }
    }
    push_entry(&mut entries, current);
    entries
}

fn push_entry(entries: &mut Vec<StoreEntry>, entry: StoreEntry) {
    if !entry.identifier.is_empty() {
        entries.push(entry);
    }
}

/// First `{xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}` in `text`
pub fn extract_guid(text: &str) -> Option<String> {
    GUID_RE.find(text).map(|m| m.as_str().to_string())
}

/// Value of the first `key   value` line in single-entry output
pub fn entry_value(text: &str, key: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let mut parts = line.trim().splitn(2, char::is_whitespace);
        let k = parts.next()?;
        if k.eq_ignore_ascii_case(key) {
            Some(parts.next().unwrap_or_default().trim().to_string())
        } else {
            None
        }
    })
}

fn mentions_error(text: &str) -> bool {
    text.to_ascii_lowercase().contains("error")
}

fn already_exists(text: &str) -> bool {
    text.to_ascii_lowercase().contains("already exists")
}

/// `bcdedit` wrapper that records every command in the boot configuration log
#[derive(Clone)]
pub struct BootStore {
    runner: Arc<dyn CommandRunner>,
    program: String,
    log: AreaLog,
}

impl BootStore {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>, log: AreaLog) -> Self {
        Self {
            runner,
            program: program.into(),
            log,
        }
    }

    pub fn log(&self) -> &AreaLog {
        &self.log
    }

    fn exec(&self, args: &[String]) -> Result<CommandOutput> {
        let line = command_line(&self.program, args);
        debug!("{}", line);
        let output = self.runner.run(&self.program, args)?;
        self.log.command(&line, &output.text());
        Ok(output)
    }

    /// Run a command and return its text whatever the outcome
    pub fn run(&self, args: &[String]) -> Result<String> {
        Ok(self.exec(args)?.text())
    }

    /// Run a command that must succeed
    pub fn run_checked(&self, args: &[String]) -> Result<String> {
        let output = self.exec(args)?;
        let text = output.text();
        if !output.success() || mentions_error(&text) {
            return Err(Error::boot_store(
                command_line(&self.program, args),
                text.trim(),
            ));
        }
        Ok(text)
    }

    /// Run a creation command where "already exists" counts as success
    pub fn run_tolerating_existing(&self, args: &[String]) -> Result<String> {
        let output = self.exec(args)?;
        let text = output.text();
        if already_exists(&text) {
            debug!("Store object already exists, reusing it");
            return Ok(text);
        }
        if !output.success() || mentions_error(&text) {
            return Err(Error::boot_store(
                command_line(&self.program, args),
                text.trim(),
            ));
        }
        Ok(text)
    }

    /// Run a read-only query; only the exit status decides, since entry
    /// descriptions are free text
    fn query(&self, args: &[String]) -> Result<String> {
        let output = self.exec(args)?;
        if !output.success() {
            return Err(Error::boot_store(
                command_line(&self.program, args),
                output.text().trim(),
            ));
        }
        Ok(output.text())
    }

    pub fn enum_all(&self) -> Result<Vec<StoreEntry>> {
        let text = self.query(&[String::from("/enum"), String::from("all")])?;
        Ok(parse_entries(&text))
    }

    /// Raw `/enum <id>` text
    pub fn enum_entry(&self, identifier: &str) -> Result<String> {
        self.query(&[String::from("/enum"), identifier.to_string()])
    }

    /// Duplicate the default entry under `description` and return the new identifier
    pub fn copy_default(&self, description: &str) -> Result<String> {
        let argv = vec![
            String::from("/copy"),
            String::from("{default}"),
            String::from("/d"),
            description.to_string(),
        ];
        let text = self.run_checked(&argv)?;
        extract_guid(&text).ok_or_else(|| {
            Error::boot_store(
                command_line(&self.program, &argv),
                format!("no identifier in output: {}", text.trim()),
            )
        })
    }

    /// Delete an entry and drop it from the display order
    pub fn delete_entry(&self, identifier: &str) -> Result<()> {
        self.run_checked(&[
            String::from("/delete"),
            identifier.to_string(),
            String::from("/f"),
        ])?;
        // Usually already gone from the order once deleted
        let _ = self.run(&[
            String::from("/displayorder"),
            identifier.to_string(),
            String::from("/remove"),
        ])?;
        Ok(())
    }

    /// Entries whose description carries `label`, protected identifiers excluded
    pub fn labelled_entries(&self, labels: &[&str]) -> Result<Vec<StoreEntry>> {
        Ok(self
            .enum_all()?
            .into_iter()
            .filter(|e| e.is_labelled(labels) && !e.is_protected())
            .collect())
    }

    /// Delete every entry described by one of `labels`; returns how many went
    pub fn delete_labelled(&self, labels: &[&str]) -> Result<usize> {
        let stale = self.labelled_entries(labels)?;
        if stale.len() > 1 {
            warn!("Found {} stale product boot entries", stale.len());
        }
        for entry in &stale {
            self.log.line(format!(
                "Removing stale entry {} ({})",
                entry.identifier,
                entry.description().unwrap_or_default()
            ));
            self.delete_entry(&entry.identifier)?;
        }
        Ok(stale.len())
    }

    pub fn set_default(&self, identifier: &str) -> Result<()> {
        self.run_checked(&[String::from("/default"), identifier.to_string()])?;
        Ok(())
    }

    /// `/set <id> <key> <value>`
    pub fn set_value(&self, identifier: &str, key: &str, value: &str) -> Result<()> {
        self.run_checked(&[
            String::from("/set"),
            identifier.to_string(),
            key.to_string(),
            value.to_string(),
        ])?;
        Ok(())
    }

    /// `/deletevalue <id> <key>`; absence of the value is not an error
    pub fn delete_value(&self, identifier: &str, key: &str) -> Result<()> {
        let text = self.run(&[
            String::from("/deletevalue"),
            identifier.to_string(),
            key.to_string(),
        ])?;
        if mentions_error(&text) {
            debug!("{} had no {} value", identifier, key);
        }
        Ok(())
    }
}
