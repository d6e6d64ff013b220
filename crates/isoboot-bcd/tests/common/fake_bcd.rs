//! In-memory `bcdedit`/`mountvol`

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use isoboot_core::{CommandOutput, CommandRunner, Result};

const OK: &str = "The operation completed successfully.";

#[derive(Debug, Clone)]
pub struct FakeEntry {
    pub id: String,
    pub kind: String,
    pub values: Vec<(String, String)>,
}

impl FakeEntry {
    pub fn new(id: &str, kind: &str, values: &[(&str, &str)]) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn set(&mut self, key: &str, value: &str) {
        match self.values.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.values.push((key.to_string(), value.to_string())),
        }
    }

    fn render(&self) -> String {
        let mut out = format!("{}\n{}\n", self.kind, "-".repeat(self.kind.len()));
        out.push_str(&format!("{:<24}{}\n", "identifier", self.id));
        for (key, value) in &self.values {
            out.push_str(&format!("{:<24}{}\n", key, value));
        }
        out
    }
}

#[derive(Debug)]
pub struct BcdState {
    pub entries: Vec<FakeEntry>,
    pub default: String,
    pub timeout: u32,
    pub display_order: Vec<String>,
    next_guid: u32,
}

impl BcdState {
    pub fn entry(&self, id: &str) -> Option<&FakeEntry> {
        let id = self.resolve(id);
        self.entries.iter().find(|e| e.id.eq_ignore_ascii_case(&id))
    }

    pub fn labelled(&self, label: &str) -> Vec<&FakeEntry> {
        self.entries
            .iter()
            .filter(|e| {
                e.get("description")
                    .map(|d| d.to_uppercase().contains(label))
                    .unwrap_or(false)
            })
            .collect()
    }

    fn resolve(&self, id: &str) -> String {
        if id == "{default}" {
            self.default.clone()
        } else {
            id.to_string()
        }
    }

    fn entry_mut(&mut self, id: &str) -> Option<&mut FakeEntry> {
        let id = self.resolve(id);
        self.entries
            .iter_mut()
            .find(|e| e.id.eq_ignore_ascii_case(&id))
    }

    fn render_bootmgr(&self) -> String {
        let mut entry = FakeEntry::new(
            "{bootmgr}",
            "Windows Boot Manager",
            &[("description", "Windows Boot Manager")],
        );
        entry.set("default", &self.default);
        entry.set("timeout", &self.timeout.to_string());
        if !self.display_order.is_empty() {
            entry.set("displayorder", &self.display_order.join("\n                        "));
        }
        entry.render()
    }
}

/// Scripted boot store with failure injection
pub struct FakeBcd {
    state: Mutex<BcdState>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
    unresolvable_drives: Mutex<HashSet<String>>,
    copy_reply: Mutex<Option<String>>,
}

impl FakeBcd {
    pub fn new() -> Arc<Self> {
        let current = FakeEntry::new(
            "{current}",
            "Windows Boot Loader",
            &[
                ("device", "partition=C:"),
                ("path", r"\WINDOWS\system32\winload.efi"),
                ("description", "Windows 11"),
                ("osdevice", "partition=C:"),
                ("systemroot", r"\WINDOWS"),
            ],
        );
        Arc::new(Self {
            state: Mutex::new(BcdState {
                entries: vec![current],
                default: "{current}".to_string(),
                timeout: 0,
                display_order: vec!["{current}".to_string()],
                next_guid: 1,
            }),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(Vec::new()),
            unresolvable_drives: Mutex::new(HashSet::new()),
            copy_reply: Mutex::new(None),
        })
    }

    /// Add an existing entry with the given description
    pub fn with_entry(self: Arc<Self>, id: &str, description: &str) -> Arc<Self> {
        {
            let mut state = self.state.lock().unwrap();
            state.entries.push(FakeEntry::new(
                id,
                "Windows Boot Loader",
                &[("description", description), ("device", "partition=Q:")],
            ));
            state.display_order.push(id.to_string());
        }
        self
    }

    /// Any command line containing `fragment` replies with an error
    pub fn fail_when(&self, fragment: &str) {
        self.failing.lock().unwrap().push(fragment.to_string());
    }

    pub fn unresolvable(&self, drive: &str) {
        self.unresolvable_drives
            .lock()
            .unwrap()
            .insert(drive.to_string());
    }

    /// Replace the `/copy` reply text
    pub fn copy_replies(&self, text: &str) {
        *self.copy_reply.lock().unwrap() = Some(text.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, BcdState> {
        self.state.lock().unwrap()
    }

    fn mountvol(&self, args: &[String]) -> CommandOutput {
        let drive = args.first().cloned().unwrap_or_default();
        if self.unresolvable_drives.lock().unwrap().contains(&drive) {
            return CommandOutput::ok("The parameter is incorrect.");
        }
        let n = drive.len() as u32;
        CommandOutput::ok(format!(
            "    \\\\?\\Volume{{{:08x}-0000-0000-0000-000000000000}}\\\n",
            n
        ))
    }

    fn bcdedit(&self, args: &[String]) -> CommandOutput {
        let mut state = self.state.lock().unwrap();
        let arg = |i: usize| args.get(i).map(String::as_str).unwrap_or_default();

        match arg(0) {
            "/enum" => match arg(1) {
                "all" => {
                    let mut out = state.render_bootmgr();
                    for entry in &state.entries {
                        out.push('\n');
                        out.push_str(&entry.render());
                    }
                    CommandOutput::ok(out)
                }
                "{bootmgr}" => CommandOutput::ok(state.render_bootmgr()),
                id => match state.entry(id) {
                    Some(entry) => CommandOutput::ok(entry.render()),
                    None => CommandOutput::failed(
                        1,
                        "The boot configuration data store could not be opened.\nThe system cannot find the file specified.",
                    ),
                },
            },
            "/copy" => {
                if let Some(reply) = self.copy_reply.lock().unwrap().clone() {
                    return CommandOutput::ok(reply);
                }
                let Some(source) = state.entry(arg(1)).cloned() else {
                    return CommandOutput::failed(1, "An error occurred: entry not found");
                };
                let id = format!("{{00000000-0000-0000-0000-{:012}}}", state.next_guid);
                state.next_guid += 1;
                let mut copy = FakeEntry {
                    id: id.clone(),
                    ..source
                };
                copy.set("description", arg(3));
                state.entries.push(copy);
                CommandOutput::ok(format!("The entry was successfully copied to {}.", id))
            }
            "/create" => {
                if state.entry(arg(1)).is_some() {
                    return CommandOutput::failed(
                        1,
                        "An error occurred while attempting to create the specified entry.\nThe specified entry already exists.",
                    );
                }
                let entry = FakeEntry::new(arg(1), "Setup Ramdisk Options", &[("description", arg(3))]);
                state.entries.push(entry);
                CommandOutput::ok(OK)
            }
            "/set" => match state.entry_mut(arg(1)) {
                Some(entry) => {
                    entry.set(arg(2), arg(3));
                    CommandOutput::ok(OK)
                }
                None if arg(1) == "{bootmgr}" && arg(2) == "timeout" => {
                    state.timeout = arg(3).parse().unwrap_or(0);
                    CommandOutput::ok(OK)
                }
                None => CommandOutput::failed(1, "An error occurred while attempting to reference the specified entry."),
            },
            "/deletevalue" => match state.entry_mut(arg(1)) {
                Some(entry) => {
                    let before = entry.values.len();
                    entry.values.retain(|(k, _)| k != arg(2));
                    if entry.values.len() == before {
                        CommandOutput::failed(1, "An error occurred while attempting to delete the specified data element.")
                    } else {
                        CommandOutput::ok(OK)
                    }
                }
                None => CommandOutput::failed(1, "An error occurred."),
            },
            "/delete" => {
                let id = arg(1).to_string();
                let before = state.entries.len();
                state.entries.retain(|e| !e.id.eq_ignore_ascii_case(&id));
                if state.entries.len() == before {
                    CommandOutput::failed(1, "An error occurred: the specified entry was not found.")
                } else {
                    CommandOutput::ok(OK)
                }
            }
            "/displayorder" => {
                let id = arg(1).to_string();
                state.display_order.retain(|e| e != &id);
                if arg(2) == "/addfirst" {
                    state.display_order.insert(0, id);
                }
                CommandOutput::ok(OK)
            }
            "/default" => {
                let id = arg(1).to_string();
                if id != "{current}" && state.entry(&id).is_none() {
                    return CommandOutput::failed(1, "An error occurred while attempting to set the default.");
                }
                state.default = id;
                CommandOutput::ok(OK)
            }
            "/timeout" => {
                state.timeout = arg(1).parse().unwrap_or(0);
                CommandOutput::ok(OK)
            }
            other => CommandOutput::failed(1, format!("The parameter {} is incorrect.", other)),
        }
    }
}

impl CommandRunner for FakeBcd {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let line = format!("{} {}", program, args.join(" "));
        self.calls.lock().unwrap().push(line.clone());

        if self
            .failing
            .lock()
            .unwrap()
            .iter()
            .any(|fragment| line.contains(fragment.as_str()))
        {
            return Ok(CommandOutput::failed(1, "An error occurred (injected)."));
        }

        Ok(if program == "mountvol" {
            self.mountvol(args)
        } else {
            self.bcdedit(args)
        })
    }
}

/// Minimal PE image for `machine`
pub fn pe_bytes(machine: u16) -> Vec<u8> {
    let mut bytes = vec![0u8; 0x100];
    bytes[0..2].copy_from_slice(b"MZ");
    bytes[0x3C..0x40].copy_from_slice(&0x80u32.to_le_bytes());
    bytes[0x80..0x84].copy_from_slice(b"PE\0\0");
    bytes[0x84..0x86].copy_from_slice(&machine.to_le_bytes());
    bytes
}

/// Write a loader at a backslash-separated path under `root`
pub fn write_loader(root: &Path, relative: &str, machine: u16) {
    let path = relative
        .split('\\')
        .fold(root.to_path_buf(), |p, part| p.join(part));
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, pe_bytes(machine)).unwrap();
}
