//! Status command

use anyhow::Result;
use camino::Utf8Path;

use super::Context;
use crate::cli::StatusArgs;
use crate::output;

pub fn run(args: StatusArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    let ctx = Context::load(config_path)?;
    let report = ctx.orchestrator().status()?;

    output::header("isoboot status");
    output::kv(
        "Data partition",
        &report
            .data_drive
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "not present".to_string()),
    );
    let firmware = match (&report.firmware_drive, report.firmware_size_mb) {
        (Some(drive), Some(size)) => format!("{} ({} MB)", drive.display(), size),
        (None, Some(size)) => format!("no drive letter ({} MB)", size),
        _ => "not present".to_string(),
    };
    output::kv("EFI partition", &firmware);

    match &report.fingerprint {
        Some(record) => {
            output::kv("Boot mode", &record.boot_mode);
            output::kv("Filesystem", &record.filesystem_format);
            output::kv("Image hash", &record.content_hash);
            output::kv("Written by", &record.producing_version);
        }
        None => output::kv("Deployment", "none recorded"),
    }

    if report.entries.is_empty() {
        output::info("No isoboot boot entries");
    } else {
        println!("\nBoot entries:");
        for entry in &report.entries {
            output::kv(&entry.identifier, entry.description().unwrap_or_default());
            if args.entries {
                for (key, value) in &entry.values {
                    println!("      {:<20} {}", key, value);
                }
            }
        }
    }

    if report.is_provisioned() {
        output::success("Provisioned; restart to boot the image");
    }
    Ok(())
}
