//! Deploy command

use anyhow::{anyhow, bail, Context as _, Result};
use camino::Utf8Path;
use dialoguer::Confirm;
use tracing::{info, warn};

use isoboot_core::{command, BootMode, CommandRunner, FilesystemFormat, PipelineRequest};
use isoboot_pipeline::{ContentOutcome, RunSummary};

use super::Context;
use crate::cli::DeployArgs;
use crate::{output, progress};

pub fn run(args: DeployArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    if !args.image.is_file() {
        bail!("Image not found: {}", args.image);
    }

    let ctx = Context::load(config_path)?;
    let mode = BootMode::from(args.mode);
    let format = FilesystemFormat::from(args.format);

    output::header(&format!("Provisioning {}", args.image));
    output::kv("Mode", mode.label());
    output::kv("Format", format.as_str());
    output::kv("Logs", &ctx.settings.log_dir.display().to_string());

    let request = PipelineRequest::new(args.image.as_std_path(), format, mode)
        .with_skip_integrity_check(args.skip_integrity_check);

    let renderer = progress::spawn(ctx.events.subscribe(ctx.settings.event_queue_capacity));
    let result = ctx
        .orchestrator()
        .start(request)
        .and_then(|handle| handle.wait());
    let outcome = renderer
        .join()
        .map_err(|_| anyhow!("Progress display stopped unexpectedly"))?;

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            warn!("Provisioning {} failed: {}", args.image, e);
            output::error(&e.to_string());
            output::info(&format!(
                "Diagnostic logs are in {}",
                ctx.settings.log_dir.display()
            ));
            return Err(e).context("Provisioning failed");
        }
    };

    info!(
        "Entry {} configured for {} in {} mode",
        summary.entry.identifier,
        args.image,
        mode.label()
    );
    print_summary(&summary);

    if outcome.restart_suggested && !args.no_restart {
        offer_restart(ctx.services.runner.as_ref(), args.restart)?;
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    output::success(&format!(
        "Boot entry {} ({}) is now the default",
        summary.entry.identifier, summary.entry.label
    ));
    output::kv(
        "Data partition",
        &summary.preparation.binding.data.display().to_string(),
    );
    output::kv(
        "EFI partition",
        &summary.preparation.binding.firmware.display().to_string(),
    );
    output::kv("Loader", &summary.entry.loader.display().to_string());
    match &summary.content {
        ContentOutcome::Deployed(report) => {
            output::kv(
                "Copied",
                &format!(
                    "{} files, {} MB",
                    report.stats.files,
                    report.stats.bytes / (1024 * 1024)
                ),
            );
            if report.drivers_injected {
                output::kv("Drivers", "added to the boot image");
            }
        }
        ContentOutcome::AlreadyPresent => output::kv("Copied", "nothing, image already deployed"),
    }
}

fn offer_restart(runner: &dyn CommandRunner, without_asking: bool) -> Result<()> {
    let restart = without_asking
        || Confirm::new()
            .with_prompt("Restart now to boot the image?")
            .default(false)
            .interact()?;

    if !restart {
        output::info("Restart when ready; the new entry boots by default");
        return Ok(());
    }

    output::info("Restarting...");
    info!("Restart requested after provisioning");
    let result = runner.run("shutdown", &command::args(["/r", "/t", "0"]))?;
    if !result.success() {
        bail!("Restart failed: {}", result.text());
    }
    Ok(())
}
