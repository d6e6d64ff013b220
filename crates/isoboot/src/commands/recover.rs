//! Recover command

use anyhow::{anyhow, Context as _, Result};
use camino::Utf8Path;
use dialoguer::Confirm;

use super::Context;
use crate::cli::RecoverArgs;
use crate::{output, progress};

pub fn run(args: RecoverArgs, config_path: Option<&Utf8Path>) -> Result<()> {
    if !args.force {
        let confirmed = Confirm::new()
            .with_prompt("Remove the isoboot boot entries and partitions and give the space back to C:?")
            .default(false)
            .interact()?;

        if !confirmed {
            output::info("Cancelled");
            return Ok(());
        }
    }

    let ctx = Context::load(config_path)?;
    output::header("Recovering disk space");

    let renderer = progress::spawn(ctx.events.subscribe(ctx.settings.event_queue_capacity));
    let result = ctx
        .orchestrator()
        .recover_space()
        .and_then(|handle| handle.wait());
    renderer
        .join()
        .map_err(|_| anyhow!("Progress display stopped unexpectedly"))?;

    match result {
        Ok(message) => {
            output::success(&message);
            Ok(())
        }
        Err(e) => {
            output::error(&e.to_string());
            Err(e).context("Space recovery failed")
        }
    }
}
