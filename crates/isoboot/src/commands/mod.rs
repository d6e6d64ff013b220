//! CLI command implementations

pub mod deploy;
pub mod recover;
pub mod status;

use anyhow::Result;
use camino::Utf8Path;
use tracing::debug;

use isoboot_core::{EventBus, IsobootConfig, LogContext, Settings};
use isoboot_pipeline::{Orchestrator, Services};

/// Everything a command needs, built once from the configuration
pub struct Context {
    pub settings: Settings,
    pub logs: LogContext,
    pub events: EventBus,
    pub services: Services,
}

impl Context {
    pub fn load(config_path: Option<&Utf8Path>) -> Result<Self> {
        let config = IsobootConfig::load(config_path)?;
        let settings = config.settings;
        debug!(
            "Settings loaded (logs in {}, chain-loader {})",
            settings.log_dir.display(),
            settings
                .chainloader_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| String::from("bundled"))
        );
        let logs = LogContext::new(&settings.log_dir);
        let services = Services::system(&settings, &logs);
        Ok(Self {
            settings,
            logs,
            events: EventBus::new(),
            services,
        })
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.services.clone(),
            self.settings.clone(),
            self.logs.clone(),
            self.events.clone(),
        )
    }
}
