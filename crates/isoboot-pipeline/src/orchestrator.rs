//! Run orchestration
//!
//! The [`Orchestrator`] owns the single-flight gate for provisioning runs,
//! the recovery flag and the cooperative cancel flag. Every run and every
//! recovery executes on its own worker thread and reports through the
//! [`EventBus`]; the caller only keeps a join handle.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

use isoboot_bcd::{ConfiguredEntry, StoreEntry};
use isoboot_core::{
    Error, Event, EventBus, LogArea, LogContext, PipelineRequest, Result, Settings,
    Stage,
};
use isoboot_deploy::fingerprint::record_path;
use isoboot_deploy::FingerprintRecord;

use crate::pipeline::{ContentOutcome, Pipeline, Preparation};
use crate::recovery;
use crate::services::Services;

/// At most one holder at a time; later callers wait for the permit.
#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: Mutex<bool>,
    idle: Condvar,
}

impl SingleFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Block until the previous holder is done
    pub fn acquire(self: &Arc<Self>) -> FlightPermit {
        let mut busy = self.lock();
        while *busy {
            busy = self.idle.wait(busy).unwrap_or_else(PoisonError::into_inner);
        }
        *busy = true;
        FlightPermit { gate: self.clone() }
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<FlightPermit> {
        let mut busy = self.lock();
        if *busy {
            return None;
        }
        *busy = true;
        Some(FlightPermit { gate: self.clone() })
    }

    pub fn is_busy(&self) -> bool {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.busy.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Released on drop, including when the worker panics
#[derive(Debug)]
pub struct FlightPermit {
    gate: Arc<SingleFlight>,
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        *self.gate.lock() = false;
        self.gate.idle.notify_all();
    }
}

/// Set while space recovery runs
#[derive(Debug, Default)]
pub struct RecoveryFlag {
    active: AtomicBool,
}

impl RecoveryFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `None` when a recovery is already running
    pub fn try_begin(self: &Arc<Self>) -> Option<RecoveryGuard> {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RecoveryGuard { flag: self.clone() })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct RecoveryGuard {
    flag: Arc<RecoveryFlag>,
}

impl Drop for RecoveryGuard {
    fn drop(&mut self) {
        self.flag.active.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The run stops before its next stage
    Requested,
    /// Recovery cannot be interrupted
    RefusedDuringRecovery,
}

/// What a successful run left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub preparation: Preparation,
    pub content: ContentOutcome,
    pub entry: ConfiguredEntry,
}

pub struct RunHandle {
    handle: JoinHandle<Result<RunSummary>>,
}

impl RunHandle {
    pub fn wait(self) -> Result<RunSummary> {
        self.handle
            .join()
            .unwrap_or_else(|_| Err(worker_panicked("pipeline")))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

pub struct RecoveryHandle {
    handle: JoinHandle<Result<String>>,
}

impl RecoveryHandle {
    pub fn wait(self) -> Result<String> {
        self.handle
            .join()
            .unwrap_or_else(|_| Err(worker_panicked("recovery")))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

fn worker_panicked(name: &str) -> Error {
    Error::Io(std::io::Error::other(format!("{} worker panicked", name)))
}

/// Snapshot of what is currently provisioned
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub data_drive: Option<PathBuf>,
    pub firmware_drive: Option<PathBuf>,
    pub firmware_size_mb: Option<u64>,
    pub fingerprint: Option<FingerprintRecord>,
    pub entries: Vec<StoreEntry>,
    pub recovering: bool,
}

impl StatusReport {
    pub fn is_provisioned(&self) -> bool {
        self.data_drive.is_some() && !self.entries.is_empty()
    }
}

pub struct Orchestrator {
    services: Services,
    settings: Settings,
    logs: LogContext,
    events: EventBus,
    gate: Arc<SingleFlight>,
    recovery: Arc<RecoveryFlag>,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(services: Services, settings: Settings, logs: LogContext, events: EventBus) -> Self {
        Self {
            services,
            settings,
            logs,
            events,
            gate: SingleFlight::new(),
            recovery: RecoveryFlag::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_running(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn is_recovering(&self) -> bool {
        self.recovery.is_active()
    }

    /// Start a provisioning run, waiting for any previous run to finish first
    pub fn start(&self, request: PipelineRequest) -> Result<RunHandle> {
        let permit = self.gate.acquire();
        if self.recovery.is_active() {
            warn!("Space recovery is running; provisioning may conflict with it");
            self.events
                .log("Space recovery is still running; provisioning may conflict with it");
        }
        self.cancel.store(false, Ordering::SeqCst);
        self.events.publish(Event::ControlsEnabled { enabled: false });

        let pipeline = Pipeline::new(
            self.services.clone(),
            self.settings.clone(),
            self.logs.clone(),
            self.events.clone(),
        );
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let general = self.logs.area(LogArea::General);

        let spawned = thread::Builder::new()
            .name("isoboot-worker".to_string())
            .spawn(move || {
                let _permit = permit;
                let mut pipeline = pipeline;
                general.line(format!(
                    "Run started: {} as {} in {} mode",
                    request.image_path.display(),
                    request.format,
                    request.mode_label
                ));

                let result = run_stages(&mut pipeline, &request, &cancel, &events);
                match &result {
                    Ok(summary) => {
                        let message = format!(
                            "{} boot entry {} is ready; restart to boot the image",
                            request.mode_label, summary.entry.identifier
                        );
                        info!("{}", message);
                        general.line(&message);
                        events.publish(Event::Completed {
                            success: true,
                            message,
                        });
                        events.publish(Event::RestartSuggested);
                    }
                    Err(e) => {
                        error!("Provisioning failed: {}", e);
                        general.line(format!("ERROR: {}", e));
                        events.publish(Event::Error {
                            message: e.to_string(),
                            category: e.category(),
                        });
                        events.publish(Event::Completed {
                            success: false,
                            message: e.to_string(),
                        });
                    }
                }
                events.publish(Event::ControlsEnabled { enabled: true });
                result
            });

        match spawned {
            Ok(handle) => Ok(RunHandle { handle }),
            Err(e) => {
                self.events.publish(Event::ControlsEnabled { enabled: true });
                Err(e.into())
            }
        }
    }

    /// Ask the current run to stop at the next stage boundary
    pub fn cancel(&self) -> CancelOutcome {
        if self.recovery.is_active() {
            warn!("Cancellation refused while space recovery is running");
            return CancelOutcome::RefusedDuringRecovery;
        }
        self.cancel.store(true, Ordering::SeqCst);
        info!("Cancellation requested");
        CancelOutcome::Requested
    }

    /// Remove everything provisioning created, on a background thread
    pub fn recover_space(&self) -> Result<RecoveryHandle> {
        let guard = self.recovery.try_begin().ok_or(Error::RecoveryInProgress)?;
        if self.gate.is_busy() {
            warn!("A provisioning run is in progress; recovering space anyway");
        }
        self.events.publish(Event::ControlsEnabled { enabled: false });

        let storage = self.services.storage.clone();
        let configurator = self
            .services
            .configurator(&self.settings, &self.logs, &self.events);
        let events = self.events.clone();
        let log = self.logs.area(LogArea::Storage);

        let spawned = thread::Builder::new()
            .name("isoboot-recovery".to_string())
            .spawn(move || {
                let result = recovery::recover_space(storage.as_ref(), &configurator, &events, &log);
                // Clear the flag before observers see completion
                drop(guard);
                let (success, message) = match &result {
                    Ok(message) => (true, message.clone()),
                    Err(e) => {
                        error!("Space recovery failed: {}", e);
                        log.line(format!("ERROR: {}", e));
                        (false, e.to_string())
                    }
                };
                events.publish(Event::RecoveryCompleted { success, message });
                events.publish(Event::ControlsEnabled { enabled: true });
                result
            });

        match spawned {
            Ok(handle) => Ok(RecoveryHandle { handle }),
            Err(e) => {
                self.events.publish(Event::ControlsEnabled { enabled: true });
                Err(e.into())
            }
        }
    }

    /// Report current partitions, fingerprint and boot entries without changing anything
    pub fn status(&self) -> Result<StatusReport> {
        let storage = &self.services.storage;
        let mut report = StatusReport {
            recovering: self.recovery.is_active(),
            firmware_size_mb: storage.firmware_partition_size_mb()?,
            ..StatusReport::default()
        };
        if storage.data_partition_exists()? {
            report.data_drive = storage.data_drive()?;
        }
        if report.firmware_size_mb.is_some() {
            report.firmware_drive = storage.firmware_drive()?;
        }
        report.fingerprint = report
            .data_drive
            .as_deref()
            .and_then(|root| FingerprintRecord::read(&record_path(root)));
        report.entries = self
            .services
            .configurator(&self.settings, &self.logs, &self.events)
            .product_entries()?;
        Ok(report)
    }
}

fn run_stages(
    pipeline: &mut Pipeline,
    request: &PipelineRequest,
    cancel: &AtomicBool,
    events: &EventBus,
) -> Result<RunSummary> {
    let enter = |stage: Stage| -> Result<()> {
        if cancel.load(Ordering::SeqCst) {
            info!("Run cancelled before {:?}", stage);
            return Err(Error::Cancelled);
        }
        events.publish(Event::StageStarted { stage });
        events.log(stage.description());
        Ok(())
    };

    enter(Stage::ValidateAndPrepare)?;
    let preparation = pipeline.validate_and_prepare(
        &request.image_path,
        request.format,
        request.skip_integrity_check,
    )?;

    enter(Stage::CopyIsoContent)?;
    let content = pipeline.copy_iso_content(
        &request.image_path,
        request.format,
        &request.mode_key,
        &request.mode_label,
    )?;

    enter(Stage::ConfigureBoot)?;
    let entry = pipeline.configure_boot(&request.mode_key)?;

    Ok(RunSummary {
        preparation,
        content,
        entry,
    })
}
