//! Terminal rendering of bus events
//!
//! A spinner follows the current stage and narration; byte-level copy
//! progress gets its own bar that is removed again on the clear event.

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use isoboot_core::{Event, Subscription};

/// Whether the renderer should keep reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Done,
}

/// What the renderer saw by the time controls were re-enabled
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub success: Option<bool>,
    pub message: Option<String>,
    pub restart_suggested: bool,
}

pub struct ProgressRenderer {
    multi: MultiProgress,
    status: ProgressBar,
    copy: Option<ProgressBar>,
    outcome: Outcome,
}

impl ProgressRenderer {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    pub fn with_target(target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);
        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        status.enable_steady_tick(Duration::from_millis(100));
        Self {
            multi,
            status,
            copy: None,
            outcome: Outcome::default(),
        }
    }

    fn copy_bar(&mut self) -> &ProgressBar {
        let multi = &self.multi;
        self.copy.get_or_insert_with(|| {
            let bar = multi.add(ProgressBar::new(0));
            bar.set_style(
                ProgressStyle::with_template(
                    "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
            );
            bar
        })
    }

    fn line(&self, text: String) {
        // Drawing failures only affect the terminal, never the run
        let _ = self.multi.println(text);
    }

    pub fn handle(&mut self, event: Event) -> Flow {
        match event {
            Event::StageStarted { stage } => {
                self.line(format!("{} {}", style("→").cyan().bold(), stage.description()));
                self.status.set_message(stage.description());
            }
            Event::Log { message } => self.status.set_message(message),
            Event::Progress(progress) => {
                if progress.is_clear() {
                    if let Some(bar) = self.copy.take() {
                        bar.finish_and_clear();
                    }
                } else {
                    let bar = self.copy_bar();
                    bar.set_length(progress.bytes_total);
                    bar.set_position(progress.bytes_copied);
                    bar.set_message(progress.operation);
                }
            }
            Event::Error { message, category } => {
                self.line(format!(
                    "{} {:?}: {}",
                    style("✗").red().bold(),
                    category,
                    message
                ));
                self.outcome.success = Some(false);
                self.outcome.message = Some(message);
            }
            Event::Completed { success, message }
            | Event::RecoveryCompleted { success, message } => {
                self.outcome.success = Some(success);
                self.outcome.message = Some(message);
            }
            Event::RestartSuggested => self.outcome.restart_suggested = true,
            Event::ControlsEnabled { enabled } => {
                if enabled {
                    return Flow::Done;
                }
            }
        }
        Flow::Continue
    }

    pub fn finish(mut self) -> Outcome {
        if let Some(bar) = self.copy.take() {
            bar.finish_and_clear();
        }
        self.status.finish_and_clear();
        self.outcome
    }
}

/// Render events on a background thread until the operation hands control back
pub fn spawn(subscription: Subscription) -> JoinHandle<Outcome> {
    thread::spawn(move || {
        let mut renderer = ProgressRenderer::new();
        while let Some(event) = subscription.recv() {
            if renderer.handle(event) == Flow::Done {
                break;
            }
        }
        renderer.finish()
    })
}
