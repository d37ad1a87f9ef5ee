//! Batch coordinator
//!
//! Owns the pools and one controller per input file, drives every controller
//! to a terminal state and aggregates the outcomes into a [`RunSummary`].

use crate::cancel::Cancellation;
use crate::concurrency::ConcurrencyPlan;
use crate::config::{Config, ConfigError};
use crate::controller::{ControllerContext, FileController};
use crate::encode::Transcoder;
use crate::measure::QualityAnalyzer;
use crate::outcome::{FailureKind, FileReport, RunSummary};
use crate::policy::FeedbackPolicy;
use crate::pool::Scheduler;
use crate::process::ProcessRunner;
use crate::publish::{output_path_for, work_dir_for, Publisher};
use crate::startup::{run_startup_checks, StartupError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Error type for coordinator operations
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Output directory could not be prepared
    #[error("Cannot prepare output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Runs a batch of files against one configuration
pub struct BatchCoordinator<R> {
    /// Configuration the run was built from
    pub config: Config,
    /// Derived concurrency plan
    pub concurrency_plan: ConcurrencyPlan,
    runner: Arc<R>,
}

/// A file is either running under a controller or was rejected up front
enum Slot {
    Running(PathBuf, JoinHandle<FileReport>),
    Rejected(FileReport),
}

impl<R: ProcessRunner> BatchCoordinator<R> {
    /// Validate the configuration and run the startup checks
    ///
    /// # Returns
    /// * `Ok(BatchCoordinator)` - ffmpeg, the encoder and libvmaf are usable
    /// * `Err(CoordinatorError)` - invalid config or a failed check
    pub async fn new(config: Config, runner: Arc<R>) -> Result<Self, CoordinatorError> {
        config.validate()?;
        run_startup_checks(runner.as_ref(), &config).await?;
        Self::new_without_checks(config, runner)
    }

    /// Validate the configuration without probing ffmpeg
    pub fn new_without_checks(config: Config, runner: Arc<R>) -> Result<Self, CoordinatorError> {
        config.validate()?;
        let concurrency_plan = ConcurrencyPlan::derive(&config);
        Ok(Self {
            config,
            concurrency_plan,
            runner,
        })
    }

    /// Process every input and return once all of them reached a terminal state
    ///
    /// Per-file failures end up in the summary; only problems with the
    /// output directory itself are returned as errors.
    pub async fn run(&self, inputs: Vec<PathBuf>, cancel: Cancellation) -> Result<RunSummary, CoordinatorError> {
        let started = Instant::now();
        let output_dir = self.config.output.dir.clone();
        let work_dir = work_dir_for(&output_dir);
        std::fs::create_dir_all(&work_dir).map_err(|source| CoordinatorError::OutputDir {
            path: work_dir.clone(),
            source,
        })?;

        let plan = &self.concurrency_plan;
        if plan.is_oversubscribed() {
            warn!(
                peak_threads = plan.peak_threads(),
                cores = plan.total_cores,
                "Thread budget exceeds available cores when both pools are full"
            );
        }

        let scheduler = Arc::new(Scheduler::new(
            plan.transcode_workers,
            plan.vmaf_workers,
            Transcoder::new(
                self.runner.clone(),
                self.config.tools.ffmpeg.clone(),
                self.config.encoder.clone(),
            ),
            QualityAnalyzer::new(self.runner.clone(), self.config.tools.ffmpeg.clone()),
        ));
        let ctx = Arc::new(ControllerContext {
            scheduler: scheduler.clone(),
            publisher: Arc::new(Publisher::new()),
            policy: FeedbackPolicy::from_config(&self.config),
            threads: plan.threads_per_job,
            work_dir: work_dir.clone(),
            extension: self.config.output.extension.clone(),
        });

        info!(
            files = inputs.len(),
            transcode_workers = plan.transcode_workers,
            vmaf_workers = plan.vmaf_workers,
            threads = plan.threads_per_job,
            "Starting batch"
        );

        // Queued submissions fail fast once the run is cancelled
        let watcher = {
            let scheduler = scheduler.clone();
            let mut cancel = cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                warn!("Cancellation requested, shutting down pools");
                scheduler.shutdown();
            })
        };

        let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
        let mut slots = Vec::with_capacity(inputs.len());
        for input in inputs {
            let output = output_path_for(&input, &output_dir, &self.config.output.extension);

            if let Some(owner) = claimed.get(&output) {
                warn!(input = %input.display(), output = %output.display(), "Output name already taken");
                let reason = format!("output {} is already produced by {}", output.display(), owner.display());
                slots.push(Slot::Rejected(FileReport::failed(input, Vec::new(), FailureKind::Output, reason)));
                continue;
            }
            if same_file(&input, &output) {
                let reason = format!("output {} would overwrite the input", output.display());
                slots.push(Slot::Rejected(FileReport::failed(input, Vec::new(), FailureKind::Output, reason)));
                continue;
            }
            claimed.insert(output.clone(), input.clone());

            let controller = FileController::new(ctx.clone(), input.clone(), output);
            let handle = tokio::spawn(controller.run(cancel.clone()));
            slots.push(Slot::Running(input, handle));
        }

        let mut reports = Vec::with_capacity(slots.len());
        for slot in slots {
            let report = match slot {
                Slot::Rejected(report) => report,
                Slot::Running(input, handle) => match handle.await {
                    Ok(report) => report,
                    Err(e) => FileReport::failed(input, Vec::new(), FailureKind::Internal, e.to_string()),
                },
            };
            reports.push(report);
        }

        watcher.abort();

        // Only removes the directory when no attempt was left behind
        if std::fs::remove_dir(&work_dir).is_err() {
            debug!(dir = %work_dir.display(), "Work directory kept");
        }

        let transcode = scheduler.transcode_stats();
        let quality = scheduler.quality_stats();
        debug!(
            transcode_peak = transcode.peak,
            transcode_completed = transcode.completed,
            quality_peak = quality.peak,
            quality_completed = quality.completed,
            "Pool statistics"
        );

        let summary = RunSummary {
            reports,
            elapsed: started.elapsed(),
        };
        info!(
            accepted = summary.accepted(),
            failed = summary.failed(),
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Batch finished"
        );
        Ok(summary)
    }
}

/// Run a batch without startup checks
pub async fn run_batch<R: ProcessRunner>(
    inputs: Vec<PathBuf>,
    config: Config,
    runner: Arc<R>,
    cancel: Cancellation,
) -> Result<RunSummary, CoordinatorError> {
    BatchCoordinator::new_without_checks(config, runner)?
        .run(inputs, cancel)
        .await
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
