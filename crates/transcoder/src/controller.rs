//! Per-file quality feedback controller
//!
//! Drives one input through encode → measure → judge until the file is
//! accepted or fails. Each controller owns its CQ sequence and its single
//! candidate artifact; the only shared state it touches is the scheduler
//! and the publisher.

use crate::cancel::Cancellation;
use crate::encode::{EncodeError, TranscodeArtifact, TranscodeJob};
use crate::measure::{MeasureError, QualityJob};
use crate::outcome::{Attempt, FailureKind, FileOutcome, FileReport};
use crate::policy::{FeedbackPolicy, Verdict};
use crate::pool::Scheduler;
use crate::process::ProcessRunner;
use crate::publish::{attempt_path, remove_quietly, Publisher};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything controllers of one run share
pub struct ControllerContext<R> {
    pub scheduler: Arc<Scheduler<R>>,
    pub publisher: Arc<Publisher>,
    pub policy: FeedbackPolicy,
    /// Thread budget passed to every encoder and analyzer invocation
    pub threads: u32,
    /// Directory for in-progress attempts
    pub work_dir: PathBuf,
    /// Container extension of artifacts
    pub extension: String,
}

/// Lifecycle of one input file
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerState {
    Pending,
    Transcoding { cq: u8 },
    Measuring { artifact: TranscodeArtifact },
    RetryPending { next_cq: u8 },
    Finished(FileOutcome),
}

impl ControllerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ControllerState::Finished(_))
    }
}

/// State machine for a single input file
pub struct FileController<R> {
    ctx: Arc<ControllerContext<R>>,
    input: PathBuf,
    output: PathBuf,
    state: ControllerState,
    attempts: Vec<Attempt>,
    /// The one file on disk this controller is responsible for, if any
    candidate: Option<PathBuf>,
}

impl<R: ProcessRunner> FileController<R> {
    pub fn new(ctx: Arc<ControllerContext<R>>, input: PathBuf, output: PathBuf) -> Self {
        Self {
            ctx,
            input,
            output,
            state: ControllerState::Pending,
            attempts: Vec::new(),
            candidate: None,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Drive the file to a terminal state
    ///
    /// Cancellation is observed at every pool submission. A cancelled
    /// controller drops its in-flight job (killing the external process)
    /// and removes its candidate artifact before reporting `Cancelled`.
    pub async fn run(mut self, mut cancel: Cancellation) -> FileReport {
        let max_attempts = self.ctx.policy.max_attempts() as usize;

        loop {
            let state = std::mem::replace(&mut self.state, ControllerState::Pending);
            if let ControllerState::Finished(outcome) = state {
                return FileReport {
                    input: self.input,
                    attempts: self.attempts,
                    outcome,
                };
            }

            if self.attempts.len() > max_attempts {
                // The ladder cannot produce this; stop rather than loop
                self.discard_candidate();
                self.state = self.fail(FailureKind::Internal, "attempt limit exceeded".to_string());
                continue;
            }

            self.state = match self.step(state, &mut cancel).await {
                Some(next) => next,
                None => {
                    self.discard_candidate();
                    info!(input = %self.input.display(), "Cancelled");
                    self.fail(FailureKind::Cancelled, "run cancelled".to_string())
                }
            };
        }
    }

    /// Perform one transition; `None` means the run was cancelled
    async fn step(&mut self, state: ControllerState, cancel: &mut Cancellation) -> Option<ControllerState> {
        match state {
            ControllerState::Pending => {
                if cancel.is_cancelled() {
                    return None;
                }
                Some(ControllerState::Transcoding {
                    cq: self.ctx.policy.initial_cq,
                })
            }

            ControllerState::RetryPending { next_cq } => Some(ControllerState::Transcoding { cq: next_cq }),

            ControllerState::Transcoding { cq } => {
                let path = attempt_path(&self.ctx.work_dir, &self.input, cq, &self.ctx.extension);
                self.candidate = Some(path.clone());
                info!(input = %self.input.display(), cq, "Transcoding");

                let job = TranscodeJob {
                    input: self.input.clone(),
                    output: path,
                    cq,
                    threads: self.ctx.threads,
                };
                let scheduler = self.ctx.scheduler.clone();
                let result = until_cancelled(cancel, scheduler.submit_transcode(job)).await?;

                Some(match result {
                    Ok(artifact) => ControllerState::Measuring { artifact },
                    Err(e) => {
                        self.attempts.push(Attempt { cq, score: None });
                        self.discard_candidate();
                        warn!(input = %self.input.display(), cq, error = %e, "Encode failed");
                        self.fail(encode_failure_kind(&e), e.to_string())
                    }
                })
            }

            ControllerState::Measuring { artifact } => {
                let job = QualityJob {
                    original: self.input.clone(),
                    artifact: artifact.path.clone(),
                    threads: self.ctx.threads,
                };
                let scheduler = self.ctx.scheduler.clone();
                let result = until_cancelled(cancel, scheduler.submit_quality(job)).await?;

                let score = match result {
                    Ok(score) => score,
                    Err(e) => {
                        self.attempts.push(Attempt {
                            cq: artifact.cq,
                            score: None,
                        });
                        self.discard_candidate();
                        warn!(input = %self.input.display(), cq = artifact.cq, error = %e, "Measurement failed");
                        return Some(self.fail(measure_failure_kind(&e), e.to_string()));
                    }
                };

                self.attempts.push(Attempt {
                    cq: artifact.cq,
                    score: Some(score),
                });
                Some(self.judge(&artifact, score).await)
            }

            finished @ ControllerState::Finished(_) => Some(finished),
        }
    }

    async fn judge(&mut self, artifact: &TranscodeArtifact, score: f64) -> ControllerState {
        let policy = self.ctx.policy;
        match policy.judge(artifact.cq, score) {
            Verdict::Accept => {
                info!(input = %self.input.display(), cq = artifact.cq, vmaf = score, "Accepted");
                match self.ctx.publisher.publish(&artifact.path, &self.output).await {
                    Ok(()) => {
                        self.candidate = None;
                        ControllerState::Finished(FileOutcome::Accepted {
                            output: self.output.clone(),
                            cq: artifact.cq,
                            score,
                        })
                    }
                    Err(e) => {
                        self.discard_candidate();
                        self.fail(FailureKind::Output, e.to_string())
                    }
                }
            }
            Verdict::Retry { next_cq } => {
                info!(
                    input = %self.input.display(),
                    cq = artifact.cq,
                    vmaf = score,
                    threshold = policy.threshold,
                    next_cq,
                    "Below threshold, retrying"
                );
                self.discard_candidate();
                ControllerState::RetryPending { next_cq }
            }
            Verdict::Exhausted => {
                self.discard_candidate();
                warn!(input = %self.input.display(), cq = artifact.cq, vmaf = score, "Quality floor exhausted");
                self.fail(
                    FailureKind::QualityNotMet,
                    format!(
                        "VMAF {:.2} below threshold {:.2} at cq {}; no lower cq left (step {})",
                        score, policy.threshold, artifact.cq, policy.step
                    ),
                )
            }
        }
    }

    fn fail(&self, kind: FailureKind, reason: String) -> ControllerState {
        let report = FileReport::failed(self.input.clone(), self.attempts.clone(), kind, reason);
        ControllerState::Finished(report.outcome)
    }

    fn discard_candidate(&mut self) {
        if let Some(path) = self.candidate.take() {
            remove_quietly(&path);
        }
    }
}

/// Await `fut` unless the run is cancelled first
async fn until_cancelled<F: Future>(cancel: &mut Cancellation, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

fn encode_failure_kind(error: &EncodeError) -> FailureKind {
    match error {
        EncodeError::Launch(_) => FailureKind::Launch,
        EncodeError::Failed { .. } | EncodeError::MissingArtifact { .. } => FailureKind::Encode,
        EncodeError::PoolClosed(_) => FailureKind::Cancelled,
    }
}

fn measure_failure_kind(error: &MeasureError) -> FailureKind {
    match error {
        MeasureError::Launch(_) => FailureKind::Launch,
        MeasureError::Failed { .. } | MeasureError::NoScore { .. } => FailureKind::Measurement,
        MeasureError::PoolClosed(_) => FailureKind::Cancelled,
    }
}
