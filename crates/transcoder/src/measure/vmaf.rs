//! libvmaf quality collaborator
//!
//! Scores an encoded artifact against its source with ffmpeg's `libvmaf`
//! filter. The score is passed on as an opaque number; the feedback policy
//! decides what it means.

use crate::encode::ffmpeg::exit_label;
use crate::process::{describe_command, LaunchError, ProcessRunner};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Marker ffmpeg prints in front of the pooled score
const SCORE_MARKER: &str = "VMAF score:";

/// Error type for quality measurement
#[derive(Debug, Error)]
pub enum MeasureError {
    /// The analyzer binary could not be started
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// The analyzer ran but exited with a failure status
    #[error("analyzer exited with {}: {diagnostics}", exit_label(.code))]
    Failed {
        code: Option<i32>,
        diagnostics: String,
    },

    /// The analyzer succeeded but no score could be read from its output
    #[error("no VMAF score in analyzer output: {diagnostics}")]
    NoScore { diagnostics: String },

    /// The quality pool was shut down before the job started
    #[error(transparent)]
    PoolClosed(#[from] crate::pool::PoolClosed),
}

/// One measurement request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityJob {
    pub original: PathBuf,
    pub artifact: PathBuf,
    pub threads: u32,
}

/// Build the ffmpeg VMAF command for a job
///
/// The distorted input comes first and the reference second, as libvmaf expects.
pub fn build_vmaf_command(ffmpeg: &Path, job: &QualityJob) -> Command {
    let mut cmd = Command::new(ffmpeg);

    cmd.args(["-nostdin", "-nostats"]);
    cmd.arg("-i").arg(&job.artifact);
    cmd.arg("-i").arg(&job.original);
    cmd.arg("-filter_complex")
        .arg(format!("libvmaf=n_threads={}", job.threads));
    cmd.args(["-f", "null", "-"]);

    cmd
}

/// Extract the pooled VMAF score from analyzer output
///
/// Uses the last `VMAF score: <float>` occurrence.
pub fn parse_vmaf_score(output: &str) -> Option<f64> {
    output.lines().rev().find_map(|line| {
        let (_, rest) = line.split_once(SCORE_MARKER)?;
        let number: String = rest
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        number.parse::<f64>().ok().filter(|score| score.is_finite())
    })
}

/// Runs VMAF measurements through a [`ProcessRunner`]
pub struct QualityAnalyzer<R> {
    runner: Arc<R>,
    ffmpeg: PathBuf,
}

impl<R: ProcessRunner> QualityAnalyzer<R> {
    pub fn new(runner: Arc<R>, ffmpeg: PathBuf) -> Self {
        Self { runner, ffmpeg }
    }

    /// Score `job.artifact` against `job.original`
    pub async fn measure(&self, job: &QualityJob) -> Result<f64, MeasureError> {
        let cmd = build_vmaf_command(&self.ffmpeg, job);
        debug!(command = %describe_command(&cmd), "Measuring");

        let output = self.runner.run(cmd).await?;

        if !output.success() {
            return Err(MeasureError::Failed {
                code: output.code,
                diagnostics: output.diagnostics(),
            });
        }

        parse_vmaf_score(&output.combined()).ok_or_else(|| MeasureError::NoScore {
            diagnostics: output.diagnostics(),
        })
    }
}
