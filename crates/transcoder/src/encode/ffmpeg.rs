//! ffmpeg encoder collaborator
//!
//! Builds and runs one constant-quality encode of a source file.

use crate::config::EncoderConfig;
use crate::process::{describe_command, LaunchError, ProcessRunner};
use crate::publish::remove_quietly;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The encoder binary could not be started
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// The encoder ran but exited with a failure status
    #[error("encoder exited with {}: {diagnostics}", exit_label(.code))]
    Failed {
        code: Option<i32>,
        diagnostics: String,
    },

    /// The encoder reported success without producing a usable file
    #[error("encoder produced no output at {}", .path.display())]
    MissingArtifact { path: PathBuf },

    /// The transcode pool was shut down before the job started
    #[error(transparent)]
    PoolClosed(#[from] crate::pool::PoolClosed),
}

pub(crate) fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

/// One encode request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeJob {
    pub input: PathBuf,
    /// Per-attempt destination, unique across files and attempts
    pub output: PathBuf,
    pub cq: u8,
    pub threads: u32,
}

/// A candidate file produced by one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeArtifact {
    pub path: PathBuf,
    pub cq: u8,
}

/// Build the ffmpeg encode command for a job
///
/// Mirrors the layout `ffmpeg -y -nostdin -nostats -i <in> -threads <n>
/// -c:v <codec> -preset <p> -rc <rc> -cq <cq> [-ac <n>] [-map_metadata 0] <out>`.
pub fn build_transcode_command(ffmpeg: &Path, encoder: &EncoderConfig, job: &TranscodeJob) -> Command {
    let mut cmd = Command::new(ffmpeg);

    cmd.args(["-y", "-nostdin", "-nostats"]);
    cmd.arg("-i").arg(&job.input);

    cmd.arg("-threads").arg(job.threads.to_string());

    cmd.arg("-c:v").arg(&encoder.codec);
    cmd.arg("-preset").arg(&encoder.preset);
    cmd.arg("-rc").arg(&encoder.rate_control);
    cmd.arg("-cq").arg(job.cq.to_string());

    if let Some(channels) = encoder.audio_channels {
        cmd.arg("-ac").arg(channels.to_string());
    }

    if encoder.preserve_metadata {
        cmd.arg("-map_metadata").arg("0");
    }

    cmd.arg(&job.output);

    cmd
}

/// Runs encodes through a [`ProcessRunner`]
pub struct Transcoder<R> {
    runner: Arc<R>,
    ffmpeg: PathBuf,
    encoder: EncoderConfig,
}

impl<R: ProcessRunner> Transcoder<R> {
    pub fn new(runner: Arc<R>, ffmpeg: PathBuf, encoder: EncoderConfig) -> Self {
        Self {
            runner,
            ffmpeg,
            encoder,
        }
    }

    /// Encode `job.input` at `job.cq` into `job.output`
    ///
    /// A partial output left behind by a failed encode is removed.
    pub async fn transcode(&self, job: &TranscodeJob) -> Result<TranscodeArtifact, EncodeError> {
        let cmd = build_transcode_command(&self.ffmpeg, &self.encoder, job);
        debug!(command = %describe_command(&cmd), "Encoding");

        let output = self.runner.run(cmd).await?;

        if !output.success() {
            remove_quietly(&job.output);
            return Err(EncodeError::Failed {
                code: output.code,
                diagnostics: output.diagnostics(),
            });
        }

        match std::fs::metadata(&job.output) {
            Ok(meta) if meta.len() > 0 => Ok(TranscodeArtifact {
                path: job.output.clone(),
                cq: job.cq,
            }),
            _ => {
                remove_quietly(&job.output);
                Err(EncodeError::MissingArtifact {
                    path: job.output.clone(),
                })
            }
        }
    }
}
