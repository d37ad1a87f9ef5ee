//! Startup checks
//!
//! Preflight verification that the configured ffmpeg can do the work before
//! any file is touched:
//! - ffmpeg runs and reports a version
//! - the configured video encoder is compiled in
//! - the libvmaf filter is compiled in

use crate::config::Config;
use crate::process::{LaunchError, ProcessRunner};
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::info;

/// Filter the quality analyzer depends on
pub const VMAF_FILTER: &str = "libvmaf";

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("ffmpeg not available: {0}")]
    FfmpegUnavailable(#[from] LaunchError),

    #[error("ffmpeg version check failed: {0}")]
    FfmpegVersion(String),

    #[error("encoder '{0}' is not available in this ffmpeg build")]
    EncoderMissing(String),

    #[error("filter '{0}' is not available in this ffmpeg build")]
    FilterMissing(String),

    #[error("ffmpeg {args} failed: {diagnostics}")]
    ProbeFailed { args: String, diagnostics: String },
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 7.1 ..."
/// - N-prefixed: "ffmpeg version n7.1-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');

    // Major version is everything before the first '.' or '-'
    let major_str = version_str.split(['.', '-']).next()?;

    major_str.parse().ok()
}

/// Whether an `ffmpeg -encoders` / `-filters` listing contains `name`
///
/// Listing rows look like ` V....D hevc_nvenc   NVIDIA NVENC hevc encoder`,
/// so the name is the second column.
pub fn listing_contains(listing: &str, name: &str) -> bool {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|column| column == name)
}

async fn probe<R: ProcessRunner>(runner: &R, ffmpeg: &Path, arg: &str) -> Result<String, StartupError> {
    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-hide_banner", arg]);

    let output = runner.run(cmd).await?;
    if !output.success() {
        return Err(StartupError::ProbeFailed {
            args: arg.to_string(),
            diagnostics: output.diagnostics(),
        });
    }
    Ok(output.combined())
}

/// Check ffmpeg runs and report its major version
pub async fn check_ffmpeg_version<R: ProcessRunner>(runner: &R, ffmpeg: &Path) -> Result<u32, StartupError> {
    let version_output = probe(runner, ffmpeg, "-version").await?;
    parse_ffmpeg_version(&version_output).ok_or_else(|| {
        StartupError::FfmpegVersion(format!(
            "Could not parse FFmpeg version from output: {}",
            version_output.lines().next().unwrap_or("(empty)")
        ))
    })
}

/// Check the configured encoder is listed by `ffmpeg -encoders`
pub async fn check_encoder_available<R: ProcessRunner>(
    runner: &R,
    ffmpeg: &Path,
    codec: &str,
) -> Result<(), StartupError> {
    let listing = probe(runner, ffmpeg, "-encoders").await?;
    if listing_contains(&listing, codec) {
        Ok(())
    } else {
        Err(StartupError::EncoderMissing(codec.to_string()))
    }
}

/// Check `libvmaf` is listed by `ffmpeg -filters`
pub async fn check_vmaf_available<R: ProcessRunner>(runner: &R, ffmpeg: &Path) -> Result<(), StartupError> {
    let listing = probe(runner, ffmpeg, "-filters").await?;
    if listing_contains(&listing, VMAF_FILTER) {
        Ok(())
    } else {
        Err(StartupError::FilterMissing(VMAF_FILTER.to_string()))
    }
}

/// Run all startup checks in order
///
/// Checks are run in the following order:
/// 1. ffmpeg version
/// 2. Encoder availability
/// 3. libvmaf availability
pub async fn run_startup_checks<R: ProcessRunner>(runner: &R, cfg: &Config) -> Result<(), StartupError> {
    let ffmpeg = cfg.tools.ffmpeg.as_path();

    let major = check_ffmpeg_version(runner, ffmpeg).await?;
    info!(ffmpeg = %ffmpeg.display(), major, "ffmpeg found");

    check_encoder_available(runner, ffmpeg, &cfg.encoder.codec).await?;
    check_vmaf_available(runner, ffmpeg).await?;
    Ok(())
}
