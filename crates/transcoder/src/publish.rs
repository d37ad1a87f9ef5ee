//! Output layout and publishing of accepted artifacts
//!
//! Attempts are encoded into a `.partial` work directory under the output
//! directory; only an accepted artifact is moved to its final name.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name of the work directory holding in-progress attempts
pub const WORK_DIR_NAME: &str = ".partial";

/// Errors that can occur while publishing an artifact
#[derive(Debug, Error)]
pub enum PublishError {
    /// Failed to copy the artifact into the output directory
    #[error("Failed to copy artifact to {}: {source}", .destination.display())]
    CopyFailed {
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to move the copied artifact into its final name
    #[error("Failed to move artifact into {}: {source}", .destination.display())]
    RenameFailed {
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Final output path of an input: `<dir>/<stem>.<ext>`
pub fn output_path_for(input: &Path, output_dir: &Path, extension: &str) -> PathBuf {
    let stem = input.file_stem().unwrap_or_else(|| OsStr::new("output"));
    let mut name = stem.to_os_string();
    name.push(".");
    name.push(extension.trim_start_matches('.'));
    output_dir.join(name)
}

/// Work directory for a given output directory
pub fn work_dir_for(output_dir: &Path) -> PathBuf {
    output_dir.join(WORK_DIR_NAME)
}

/// Unique path for one attempt: `<work>/<stem>.cq<NN>.<uuid>.<ext>`
///
/// The extension is kept last so ffmpeg picks the container from it.
pub fn attempt_path(work_dir: &Path, input: &Path, cq: u8, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    work_dir.join(format!(
        "{}.cq{:02}.{}.{}",
        stem,
        cq,
        Uuid::new_v4().simple(),
        extension.trim_start_matches('.')
    ))
}

/// Move `artifact` to `destination`, replacing any existing file
///
/// Tries a rename first and falls back to copy-then-rename when the two
/// paths are on different filesystems. The artifact is gone afterwards
/// whether or not publishing succeeded.
pub fn publish_artifact(artifact: &Path, destination: &Path) -> Result<(), PublishError> {
    if fs::rename(artifact, destination).is_ok() {
        return Ok(());
    }

    // Copy next to the destination first so the final rename stays atomic
    let mut staging = destination.as_os_str().to_owned();
    staging.push(".publishing");
    let staging = PathBuf::from(staging);

    let result = fs::copy(artifact, &staging)
        .map_err(|source| PublishError::CopyFailed {
            destination: destination.to_path_buf(),
            source,
        })
        .and_then(|_| {
            fs::rename(&staging, destination).map_err(|source| PublishError::RenameFailed {
                destination: destination.to_path_buf(),
                source,
            })
        });

    if result.is_err() {
        remove_quietly(&staging);
    }
    remove_quietly(artifact);
    result
}

/// Remove a scratch file; a file that is already gone is fine
pub(crate) fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed scratch file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove scratch file"),
    }
}

/// Serialises writes into the output directory
#[derive(Debug, Default)]
pub struct Publisher {
    lock: Mutex<()>,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, artifact: &Path, destination: &Path) -> Result<(), PublishError> {
        let _guard = self.lock.lock().await;
        publish_artifact(artifact, destination)?;
        info!(output = %destination.display(), "Published");
        Ok(())
    }
}
