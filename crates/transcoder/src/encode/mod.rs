//! Encoding collaborators for the batch transcoder

pub mod ffmpeg;

pub use ffmpeg::{build_transcode_command, EncodeError, TranscodeArtifact, TranscodeJob, Transcoder};
