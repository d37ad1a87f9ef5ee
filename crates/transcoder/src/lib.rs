//! Batch transcoder
//!
//! Encodes video files at decreasing CQ values until a VMAF measurement
//! meets the configured threshold, with separately sized pools for encodes
//! and measurements.

pub mod cancel;
pub mod concurrency;
pub mod controller;
pub mod coordinator;
pub mod encode;
pub mod measure;
pub mod outcome;
pub mod policy;
pub mod pool;
pub mod process;
pub mod publish;
pub mod scan;
pub mod startup;

#[cfg(test)]
mod testing;

pub use batch_transcoder_config as config;
pub use batch_transcoder_config::Config;
pub use cancel::{cancellation, CancelTrigger, Cancellation};
pub use concurrency::ConcurrencyPlan;
pub use controller::{ControllerContext, ControllerState, FileController};
pub use coordinator::{run_batch, BatchCoordinator, CoordinatorError};
pub use encode::{build_transcode_command, EncodeError, TranscodeArtifact, TranscodeJob, Transcoder};
pub use measure::{build_vmaf_command, parse_vmaf_score, MeasureError, QualityAnalyzer, QualityJob};
pub use outcome::{Attempt, Failure, FailureKind, FileOutcome, FileReport, RunSummary};
pub use policy::{FeedbackPolicy, Verdict};
pub use pool::{Pool, PoolClosed, PoolStats, Scheduler};
pub use process::{LaunchError, ProcessOutput, ProcessRunner, SystemRunner};
pub use publish::{output_path_for, publish_artifact, PublishError, Publisher};
pub use scan::{collect_inputs, is_video_file};
pub use startup::{parse_ffmpeg_version, run_startup_checks, StartupError};
