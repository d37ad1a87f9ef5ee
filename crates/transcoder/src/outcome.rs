//! Per-file outcomes and the run summary

use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Why a file ended up failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An external tool could not be started
    Launch,
    /// The encoder ran but failed
    Encode,
    /// The analyzer ran but produced no score
    Measurement,
    /// Every CQ down to the floor scored below the threshold
    QualityNotMet,
    /// The run was aborted before the file finished
    Cancelled,
    /// The accepted artifact could not be written to the output location
    Output,
    /// The file's controller task died
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Launch => write!(f, "launch_error"),
            FailureKind::Encode => write!(f, "encode_failure"),
            FailureKind::Measurement => write!(f, "measurement_failure"),
            FailureKind::QualityNotMet => write!(f, "quality_not_met"),
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::Output => write!(f, "output_error"),
            FailureKind::Internal => write!(f, "internal_error"),
        }
    }
}

/// One transcode-then-measure cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Attempt {
    pub cq: u8,
    /// `None` when the attempt never got a score
    pub score: Option<f64>,
}

/// Diagnostic record of a failed file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub reason: String,
    pub last_cq: Option<u8>,
    pub last_score: Option<f64>,
    /// Highest score any attempt reached
    pub best_score: Option<f64>,
}

/// Terminal state of one input file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Accepted { output: PathBuf, cq: u8, score: f64 },
    Failed(Failure),
}

/// Everything recorded about one input file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub input: PathBuf,
    pub attempts: Vec<Attempt>,
    pub outcome: FileOutcome,
}

impl FileReport {
    /// Build a failed report, filling the diagnostics from the attempts made so far
    pub fn failed(input: PathBuf, attempts: Vec<Attempt>, kind: FailureKind, reason: String) -> Self {
        let last = attempts.last().copied();
        let best_score = attempts
            .iter()
            .filter_map(|a| a.score)
            .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))));
        Self {
            input,
            outcome: FileOutcome::Failed(Failure {
                kind,
                reason,
                last_cq: last.map(|a| a.cq),
                last_score: last.and_then(|a| a.score),
                best_score,
            }),
            attempts,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, FileOutcome::Accepted { .. })
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.outcome {
            FileOutcome::Failed(failure) => Some(failure),
            FileOutcome::Accepted { .. } => None,
        }
    }

    /// CQ values in the order they were attempted
    pub fn cq_sequence(&self) -> Vec<u8> {
        self.attempts.iter().map(|a| a.cq).collect()
    }
}

/// Result of a whole batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// One report per input, in input order
    pub reports: Vec<FileReport>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn accepted(&self) -> usize {
        self.reports.iter().filter(|r| r.is_accepted()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.accepted()
    }

    pub fn all_accepted(&self) -> bool {
        self.failed() == 0
    }

    pub fn report_for(&self, input: &Path) -> Option<&FileReport> {
        self.reports.iter().find(|r| r.input == input)
    }

    /// Write the summary as pretty JSON
    pub fn write_json(&self, path: &Path) -> Result<(), io::Error> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} accepted, {} failed ({} files, {:.1}s)",
            self.accepted(),
            self.failed(),
            self.reports.len(),
            self.elapsed.as_secs_f64()
        )?;

        for report in &self.reports {
            match &report.outcome {
                FileOutcome::Accepted { output, cq, score } => writeln!(
                    f,
                    "  ok    {}  cq={} vmaf={:.2} attempts={} -> {}",
                    report.input.display(),
                    cq,
                    score,
                    report.attempts.len(),
                    output.display()
                )?,
                FileOutcome::Failed(failure) => {
                    write!(
                        f,
                        "  FAIL  {}  [{}] attempts={}",
                        report.input.display(),
                        failure.kind,
                        report.attempts.len()
                    )?;
                    if let Some(cq) = failure.last_cq {
                        write!(f, " last_cq={}", cq)?;
                    }
                    if let Some(score) = failure.last_score {
                        write!(f, " last_vmaf={:.2}", score)?;
                    }
                    if let Some(score) = failure.best_score {
                        write!(f, " best_vmaf={:.2}", score)?;
                    }
                    writeln!(f)?;
                    for line in failure.reason.lines() {
                        writeln!(f, "        {}", line)?;
                    }
                }
            }
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}
