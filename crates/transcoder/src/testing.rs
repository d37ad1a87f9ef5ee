//! Scripted stand-ins for ffmpeg used by the unit tests

use crate::process::{LaunchError, ProcessOutput, ProcessRunner};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type ScoreFn = dyn Fn(&Path, u8) -> f64 + Send + Sync;

/// What the fake observed, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FakeEvent {
    EncodeStarted { input: PathBuf, cq: u8 },
    EncodeFinished { input: PathBuf, cq: u8 },
    MeasureStarted { input: PathBuf, cq: u8 },
    MeasureFinished { input: PathBuf, cq: u8 },
}

#[derive(Default)]
struct Gauge {
    now: AtomicUsize,
    peak: AtomicUsize,
}

struct GaugeGuard<'a>(&'a Gauge);

impl Gauge {
    fn enter(&self) -> GaugeGuard<'_> {
        let now = self.now.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(self)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.now.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Emulates the ffmpeg encoder and libvmaf analyzer
///
/// Encodes write a small file to the requested output and remember which
/// source and CQ produced it; measurements look that up and ask the score
/// function for the result.
pub(crate) struct FakeRunner {
    score: Box<ScoreFn>,
    encode_failures: Vec<(String, u8)>,
    measure_failures: Vec<String>,
    unparsable_scores: Vec<String>,
    missing_binary: bool,
    write_artifacts: bool,
    encode_delay: Duration,
    measure_delay: Duration,
    artifacts: Mutex<HashMap<PathBuf, (PathBuf, u8)>>,
    events: Mutex<Vec<FakeEvent>>,
    encoding: Gauge,
    measuring: Gauge,
}

impl FakeRunner {
    pub(crate) fn new<F>(score: F) -> Self
    where
        F: Fn(&Path, u8) -> f64 + Send + Sync + 'static,
    {
        Self {
            score: Box::new(score),
            encode_failures: Vec::new(),
            measure_failures: Vec::new(),
            unparsable_scores: Vec::new(),
            missing_binary: false,
            write_artifacts: true,
            encode_delay: Duration::ZERO,
            measure_delay: Duration::ZERO,
            artifacts: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            encoding: Gauge::default(),
            measuring: Gauge::default(),
        }
    }

    /// Encoder exits 1 for the file with this stem at this CQ
    pub(crate) fn fail_encode_at(mut self, stem: &str, cq: u8) -> Self {
        self.encode_failures.push((stem.to_string(), cq));
        self
    }

    /// Analyzer exits 1 for the file with this stem
    pub(crate) fn fail_measure_for(mut self, stem: &str) -> Self {
        self.measure_failures.push(stem.to_string());
        self
    }

    /// Analyzer exits 0 but prints no score for the file with this stem
    pub(crate) fn unparsable_score_for(mut self, stem: &str) -> Self {
        self.unparsable_scores.push(stem.to_string());
        self
    }

    pub(crate) fn missing_binary(mut self) -> Self {
        self.missing_binary = true;
        self
    }

    pub(crate) fn skip_writing_artifacts(mut self) -> Self {
        self.write_artifacts = false;
        self
    }

    pub(crate) fn with_delays(mut self, encode: Duration, measure: Duration) -> Self {
        self.encode_delay = encode;
        self.measure_delay = measure;
        self
    }

    pub(crate) fn events(&self) -> Vec<FakeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn encode_calls(&self) -> Vec<(PathBuf, u8)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                FakeEvent::EncodeStarted { input, cq } => Some((input, cq)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn measure_calls(&self) -> Vec<(PathBuf, u8)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                FakeEvent::MeasureStarted { input, cq } => Some((input, cq)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn peak_encodes(&self) -> usize {
        self.encoding.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn peak_measurements(&self) -> usize {
        self.measuring.peak.load(Ordering::SeqCst)
    }

    fn record(&self, event: FakeEvent) {
        self.events.lock().unwrap().push(event);
    }

    async fn encode(&self, args: &[String]) -> ProcessOutput {
        let _active = self.encoding.enter();
        let input = PathBuf::from(value_after(args, "-i").unwrap_or_default());
        let cq: u8 = value_after(args, "-cq")
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();
        let output = PathBuf::from(args.last().cloned().unwrap_or_default());

        self.record(FakeEvent::EncodeStarted {
            input: input.clone(),
            cq,
        });

        // Real encoders create the output before finishing
        if self.write_artifacts {
            let _ = std::fs::write(&output, format!("{} @ cq {}", input.display(), cq));
        }

        tokio::time::sleep(self.encode_delay).await;

        let stem = stem_of(&input);
        let failed = self
            .encode_failures
            .iter()
            .any(|(s, c)| *s == stem && *c == cq);

        self.record(FakeEvent::EncodeFinished {
            input: input.clone(),
            cq,
        });

        if failed {
            return ProcessOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: "[hevc_nvenc @ 0x5581] OpenEncodeSessionEx failed: out of memory (10)\n\
                         Error initializing output stream 0:0\n"
                    .to_string(),
            };
        }

        self.artifacts
            .lock()
            .unwrap()
            .insert(output, (input, cq));

        ProcessOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: "video:1024kB audio:64kB subtitle:0kB\n".to_string(),
        }
    }

    async fn measure(&self, args: &[String]) -> ProcessOutput {
        let _active = self.measuring.enter();
        let inputs = values_after(args, "-i");
        let distorted = PathBuf::from(inputs.first().cloned().unwrap_or_default());

        let known = self.artifacts.lock().unwrap().get(&distorted).cloned();
        let Some((original, cq)) = known else {
            return ProcessOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: format!("{}: No such file or directory\n", distorted.display()),
            };
        };

        self.record(FakeEvent::MeasureStarted {
            input: original.clone(),
            cq,
        });

        tokio::time::sleep(self.measure_delay).await;

        self.record(FakeEvent::MeasureFinished {
            input: original.clone(),
            cq,
        });

        let stem = stem_of(&original);
        if self.measure_failures.contains(&stem) {
            return ProcessOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: "[libvmaf @ 0x55] could not parse model config\n".to_string(),
            };
        }

        if self.unparsable_scores.contains(&stem) {
            return ProcessOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: "frame= 1440 fps=310 q=-0.0 Lsize=N/A\n".to_string(),
            };
        }

        let score = (self.score)(&original, cq);
        ProcessOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: format!(
                "frame= 1440 fps=310 q=-0.0 Lsize=N/A\n[Parsed_libvmaf_0 @ 0x7f10] VMAF score: {:.6}\n",
                score
            ),
        }
    }
}

impl ProcessRunner for FakeRunner {
    async fn run(&self, command: Command) -> Result<ProcessOutput, LaunchError> {
        let program = command.get_program().to_string_lossy().into_owned();
        let args: Vec<String> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        drop(command);

        if self.missing_binary {
            return Err(LaunchError {
                program,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
            });
        }

        if args.iter().any(|a| a == "-filter_complex") {
            Ok(self.measure(&args).await)
        } else if args.iter().any(|a| a == "-c:v") {
            Ok(self.encode(&args).await)
        } else {
            Ok(ProcessOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: format!("unexpected invocation: {}", args.join(" ")),
            })
        }
    }
}

/// Runs every command through a closure; for probing-style calls
pub(crate) struct FnRunner<F>(pub(crate) F);

impl<F> ProcessRunner for FnRunner<F>
where
    F: Fn(&[String]) -> Result<ProcessOutput, LaunchError> + Send + Sync + 'static,
{
    async fn run(&self, command: Command) -> Result<ProcessOutput, LaunchError> {
        let args: Vec<String> = command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        (self.0)(&args)
    }
}

/// Successful output with the given stdout
pub(crate) fn stdout_ok(stdout: &str) -> ProcessOutput {
    ProcessOutput {
        code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn value_after(args: &[String], flag: &str) -> Option<String> {
    args.windows(2)
        .find(|pair| pair[0] == flag)
        .map(|pair| pair[1].clone())
}

fn values_after(args: &[String], flag: &str) -> Vec<String> {
    args.windows(2)
        .filter(|pair| pair[0] == flag)
        .map(|pair| pair[1].clone())
        .collect()
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or_default()
        .to_string()
}
