//! External process invocation
//!
//! Every encoder and analyzer call goes through [`ProcessRunner`], so the
//! collaborators can be exercised against a scripted fake in tests.

use std::ffi::OsString;
use std::future::Future;
use std::process::{Command, Stdio};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, trace};

/// Number of trailing output lines kept as failure diagnostics
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Consecutive read errors after which a pipe is given up on
const MAX_PIPE_READ_ERRORS: u32 = 3;

/// The external program could not be started
#[derive(Debug, Error)]
#[error("failed to launch {program}: {source}")]
pub struct LaunchError {
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

/// Exit status and captured text of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        let mut text = String::with_capacity(self.stdout.len() + self.stderr.len());
        text.push_str(&self.stdout);
        text.push_str(&self.stderr);
        text
    }

    /// Last lines of the combined output, for failure reports
    pub fn diagnostics(&self) -> String {
        let combined = self.combined();
        let lines: Vec<&str> = combined.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
        lines[start..].join("\n")
    }
}

/// Capability to run an external command to completion
pub trait ProcessRunner: Send + Sync + 'static {
    fn run(
        &self,
        command: Command,
    ) -> impl Future<Output = Result<ProcessOutput, LaunchError>> + Send;
}

/// Render a command line for logs
pub fn describe_command(command: &Command) -> String {
    let mut parts: Vec<OsString> = vec![command.get_program().to_os_string()];
    parts.extend(command.get_args().map(|a| a.to_os_string()));
    parts
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs commands as real child processes on the tokio runtime
///
/// Children are spawned with `kill_on_drop`, so dropping the future of a job
/// (on cancellation) terminates the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    async fn run(&self, command: Command) -> Result<ProcessOutput, LaunchError> {
        let program = command.get_program().to_string_lossy().into_owned();
        debug!(command = %describe_command(&command), "Spawning process");

        let mut command = tokio::process::Command::from(command);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| LaunchError {
            program: program.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Drain both pipes concurrently so neither can fill up and stall the child
        let (stdout, stderr, status) = tokio::join!(
            drain_lines(stdout, &program, "stdout"),
            drain_lines(stderr, &program, "stderr"),
            child.wait(),
        );

        let status = status.map_err(|source| LaunchError {
            program: program.clone(),
            source,
        })?;

        debug!(program = %program, code = ?status.code(), "Process exited");

        Ok(ProcessOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

async fn drain_lines<R>(pipe: Option<R>, program: &str, stream: &'static str) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return String::new();
    };

    let mut reader = BufReader::new(pipe);
    let mut captured = String::new();
    let mut line = Vec::new();
    let mut errors = 0;

    // ffmpeg echoes file names and tags verbatim, so lines are not always UTF-8.
    // The pipe is read to EOF; closing it early would break the child's writes.
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                errors = 0;
                let text = String::from_utf8_lossy(&line);
                let text = text.strip_suffix('\n').unwrap_or(&text[..]);
                let text = text.strip_suffix('\r').unwrap_or(text);
                trace!(program, stream, "{}", text);
                captured.push_str(text);
                captured.push('\n');
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                errors += 1;
                debug!(program, stream, error = %e, "Pipe read failed");
                if errors >= MAX_PIPE_READ_ERRORS {
                    break;
                }
            }
        }
    }
    captured
}
