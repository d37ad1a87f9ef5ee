//! CLI entry point for the batch transcoder
//!
//! Parses command line arguments, layers them over the configuration file and
//! environment, and runs one batch.

use anyhow::{bail, Context};
use batch_transcoder::{cancellation, collect_inputs, BatchCoordinator, Config, SystemRunner};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Transcode videos to the highest CQ that still meets a VMAF threshold
#[derive(Parser, Debug)]
#[command(name = "batch-transcode")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input files or directories
    #[arg(short, long, required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Output directory [default: ./out]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Initial CQ, 0-50 [default: 40]
    #[arg(long, visible_alias = "cq", value_parser = clap::value_parser!(u8).range(0..=50))]
    init_cq: Option<u8>,

    /// Minimum acceptable VMAF score, 0-100 [default: 95]
    #[arg(short, long, alias = "quality-treshold")]
    quality_threshold: Option<f64>,

    /// Thread budget of every ffmpeg invocation [default: 14]
    #[arg(short, long)]
    threads: Option<u32>,

    /// Number of encodes that may run at once [default: 1]
    #[arg(long)]
    transcode_workers: Option<usize>,

    /// Number of VMAF measurements that may run at once [default: 1]
    #[arg(long)]
    vmaf_workers: Option<usize>,

    /// Debug logging, including every ffmpeg command line
    #[arg(short, long)]
    verbose: bool,

    /// Path to a configuration file (config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip the ffmpeg, encoder and libvmaf checks
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Also write the run summary as JSON to this path
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

impl Args {
    /// Flags given on the command line win over file and environment values
    fn apply_to(&self, config: &mut Config) {
        if let Some(dir) = &self.output {
            config.output.dir = dir.clone();
        }
        if let Some(cq) = self.init_cq {
            config.quality.init_cq = cq;
        }
        if let Some(threshold) = self.quality_threshold {
            config.quality.threshold = threshold;
        }
        if let Some(threads) = self.threads {
            config.workers.threads = threads;
        }
        if let Some(workers) = self.transcode_workers {
            config.workers.transcode_workers = workers;
        }
        if let Some(workers) = self.vmaf_workers {
            config.workers.vmaf_workers = workers;
        }
    }
}

fn install_tracing(verbose: bool) -> anyhow::Result<()> {
    let default = if verbose {
        "info,batch_transcoder=debug,batch_transcode=debug"
    } else {
        "info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Unable to initialize logging: {}", e))
}

/// Returns whether every file was accepted
async fn run(args: Args) -> anyhow::Result<bool> {
    let mut config = Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply_to(&mut config);

    let inputs = collect_inputs(&args.input);
    if inputs.is_empty() {
        bail!("no input files found");
    }
    info!(files = inputs.len(), output = %config.output.dir.display(), "Collected inputs");

    let runner = Arc::new(SystemRunner);
    let coordinator = if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
        BatchCoordinator::new_without_checks(config, runner)?
    } else {
        BatchCoordinator::new(config, runner).await?
    };

    let (trigger, cancel) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            trigger.cancel();
        }
    });

    let summary = coordinator.run(inputs, cancel).await?;
    print!("{}", summary);

    if let Some(path) = &args.summary_json {
        summary
            .write_json(path)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
    }

    Ok(summary.all_accepted())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = install_tracing(args.verbose) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
