//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Highest CQ value the encoder accepts
pub const MAX_CQ: u8 = 50;

/// Upper bound of the quality score scale
pub const MAX_QUALITY_SCORE: f64 = 100.0;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value is outside its allowed range
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Quality feedback loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityConfig {
    /// CQ used for the first attempt of every file (0-50)
    #[serde(default = "default_init_cq")]
    pub init_cq: u8,
    /// Amount the CQ is lowered by after a rejected attempt
    #[serde(default = "default_cq_step")]
    pub cq_step: u8,
    /// Minimum acceptable VMAF score (0-100)
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_init_cq() -> u8 {
    40
}

fn default_cq_step() -> u8 {
    2
}

fn default_threshold() -> f64 {
    95.0
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            init_cq: default_init_cq(),
            cq_step: default_cq_step(),
            threshold: default_threshold(),
        }
    }
}

/// Worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkersConfig {
    /// Thread budget handed to every encoder/analyzer invocation
    #[serde(default = "default_threads")]
    pub threads: u32,
    /// Concurrent encoder processes (bounded by hardware encoder sessions)
    #[serde(default = "default_pool_size")]
    pub transcode_workers: usize,
    /// Concurrent VMAF processes
    #[serde(default = "default_pool_size")]
    pub vmaf_workers: usize,
}

fn default_threads() -> u32 {
    14
}

fn default_pool_size() -> usize {
    1
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            transcode_workers: default_pool_size(),
            vmaf_workers: default_pool_size(),
        }
    }
}

/// Encoder settings passed to ffmpeg
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    /// ffmpeg video encoder name
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Rate control mode (`-rc`)
    #[serde(default = "default_rate_control")]
    pub rate_control: String,
    /// Downmix audio to this many channels; `None` keeps the source layout
    #[serde(default = "default_audio_channels")]
    pub audio_channels: Option<u32>,
    /// Copy container metadata from the source
    #[serde(default = "default_preserve_metadata")]
    pub preserve_metadata: bool,
}

fn default_codec() -> String {
    "hevc_nvenc".to_string()
}

fn default_preset() -> String {
    "slow".to_string()
}

fn default_rate_control() -> String {
    "vbr".to_string()
}

fn default_audio_channels() -> Option<u32> {
    Some(1)
}

fn default_preserve_metadata() -> bool {
    true
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            codec: default_codec(),
            preset: default_preset(),
            rate_control: default_rate_control(),
            audio_channels: default_audio_channels(),
            preserve_metadata: default_preserve_metadata(),
        }
    }
}

/// Output location settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    /// File extension (container) of accepted outputs, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./out")
}

fn default_extension() -> String {
    "mkv".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            extension: default_extension(),
        }
    }
}

/// External tool locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
        }
    }
}

/// Main configuration structure
///
/// Read-only for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and fields fall back to their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - BATCH_TRANSCODER_INIT_CQ -> quality.init_cq
    /// - BATCH_TRANSCODER_CQ_STEP -> quality.cq_step
    /// - BATCH_TRANSCODER_QUALITY_THRESHOLD -> quality.threshold
    /// - BATCH_TRANSCODER_THREADS -> workers.threads
    /// - BATCH_TRANSCODER_TRANSCODE_WORKERS -> workers.transcode_workers
    /// - BATCH_TRANSCODER_VMAF_WORKERS -> workers.vmaf_workers
    /// - BATCH_TRANSCODER_OUTPUT_DIR -> output.dir
    /// - BATCH_TRANSCODER_FFMPEG -> tools.ffmpeg
    pub fn apply_env_overrides(&mut self) {
        if let Some(cq) = env_parse::<u8>("BATCH_TRANSCODER_INIT_CQ") {
            self.quality.init_cq = cq;
        }

        if let Some(step) = env_parse::<u8>("BATCH_TRANSCODER_CQ_STEP") {
            self.quality.cq_step = step;
        }

        if let Some(threshold) = env_parse::<f64>("BATCH_TRANSCODER_QUALITY_THRESHOLD") {
            self.quality.threshold = threshold;
        }

        if let Some(threads) = env_parse::<u32>("BATCH_TRANSCODER_THREADS") {
            self.workers.threads = threads;
        }

        if let Some(workers) = env_parse::<usize>("BATCH_TRANSCODER_TRANSCODE_WORKERS") {
            self.workers.transcode_workers = workers;
        }

        if let Some(workers) = env_parse::<usize>("BATCH_TRANSCODER_VMAF_WORKERS") {
            self.workers.vmaf_workers = workers;
        }

        if let Ok(dir) = env::var("BATCH_TRANSCODER_OUTPUT_DIR") {
            if !dir.is_empty() {
                self.output.dir = PathBuf::from(dir);
            }
        }

        if let Ok(ffmpeg) = env::var("BATCH_TRANSCODER_FFMPEG") {
            if !ffmpeg.is_empty() {
                self.tools.ffmpeg = PathBuf::from(ffmpeg);
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from `path` when given, otherwise start from defaults; env overrides apply either way
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let mut config = Self::default();
                config.apply_env_overrides();
                Ok(config)
            }
        }
    }

    /// Check every value against its allowed range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quality.init_cq > MAX_CQ {
            return Err(ConfigError::Invalid(format!(
                "init_cq must be within 0-{}, got {}",
                MAX_CQ, self.quality.init_cq
            )));
        }

        if self.quality.cq_step == 0 {
            return Err(ConfigError::Invalid("cq_step must be at least 1".to_string()));
        }

        if !(0.0..=MAX_QUALITY_SCORE).contains(&self.quality.threshold) {
            return Err(ConfigError::Invalid(format!(
                "quality threshold must be within 0-{}, got {}",
                MAX_QUALITY_SCORE, self.quality.threshold
            )));
        }

        if self.workers.threads == 0 {
            return Err(ConfigError::Invalid("threads must be at least 1".to_string()));
        }

        if self.workers.transcode_workers == 0 {
            return Err(ConfigError::Invalid(
                "transcode_workers must be at least 1".to_string(),
            ));
        }

        if self.workers.vmaf_workers == 0 {
            return Err(ConfigError::Invalid("vmaf_workers must be at least 1".to_string()));
        }

        if self.encoder.codec.trim().is_empty() {
            return Err(ConfigError::Invalid("encoder codec must not be empty".to_string()));
        }

        if self.output.extension.trim_start_matches('.').is_empty() {
            return Err(ConfigError::Invalid(
                "output extension must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Upper bound on attempts per file: `floor(init_cq / cq_step) + 1`
    pub fn max_attempts(&self) -> u32 {
        u32::from(self.quality.init_cq) / u32::from(self.quality.cq_step.max(1)) + 1
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.trim().parse().ok())
}
