//! Configuration module for the batch transcoder
//!
//! Handles loading the run configuration from TOML files, environment variable
//! overrides and validation.

pub mod config;

pub use config::*;
