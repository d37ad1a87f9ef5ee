//! Quality measurement collaborators

pub mod vmaf;

pub use vmaf::{build_vmaf_command, parse_vmaf_score, MeasureError, QualityAnalyzer, QualityJob};
