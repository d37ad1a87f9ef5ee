//! Concurrency planning
//!
//! Works out how many CPU threads a run can demand at its peak and compares
//! that with the cores of the machine.

use crate::config::Config;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Thread budget of every encoder and analyzer invocation
    pub threads_per_job: u32,
    /// Size of the transcode pool
    pub transcode_workers: usize,
    /// Size of the quality pool
    pub vmaf_workers: usize,
}

impl ConcurrencyPlan {
    /// Derive a plan for this machine, detecting cores via num_cpus
    pub fn derive(cfg: &Config) -> Self {
        Self::with_cores(cfg, num_cpus::get() as u32)
    }

    pub fn with_cores(cfg: &Config, total_cores: u32) -> Self {
        Self {
            total_cores,
            threads_per_job: cfg.workers.threads,
            transcode_workers: cfg.workers.transcode_workers,
            vmaf_workers: cfg.workers.vmaf_workers,
        }
    }

    /// Threads in use when both pools are full
    pub fn peak_threads(&self) -> u64 {
        let jobs = (self.transcode_workers + self.vmaf_workers) as u64;
        u64::from(self.threads_per_job) * jobs
    }

    /// Peak demand exceeds the available cores
    ///
    /// Not an error: encodes on a hardware encoder use far fewer CPU
    /// threads than requested.
    pub fn is_oversubscribed(&self) -> bool {
        self.peak_threads() > u64::from(self.total_cores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(threads: u32, transcode: usize, vmaf: usize) -> Config {
        let mut cfg = Config::default();
        cfg.workers.threads = threads;
        cfg.workers.transcode_workers = transcode;
        cfg.workers.vmaf_workers = vmaf;
        cfg
    }

    #[test]
    fn test_defaults_on_sixteen_cores() {
        let plan = ConcurrencyPlan::with_cores(&Config::default(), 16);
        assert_eq!(plan.threads_per_job, 14);
        assert_eq!(plan.peak_threads(), 28);
        assert!(plan.is_oversubscribed());
    }

    #[test]
    fn test_fits_on_large_machine() {
        let plan = ConcurrencyPlan::with_cores(&config(8, 2, 2), 32);
        assert_eq!(plan.peak_threads(), 32);
        assert!(!plan.is_oversubscribed());
    }

    #[test]
    fn test_derive_detects_cores() {
        let plan = ConcurrencyPlan::derive(&Config::default());
        assert!(plan.total_cores >= 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_oversubscription_matches_peak(
            cores in 1u32..256,
            threads in 1u32..64,
            transcode in 1usize..8,
            vmaf in 1usize..8,
        ) {
            let plan = ConcurrencyPlan::with_cores(&config(threads, transcode, vmaf), cores);
            let peak = u64::from(threads) * (transcode + vmaf) as u64;

            prop_assert_eq!(plan.peak_threads(), peak);
            prop_assert_eq!(plan.is_oversubscribed(), peak > u64::from(cores));
        }
    }
}
