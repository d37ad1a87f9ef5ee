//! Accept / retry / give-up policy of the quality feedback loop

use crate::config::Config;

/// What to do with a measured attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Score met the threshold; keep this artifact
    Accept,
    /// Score fell short; encode again at a lower CQ
    Retry { next_cq: u8 },
    /// Score fell short and no lower CQ is left to try
    Exhausted,
}

/// CQ ladder and acceptance threshold for one run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackPolicy {
    pub initial_cq: u8,
    pub step: u8,
    pub threshold: f64,
}

impl FeedbackPolicy {
    pub fn new(initial_cq: u8, step: u8, threshold: f64) -> Self {
        Self {
            initial_cq,
            step: step.max(1),
            threshold,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.quality.init_cq, cfg.quality.cq_step, cfg.quality.threshold)
    }

    /// Judge the score of an attempt encoded at `cq`
    pub fn judge(&self, cq: u8, score: f64) -> Verdict {
        if score >= self.threshold {
            return Verdict::Accept;
        }
        match cq.checked_sub(self.step) {
            Some(next_cq) => Verdict::Retry { next_cq },
            None => Verdict::Exhausted,
        }
    }

    /// `floor(initial_cq / step) + 1`
    pub fn max_attempts(&self) -> u32 {
        u32::from(self.initial_cq) / u32::from(self.step) + 1
    }

    /// Every CQ a file may be encoded at, in attempt order
    pub fn ladder(&self) -> impl Iterator<Item = u8> {
        let step = self.step;
        std::iter::successors(Some(self.initial_cq), move |cq| cq.checked_sub(step))
    }
}
