//! Dual worker pool scheduler
//!
//! Two independently bounded pools, one for encodes and one for quality
//! measurements. Each pool is gated by a tokio [`Semaphore`], which hands out
//! permits in the order they were requested, so queued jobs start FIFO.

use crate::encode::{EncodeError, TranscodeArtifact, TranscodeJob, Transcoder};
use crate::measure::{MeasureError, QualityAnalyzer, QualityJob};
use crate::process::ProcessRunner;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// A job was submitted to (or waiting on) a pool that has been shut down
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("{0} pool is shut down")]
pub struct PoolClosed(pub &'static str);

/// Point-in-time counters for one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub running: usize,
    /// Highest number of jobs that ran at the same time
    pub peak: usize,
    pub completed: u64,
}

/// A bounded executor for one kind of job
pub struct Pool {
    name: &'static str,
    size: usize,
    semaphore: Arc<Semaphore>,
    running: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicU64,
}

/// Held while a job occupies a pool slot
struct Slot<'a> {
    pool: &'a Pool,
    _permit: OwnedSemaphorePermit,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.pool.running.fetch_sub(1, Ordering::SeqCst);
        self.pool.completed.fetch_add(1, Ordering::SeqCst);
    }
}

impl Pool {
    pub fn new(name: &'static str, size: usize) -> Self {
        Self {
            name,
            size,
            semaphore: Arc::new(Semaphore::new(size)),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the number of free slots
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.size,
            running: self.running.load(Ordering::SeqCst),
            peak: self.peak.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
        }
    }

    /// Wait for a free slot
    async fn enter(&self) -> Result<Slot<'_>, PoolClosed> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolClosed(self.name))?;

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        Ok(Slot {
            pool: self,
            _permit: permit,
        })
    }

    /// Fail every waiting and future submission with [`PoolClosed`]
    ///
    /// Jobs that already hold a slot run to completion.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// Owns both pools and the collaborators that run inside them
pub struct Scheduler<R> {
    transcode_pool: Pool,
    quality_pool: Pool,
    transcoder: Transcoder<R>,
    analyzer: QualityAnalyzer<R>,
}

impl<R: ProcessRunner> Scheduler<R> {
    pub fn new(
        transcode_workers: usize,
        quality_workers: usize,
        transcoder: Transcoder<R>,
        analyzer: QualityAnalyzer<R>,
    ) -> Self {
        Self {
            transcode_pool: Pool::new("transcode", transcode_workers),
            quality_pool: Pool::new("quality", quality_workers),
            transcoder,
            analyzer,
        }
    }

    /// Run an encode once a transcode slot frees up
    pub async fn submit_transcode(&self, job: TranscodeJob) -> Result<TranscodeArtifact, EncodeError> {
        let _slot = self.transcode_pool.enter().await?;
        debug!(input = %job.input.display(), cq = job.cq, "Transcode slot acquired");
        self.transcoder.transcode(&job).await
    }

    /// Run a measurement once a quality slot frees up
    pub async fn submit_quality(&self, job: QualityJob) -> Result<f64, MeasureError> {
        let _slot = self.quality_pool.enter().await?;
        debug!(artifact = %job.artifact.display(), "Quality slot acquired");
        self.analyzer.measure(&job).await
    }

    pub fn transcode_stats(&self) -> PoolStats {
        self.transcode_pool.stats()
    }

    pub fn quality_stats(&self) -> PoolStats {
        self.quality_pool.stats()
    }

    /// Close both pools; queued submissions resolve to [`PoolClosed`]
    pub fn shutdown(&self) {
        self.transcode_pool.close();
        self.quality_pool.close();
    }
}
