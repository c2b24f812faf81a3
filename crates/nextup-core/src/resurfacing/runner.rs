//! Tokio driver for the resurfacing jobs.
//!
//! One loop per job wakes every tick, asks the persisted descriptor whether
//! the job is due, and runs it on the blocking pool under a timeout. Failures
//! are logged and retried on the next tick; they never stop the loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{JobName, JobReport};
use crate::engine::Engine;

/// Owns the job loops' configuration and their shared shutdown token.
pub struct ResurfacingScheduler {
    engine: Arc<Engine>,
    tick: Duration,
    job_timeout: Duration,
    token: CancellationToken,
}

impl ResurfacingScheduler {
    pub fn new(engine: Arc<Engine>) -> Self {
        let cfg = &engine.config().resurfacing;
        let tick = Duration::from_secs(cfg.tick_secs);
        let job_timeout = Duration::from_secs(cfg.job_timeout_secs);
        Self {
            engine,
            tick,
            job_timeout,
            token: CancellationToken::new(),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Cancelling this token stops every loop after its in-flight run.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn one loop per job. Must be called inside a tokio runtime.
    pub fn start(self) -> SchedulerHandle {
        info!(
            jobs = JobName::ALL.len(),
            tick_secs = self.tick.as_secs_f64(),
            "resurfacing scheduler started"
        );
        let handles = JobName::ALL
            .into_iter()
            .map(|job| {
                tokio::spawn(job_loop(
                    Arc::clone(&self.engine),
                    job,
                    self.tick,
                    self.job_timeout,
                    self.token.clone(),
                ))
            })
            .collect();
        SchedulerHandle {
            token: self.token,
            handles,
        }
    }
}

pub struct SchedulerHandle {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal every loop and wait up to `timeout` for in-flight runs.
    pub async fn shutdown(self, timeout: Duration) {
        self.token.cancel();
        info!(
            task_count = self.handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for job loops to finish"
        );
        let deadline = Instant::now() + timeout;
        for handle in self.handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(error = %err, "job loop panicked"),
                Err(_) => {
                    warn!("shutdown timed out after {timeout:?}, some jobs may still be running");
                    return;
                }
            }
        }
        info!("resurfacing scheduler stopped");
    }
}

async fn job_loop(
    engine: Arc<Engine>,
    job: JobName,
    tick: Duration,
    job_timeout: Duration,
    token: CancellationToken,
) {
    debug!(%job, "job loop started");
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(tick) => {}
        }
        run_if_due(&engine, job, job_timeout).await;
    }
    debug!(%job, "job loop stopped");
}

/// One scheduler tick for `job`. Returns the report when the job ran cleanly.
pub async fn run_if_due(
    engine: &Arc<Engine>,
    job: JobName,
    job_timeout: Duration,
) -> Option<JobReport> {
    let engine = Arc::clone(engine);
    let work = tokio::task::spawn_blocking(move || engine.run_job_if_due(job, Utc::now()));
    match tokio::time::timeout(job_timeout, work).await {
        Ok(Ok(Ok(Some(report)))) => Some(report),
        Ok(Ok(Ok(None))) => None,
        Ok(Ok(Err(err))) => {
            // Run state already records the failure; the job stays due.
            error!(%job, error = %err, "resurfacing job failed, will retry next tick");
            None
        }
        Ok(Err(err)) => {
            error!(%job, error = %err, "resurfacing job panicked");
            None
        }
        Err(_) => {
            error!(%job, timeout_secs = job_timeout.as_secs(), "resurfacing job timed out");
            None
        }
    }
}
