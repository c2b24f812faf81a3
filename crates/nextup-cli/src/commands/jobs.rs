//! Resurfacing job commands: inspect, run once, or run the scheduler daemon.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Subcommand;
use nextup_core::{ChannelNotifier, JobName, ResurfacingScheduler};
use serde_json::json;

use super::{open_engine, open_engine_with, print_json, CmdResult};

#[derive(Subcommand)]
pub enum JobsAction {
    /// List jobs with their schedule and last run
    List,
    /// Run one job now, ignoring its schedule
    Run {
        /// deferred_activation, delegated_followup, someday_review or postpone_analysis
        name: JobName,
    },
    /// Run the scheduler until Ctrl-C, printing notifications as JSON lines
    Daemon {
        /// Override how often each job checks whether it is due
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        tick_secs: Option<u64>,
        /// Override how long a single job run may take
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        job_timeout_secs: Option<u64>,
        /// Seconds to wait for in-flight jobs on shutdown
        #[arg(long, default_value_t = 10)]
        shutdown_timeout_secs: u64,
    },
}

pub fn run(action: JobsAction) -> CmdResult {
    match action {
        JobsAction::List => {
            let engine = open_engine()?;
            let now = Utc::now();
            let jobs: Vec<_> = engine
                .job_descriptors()?
                .into_iter()
                .map(|job| {
                    json!({
                        "name": job.name,
                        "schedule": job.schedule.to_string(),
                        "due": job.is_due(now),
                        "last_run": job.state.last_run,
                        "last_attempt": job.state.last_attempt,
                        "last_outcome": job.state.last_outcome,
                    })
                })
                .collect();
            print_json(&jobs)?;
        }
        JobsAction::Run { name } => {
            let engine = open_engine()?;
            let report = engine.run_resurfacing_job(name)?;
            print_json(&report)?;
        }
        JobsAction::Daemon {
            tick_secs,
            job_timeout_secs,
            shutdown_timeout_secs,
        } => run_daemon(
            tick_secs,
            job_timeout_secs,
            Duration::from_secs(shutdown_timeout_secs),
        )?,
    }
    Ok(())
}

fn run_daemon(
    tick_secs: Option<u64>,
    job_timeout_secs: Option<u64>,
    shutdown_timeout: Duration,
) -> CmdResult {
    let (notifier, mut events) = ChannelNotifier::channel();
    let engine = Arc::new(open_engine_with(Arc::new(notifier))?);
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async move {
        let mut scheduler = ResurfacingScheduler::new(Arc::clone(&engine));
        if let Some(secs) = tick_secs {
            scheduler = scheduler.with_tick(Duration::from_secs(secs));
        }
        if let Some(secs) = job_timeout_secs {
            scheduler = scheduler.with_job_timeout(Duration::from_secs(secs));
        }
        let handle = scheduler.start();
        eprintln!("scheduler running, press Ctrl-C to stop");

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    println!("{}", serde_json::to_string(&event)?);
                }
                _ = &mut ctrl_c => break,
            }
        }
        tracing::info!("interrupt received, stopping scheduler");

        handle.shutdown(shutdown_timeout).await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
