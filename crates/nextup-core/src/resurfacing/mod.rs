//! Background resurfacing: the fixed set of recurring jobs that promote
//! dormant tasks and raise advisory notices.
//!
//! Each job is described by a [`JobDescriptor`] whose run state lives in the
//! store, so a restart does not re-run a daily job that already ran today.
//! Manual runs (`Engine::run_resurfacing_job`) and the [`runner`] share the
//! same code path.

pub mod jobs;
pub mod patterns;
pub mod runner;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::events::NotificationEvent;
use crate::storage::config::ResurfacingConfig;
use crate::task::TaskId;

pub use runner::{ResurfacingScheduler, SchedulerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobName {
    DeferredActivation,
    DelegatedFollowup,
    SomedayReview,
    PostponeAnalysis,
}

impl JobName {
    pub const ALL: [JobName; 4] = [
        JobName::DeferredActivation,
        JobName::DelegatedFollowup,
        JobName::SomedayReview,
        JobName::PostponeAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobName::DeferredActivation => "deferred_activation",
            JobName::DelegatedFollowup => "delegated_followup",
            JobName::SomedayReview => "someday_review",
            JobName::PostponeAnalysis => "postpone_analysis",
        }
    }

    pub fn schedule(&self, cfg: &ResurfacingConfig) -> Schedule {
        match self {
            JobName::DeferredActivation => Schedule::Interval {
                secs: cfg.deferred_check_interval_secs,
            },
            JobName::DelegatedFollowup => Schedule::Daily {
                hour: cfg.delegated_followup_hour,
                min: cfg.delegated_followup_min,
            },
            JobName::SomedayReview => Schedule::EveryDays {
                days: cfg.someday_review_every_days,
                hour: cfg.someday_review_hour,
            },
            JobName::PostponeAnalysis => Schedule::Daily {
                hour: cfg.postpone_analysis_hour,
                min: cfg.postpone_analysis_min,
            },
        }
    }

    pub(crate) fn state_key(&self) -> String {
        format!("job:{}", self.as_str())
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        JobName::ALL
            .into_iter()
            .find(|job| job.as_str() == normalized)
            .ok_or_else(|| ValidationError::UnknownJob(s.to_string()))
    }
}

/// When a job becomes due. Wall-clock times are UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Run every N seconds.
    Interval { secs: u64 },
    /// Run once daily at a given hour and minute.
    Daily { hour: u8, min: u8 },
    /// Run every N days at a given hour.
    EveryDays { days: u32, hour: u8 },
}

fn at_time(date: NaiveDate, hour: u8, min: u8) -> Option<DateTime<Utc>> {
    date.and_hms_opt(u32::from(hour), u32::from(min), 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
}

impl Schedule {
    pub fn is_due(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match *self {
            Schedule::Interval { secs } => match last_run {
                None => true,
                Some(last) => now - last >= Duration::seconds(secs as i64),
            },
            Schedule::Daily { hour, min } => {
                let Some(scheduled) = at_time(now.date_naive(), hour, min) else {
                    return false;
                };
                match last_run {
                    None => now >= scheduled,
                    Some(last) => last < scheduled && now >= scheduled,
                }
            }
            Schedule::EveryDays { days, hour } => {
                let anchor = match last_run {
                    None => now.date_naive(),
                    Some(last) => last.date_naive() + Duration::days(i64::from(days)),
                };
                at_time(anchor, hour, 0).is_some_and(|next| now >= next)
            }
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval { secs } => {
                if *secs >= 3600 {
                    write!(f, "every {} hours", secs / 3600)
                } else {
                    write!(f, "every {} minutes", (secs / 60).max(1))
                }
            }
            Self::Daily { hour, min } => write!(f, "daily at {hour:02}:{min:02} UTC"),
            Self::EveryDays { days, hour } => write!(f, "every {days} days at {hour:02}:00 UTC"),
        }
    }
}

/// Outcome of the most recent run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded { changed: usize, skipped: usize },
    Failed { message: String },
}

/// Persisted run state of one job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRunState {
    /// Last successful run; failures do not advance it so the next tick retries.
    pub last_run: Option<DateTime<Utc>>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_outcome: Option<JobOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub name: JobName,
    pub schedule: Schedule,
    #[serde(flatten)]
    pub state: JobRunState,
}

impl JobDescriptor {
    pub fn new(name: JobName, cfg: &ResurfacingConfig) -> Self {
        JobDescriptor {
            name,
            schedule: name.schedule(cfg),
            state: JobRunState::default(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.schedule.is_due(self.state.last_run, now)
    }

    /// Record an attempt. Only successes move `last_run`.
    pub fn mark_run(&mut self, now: DateTime<Utc>, outcome: JobOutcome) {
        if matches!(outcome, JobOutcome::Succeeded { .. }) {
            self.state.last_run = Some(now);
        }
        self.state.last_attempt = Some(now);
        self.state.last_outcome = Some(outcome);
    }
}

/// What one job run did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job: JobName,
    pub ran_at: DateTime<Utc>,
    /// Tasks the run activated or flagged.
    pub changed: Vec<TaskId>,
    /// Eligible tasks left alone, e.g. still blocked or merely listed for review.
    pub skipped: Vec<TaskId>,
    /// Per-task errors; a run with failures is retried on the next tick.
    #[serde(default)]
    pub failures: Vec<(TaskId, String)>,
    pub event: Option<NotificationEvent>,
}

impl JobReport {
    pub fn new(job: JobName, ran_at: DateTime<Utc>) -> Self {
        JobReport {
            job,
            ran_at,
            changed: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
            event: None,
        }
    }

    pub fn outcome(&self) -> JobOutcome {
        if self.failures.is_empty() {
            JobOutcome::Succeeded {
                changed: self.changed.len(),
                skipped: self.skipped.len(),
            }
        } else {
            JobOutcome::Failed {
                message: self
                    .failures
                    .iter()
                    .map(|(id, err)| format!("task {id}: {err}"))
                    .collect::<Vec<_>>()
                    .join("; "),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, day, hour, min, 0).unwrap()
    }

    #[test]
    fn job_names_round_trip() {
        for job in JobName::ALL {
            assert_eq!(job.as_str().parse::<JobName>().unwrap(), job);
        }
        assert_eq!(
            "deferred-activation".parse::<JobName>().unwrap(),
            JobName::DeferredActivation
        );
        assert!("nightly_backup".parse::<JobName>().is_err());
    }

    #[test]
    fn interval_due_when_never_run_or_elapsed() {
        let s = Schedule::Interval { secs: 3600 };
        assert!(s.is_due(None, at(4, 9, 0)));
        assert!(!s.is_due(Some(at(4, 9, 0)), at(4, 9, 30)));
        assert!(s.is_due(Some(at(4, 9, 0)), at(4, 10, 0)));
    }

    #[test]
    fn daily_runs_once_after_slot() {
        let s = Schedule::Daily { hour: 9, min: 30 };
        assert!(!s.is_due(None, at(4, 9, 0)));
        assert!(s.is_due(None, at(4, 9, 30)));
        assert!(!s.is_due(Some(at(4, 9, 31)), at(4, 23, 0)));
        assert!(s.is_due(Some(at(4, 9, 31)), at(5, 9, 45)));
        // ran yesterday evening, today's slot not reached yet
        assert!(!s.is_due(Some(at(3, 22, 0)), at(4, 8, 0)));
    }

    #[test]
    fn every_days_waits_full_period() {
        let s = Schedule::EveryDays { days: 7, hour: 10 };
        assert!(s.is_due(None, at(4, 10, 0)));
        assert!(!s.is_due(Some(at(4, 10, 0)), at(10, 23, 0)));
        assert!(s.is_due(Some(at(4, 10, 0)), at(11, 10, 0)));
    }

    #[test]
    fn failed_run_does_not_advance_last_run() {
        let mut job = JobDescriptor::new(JobName::DelegatedFollowup, &ResurfacingConfig::default());
        job.mark_run(
            at(4, 9, 5),
            JobOutcome::Failed {
                message: "db locked".into(),
            },
        );
        assert_eq!(job.state.last_run, None);
        assert!(job.is_due(at(4, 9, 6)));
        job.mark_run(at(4, 9, 7), JobOutcome::Succeeded { changed: 1, skipped: 0 });
        assert!(!job.is_due(at(4, 12, 0)));
    }

    #[test]
    fn default_schedules_cover_every_job() {
        let cfg = ResurfacingConfig::default();
        let jobs: Vec<JobDescriptor> = JobName::ALL
            .into_iter()
            .map(|job| JobDescriptor::new(job, &cfg))
            .collect();
        assert_eq!(jobs.len(), 4);
        assert_eq!(jobs[0].schedule, Schedule::Interval { secs: 3600 });
        assert_eq!(jobs[0].schedule.to_string(), "every 1 hours");
        assert_eq!(jobs[1].schedule.to_string(), "daily at 09:00 UTC");
    }

    #[test]
    fn report_outcome_reflects_failures() {
        let mut report = JobReport::new(JobName::DeferredActivation, at(4, 9, 0));
        report.changed.push(TaskId(1));
        assert_eq!(report.outcome(), JobOutcome::Succeeded { changed: 1, skipped: 0 });
        report.failures.push((TaskId(2), "locked".into()));
        assert!(matches!(report.outcome(), JobOutcome::Failed { .. }));
    }
}
