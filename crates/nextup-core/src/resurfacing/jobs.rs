//! Bodies of the four resurfacing jobs.
//!
//! Each job promotes or inspects tasks one transaction at a time, so a
//! foreground edit to the same task is never lost, and re-running a job on
//! unchanged data changes nothing and emits nothing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, error, warn};

use super::patterns::{analyze, PostponePattern};
use super::{JobName, JobReport};
use crate::engine::{Engine, Resurface};
use crate::error::Result;
use crate::events::{NotificationEvent, NotificationKind};
use crate::storage::store::InterventionEntry;
use crate::task::{Task, TaskId, TaskState};

pub(crate) fn run(engine: &Engine, job: JobName, now: DateTime<Utc>) -> Result<JobReport> {
    match job {
        JobName::DeferredActivation => deferred_activation(engine, now),
        JobName::DelegatedFollowup => delegated_followup(engine, now),
        JobName::SomedayReview => someday_review(engine, now),
        JobName::PostponeAnalysis => postpone_analysis(engine, now),
    }
}

/// Deferred tasks whose start date has arrived go back to Active, unless a
/// blocker is still incomplete; those stay Deferred until a later run.
fn deferred_activation(engine: &Engine, now: DateTime<Utc>) -> Result<JobReport> {
    let today = now.date_naive();
    let due = engine.with_store(|store| {
        Ok(store
            .get_by_state(TaskState::Deferred)?
            .into_iter()
            .filter(|t| t.start_date.is_some_and(|start| start <= today))
            .collect::<Vec<_>>())
    })?;

    let mut report = JobReport::new(JobName::DeferredActivation, now);
    let mut titles = Vec::new();
    for task in due {
        match engine.resurface(task.id, TaskState::Deferred, true, now) {
            Ok(Resurface::Activated(task)) => {
                titles.push(task.title.clone());
                report.changed.push(task.id);
            }
            Ok(Resurface::Blocked(blockers)) => {
                warn!(task_id = %task.id, ?blockers, "deferred task is due but still blocked");
                report.skipped.push(task.id);
            }
            Ok(Resurface::Skipped) => debug!(task_id = %task.id, "task changed state before activation"),
            Err(err) => {
                error!(task_id = %task.id, error = %err, "failed to activate deferred task");
                report.failures.push((task.id, err.to_string()));
            }
        }
    }

    if !report.changed.is_empty() {
        report.event = Some(NotificationEvent::batch(
            NotificationKind::DeferredActivated,
            plural(report.changed.len(), "deferred task is back", "deferred tasks are back"),
            titles.join("\n"),
            report.changed.clone(),
            now,
        ));
    }
    Ok(report)
}

/// Delegated tasks whose follow-up date has arrived go back to Active so the
/// user checks in with the delegate.
fn delegated_followup(engine: &Engine, now: DateTime<Utc>) -> Result<JobReport> {
    let today = now.date_naive();
    let due = engine.with_store(|store| {
        Ok(store
            .get_by_state(TaskState::Delegated)?
            .into_iter()
            .filter(|t| t.follow_up_date.is_some_and(|date| date <= today))
            .collect::<Vec<_>>())
    })?;

    let mut report = JobReport::new(JobName::DelegatedFollowup, now);
    let mut lines = Vec::new();
    for task in due {
        let delegate = task.delegate_target.clone().unwrap_or_default();
        match engine.resurface(task.id, TaskState::Delegated, false, now) {
            Ok(Resurface::Activated(task)) => {
                lines.push(format!("{} (delegated to {delegate})", task.title));
                report.changed.push(task.id);
            }
            Ok(_) => debug!(task_id = %task.id, "task changed state before follow-up"),
            Err(err) => {
                error!(task_id = %task.id, error = %err, "failed to resurface delegated task");
                report.failures.push((task.id, err.to_string()));
            }
        }
    }

    if !report.changed.is_empty() {
        report.event = Some(NotificationEvent::batch(
            NotificationKind::DelegatedFollowUp,
            plural(report.changed.len(), "delegated task needs a follow-up", "delegated tasks need a follow-up"),
            lines.join("\n"),
            report.changed.clone(),
            now,
        ));
    }
    Ok(report)
}

const SOMEDAY_MARK_KEY: &str = "someday_review:last";

/// What the last someday review showed the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ReviewMark {
    reviewed_at: Option<DateTime<Utc>>,
    task_ids: BTreeSet<TaskId>,
}

/// Advisory only: reminds the user the someday/maybe list exists.
///
/// Parked tasks are never modified, so the report lists them as skipped. The
/// reminder repeats only once the review interval has passed or the list has
/// changed since the last one.
fn someday_review(engine: &Engine, now: DateTime<Utc>) -> Result<JobReport> {
    let every = Duration::days(i64::from(engine.config().resurfacing.someday_review_every_days));
    let (parked, mark) = engine.with_store(|store| {
        let parked = store.get_by_state(TaskState::SomedayMaybe)?;
        let mark: ReviewMark = match store.get_kv(SOMEDAY_MARK_KEY)? {
            Some(json) => serde_json::from_str(&json)?,
            None => ReviewMark::default(),
        };
        Ok((parked, mark))
    })?;

    let mut report = JobReport::new(JobName::SomedayReview, now);
    let ids: BTreeSet<TaskId> = parked.iter().map(|t| t.id).collect();
    report.skipped = ids.iter().copied().collect();
    if parked.is_empty() {
        return Ok(report);
    }
    let interval_passed = mark.reviewed_at.map_or(true, |at| now - at >= every);
    if !interval_passed && mark.task_ids == ids {
        debug!(parked = parked.len(), "someday list unchanged since last review");
        return Ok(report);
    }

    let preview: Vec<&str> = parked.iter().take(5).map(|t| t.title.as_str()).collect();
    let mut message = preview.join("\n");
    if parked.len() > preview.len() {
        message.push_str(&format!("\n... and {} more", parked.len() - preview.len()));
    }
    let json = serde_json::to_string(&ReviewMark {
        reviewed_at: Some(now),
        task_ids: ids,
    })?;
    engine.with_store(|store| store.set_kv(SOMEDAY_MARK_KEY, &json))?;

    report.event = Some(NotificationEvent::batch(
        NotificationKind::SomedayReview,
        plural(parked.len(), "someday/maybe task to review", "someday/maybe tasks to review"),
        message,
        report.skipped.clone(),
        now,
    ));
    Ok(report)
}

/// Flags tasks with a postponement pattern in the rolling window.
///
/// A task is alerted at most once per pattern: it is flagged again only after
/// a new postponement lands after its last alert.
fn postpone_analysis(engine: &Engine, now: DateTime<Utc>) -> Result<JobReport> {
    let cfg = &engine.config().resurfacing;
    let since = now - Duration::days(i64::from(cfg.postpone_window_days));

    let (patterns, tasks) = engine.with_store(|store| {
        let records = store.postpone_history(None, Some(since))?;
        let patterns = analyze(&records, cfg.postpone_threshold, cfg.repeated_reason_threshold);
        let mut fresh: Vec<PostponePattern> = Vec::new();
        let mut tasks: HashMap<TaskId, Task> = HashMap::new();
        for pattern in patterns {
            let Some(task) = store.get_by_id(pattern.task_id)? else {
                continue;
            };
            if matches!(task.state, TaskState::Completed | TaskState::Trash) {
                continue;
            }
            let already_alerted = store
                .last_intervention(pattern.task_id)?
                .is_some_and(|entry| pattern.latest_at <= entry.alerted_at);
            if already_alerted {
                continue;
            }
            tasks.insert(task.id, task);
            fresh.push(pattern);
        }
        Ok((fresh, tasks))
    })?;

    let mut report = JobReport::new(JobName::PostponeAnalysis, now);
    if patterns.is_empty() {
        return Ok(report);
    }

    engine.mutate("record_interventions", |store| {
        for pattern in &patterns {
            store.record_intervention(&InterventionEntry {
                task_id: pattern.task_id,
                alerted_at: now,
                postpone_count: pattern.count,
            })?;
        }
        Ok(())
    })?;

    let lines: Vec<String> = patterns
        .iter()
        .map(|p| {
            let title = tasks.get(&p.task_id).map_or("", |t| t.title.as_str());
            format!("{title}: {}", p.summary())
        })
        .collect();
    report.changed = patterns.iter().map(|p| p.task_id).collect();
    report.event = Some(NotificationEvent::batch(
        NotificationKind::PostponeIntervention,
        plural(patterns.len(), "task keeps getting postponed", "tasks keep getting postponed"),
        lines.join("\n"),
        report.changed.clone(),
        now,
    ));
    Ok(report)
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("1 {one}")
    } else {
        format!("{n} {many}")
    }
}
