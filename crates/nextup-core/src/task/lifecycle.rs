//! Lifecycle transitions and their side effects on a single task.
//!
//! `plan_transition` validates a requested move against the state table and
//! the per-state requirements, then returns the updated task plus the
//! records the engine must persist alongside it. It never touches storage,
//! so a rejected transition leaves everything as it was.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{PostponeInput, PostponeRecord, Task, TaskState, TaskTransitionError};
use crate::error::{CoreError, Result, ValidationError};

/// Who asked for the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionOrigin {
    /// A user or UI collaborator.
    #[default]
    Manual,
    /// The resurfacing scheduler.
    Scheduler,
}

/// Extra data some transitions need.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionMetadata {
    pub start_date: Option<NaiveDate>,
    pub delegate_target: Option<String>,
    pub follow_up_date: Option<NaiveDate>,
    pub postpone: Option<PostponeInput>,
    #[serde(default)]
    pub origin: TransitionOrigin,
}

impl TransitionMetadata {
    pub fn defer(start_date: NaiveDate, postpone: PostponeInput) -> Self {
        TransitionMetadata {
            start_date: Some(start_date),
            postpone: Some(postpone),
            ..Default::default()
        }
    }

    pub fn delegate(
        target: impl Into<String>,
        follow_up_date: NaiveDate,
        postpone: PostponeInput,
    ) -> Self {
        TransitionMetadata {
            delegate_target: Some(target.into()),
            follow_up_date: Some(follow_up_date),
            postpone: Some(postpone),
            ..Default::default()
        }
    }

    pub fn resurfaced() -> Self {
        TransitionMetadata {
            origin: TransitionOrigin::Scheduler,
            ..Default::default()
        }
    }
}

/// Result of a validated transition, ready to be persisted.
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    pub task: Task,
    pub postpone: Option<PostponeRecord>,
    /// The task's outgoing blocker role must be dropped (completion).
    pub release_dependents: bool,
}

/// Validate and apply `target` to a copy of `task`.
pub fn plan_transition(
    task: &Task,
    target: TaskState,
    meta: &TransitionMetadata,
    now: DateTime<Utc>,
) -> Result<TransitionPlan> {
    // The scheduler only ever promotes parked tasks, never trashed or finished ones.
    let origin_allowed = meta.origin == TransitionOrigin::Manual || task.state.is_dormant();
    if !origin_allowed || !task.state.can_transition_to(&target) {
        return Err(CoreError::InvalidTransition(TaskTransitionError {
            task_id: task.id,
            from: task.state,
            to: target,
        }));
    }

    let mut next = task.clone();
    let mut postpone = None;

    // Leaving a state clears the fields that only exist in it.
    match task.state {
        TaskState::Deferred => next.start_date = None,
        TaskState::Delegated => {
            next.delegate_target = None;
            next.follow_up_date = None;
        }
        TaskState::Completed if target == TaskState::Active => next.completed_at = None,
        _ => {}
    }

    match target {
        TaskState::Deferred => {
            let start = meta.start_date.ok_or(ValidationError::MissingField {
                field: "start_date",
                operation: "defer",
            })?;
            let input = require_postpone(meta, "defer")?;
            next.start_date = Some(start);
            postpone = Some(postpone_record(
                task,
                input,
                format!("deferred until {start}"),
                now,
            ));
        }
        TaskState::Delegated => {
            let delegate = meta
                .delegate_target
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or(ValidationError::MissingField {
                    field: "delegate_target",
                    operation: "delegate",
                })?;
            let follow_up = meta.follow_up_date.ok_or(ValidationError::MissingField {
                field: "follow_up_date",
                operation: "delegate",
            })?;
            let input = require_postpone(meta, "delegate")?;
            next.delegate_target = Some(delegate.to_string());
            next.follow_up_date = Some(follow_up);
            postpone = Some(postpone_record(
                task,
                input,
                format!("delegated to {delegate}, follow up {follow_up}"),
                now,
            ));
        }
        TaskState::Completed => next.completed_at = Some(now),
        TaskState::Active => {
            if meta.origin == TransitionOrigin::Scheduler {
                next.last_resurfaced_at = Some(now);
                next.resurface_count += 1;
            }
        }
        TaskState::SomedayMaybe | TaskState::Trash => {}
    }

    next.state = target;
    next.updated_at = now;

    Ok(TransitionPlan {
        task: next,
        postpone,
        release_dependents: target == TaskState::Completed,
    })
}

fn require_postpone<'a>(
    meta: &'a TransitionMetadata,
    operation: &'static str,
) -> Result<&'a PostponeInput, ValidationError> {
    meta.postpone.as_ref().ok_or(ValidationError::MissingField {
        field: "postpone_reason",
        operation,
    })
}

fn postpone_record(
    task: &Task,
    input: &PostponeInput,
    default_action: String,
    now: DateTime<Utc>,
) -> PostponeRecord {
    PostponeRecord {
        task_id: task.id,
        reason_type: input.reason_type,
        notes: input.notes.clone(),
        action_taken: input.action_taken.clone().unwrap_or(default_action),
        recorded_at: now,
    }
}
