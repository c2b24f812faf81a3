//! Task model and lifecycle state table.
//!
//! A task moves between six states:
//!
//!   Active ──> Deferred ─────┐
//!     │  ──> Delegated ──────┤
//!     │  ──> SomedayMaybe ───┼──> Active  (manual restore / resurfacing)
//!     │  ──> Trash ──────────┘
//!     └────> Completed ──> Active (uncomplete) | Trash
//!
//! Every non-Trash state may also move to Trash (soft delete).

pub mod lifecycle;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Integer task identifier assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .trim_start_matches('#')
            .parse::<i64>()
            .map(TaskId)
            .map_err(|_| ValidationError::InvalidValue {
                field: "task_id".into(),
                message: format!("'{s}' is not a task id"),
            })
    }
}

/// Coarse user-assigned priority bounding a task's effective priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PriorityTier {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl PriorityTier {
    /// Lower edge of this tier's effective-priority band.
    pub fn band_floor(self) -> f64 {
        f64::from(u8::from(self) - 1)
    }
}

impl TryFrom<u8> for PriorityTier {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PriorityTier::Low),
            2 => Ok(PriorityTier::Medium),
            3 => Ok(PriorityTier::High),
            other => Err(ValidationError::InvalidValue {
                field: "tier".into(),
                message: format!("{other} is not in 1..=3"),
            }),
        }
    }
}

impl From<PriorityTier> for u8 {
    fn from(tier: PriorityTier) -> u8 {
        tier as u8
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Active,
    Deferred,
    Delegated,
    SomedayMaybe,
    Completed,
    Trash,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        TaskState::Active,
        TaskState::Deferred,
        TaskState::Delegated,
        TaskState::SomedayMaybe,
        TaskState::Completed,
        TaskState::Trash,
    ];

    /// Check if a transition is in the allowed table.
    pub fn can_transition_to(&self, to: &TaskState) -> bool {
        self.valid_transitions().contains(to)
    }

    /// Get all valid next states from the current state.
    pub fn valid_transitions(&self) -> &'static [TaskState] {
        match self {
            TaskState::Active => &[
                TaskState::Deferred,
                TaskState::Delegated,
                TaskState::SomedayMaybe,
                TaskState::Completed,
                TaskState::Trash,
            ],
            TaskState::Deferred | TaskState::Delegated | TaskState::SomedayMaybe => {
                &[TaskState::Active, TaskState::Trash]
            }
            TaskState::Completed => &[TaskState::Active, TaskState::Trash],
            TaskState::Trash => &[TaskState::Active],
        }
    }

    /// Dormant states are the ones the resurfacing scheduler may promote.
    pub fn is_dormant(&self) -> bool {
        matches!(
            self,
            TaskState::Deferred | TaskState::Delegated | TaskState::SomedayMaybe
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Active => "active",
            TaskState::Deferred => "deferred",
            TaskState::Delegated => "delegated",
            TaskState::SomedayMaybe => "someday_maybe",
            TaskState::Completed => "completed",
            TaskState::Trash => "trash",
        }
    }
}

impl Default for TaskState {
    fn default() -> Self {
        TaskState::Active
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "active" => Ok(TaskState::Active),
            "deferred" => Ok(TaskState::Deferred),
            "delegated" => Ok(TaskState::Delegated),
            "someday_maybe" | "someday" => Ok(TaskState::SomedayMaybe),
            "completed" | "done" => Ok(TaskState::Completed),
            "trash" => Ok(TaskState::Trash),
            _ => Err(ValidationError::InvalidValue {
                field: "state".into(),
                message: format!("unknown state '{s}'"),
            }),
        }
    }
}

/// A unit of work the user may act on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub tier: PriorityTier,
    /// Comparison rating refining order within the tier.
    pub rating: f64,
    /// Number of comparisons this rating has absorbed since the last reset.
    pub comparison_count: u32,
    pub due_date: Option<NaiveDate>,
    pub state: TaskState,
    /// Set iff Deferred.
    pub start_date: Option<NaiveDate>,
    /// Set iff Delegated.
    pub delegate_target: Option<String>,
    /// Set iff Delegated.
    pub follow_up_date: Option<NaiveDate>,
    pub context_id: Option<String>,
    #[serde(default)]
    pub project_tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_resurfaced_at: Option<DateTime<Utc>>,
    pub resurface_count: u32,
    /// Bumped by the store on every committed update.
    pub revision: u64,
}

/// Input for creating a task. Tasks start Active, or Deferred with a start date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub tier: PriorityTier,
    pub due_date: Option<NaiveDate>,
    pub context_id: Option<String>,
    #[serde(default)]
    pub project_tags: BTreeSet<String>,
    /// Present iff the task starts Deferred.
    pub start_date: Option<NaiveDate>,
    /// Reason logged when the task starts Deferred.
    pub postpone: Option<PostponeInput>,
}

impl NewTask {
    pub fn new(title: impl Into<String>, tier: PriorityTier) -> Self {
        NewTask {
            title: title.into(),
            tier,
            due_date: None,
            context_id: None,
            project_tags: BTreeSet::new(),
            start_date: None,
            postpone: None,
        }
    }

    pub fn due(mut self, date: NaiveDate) -> Self {
        self.due_date = Some(date);
        self
    }

    pub fn deferred_until(mut self, date: NaiveDate) -> Self {
        self.start_date = Some(date);
        self
    }

    pub fn in_context(mut self, context: impl Into<String>) -> Self {
        self.context_id = Some(context.into());
        self
    }

    /// Initial state implied by the input.
    pub fn initial_state(&self) -> TaskState {
        if self.start_date.is_some() {
            TaskState::Deferred
        } else {
            TaskState::Active
        }
    }
}

/// Why a task was pushed out of Active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonType {
    Blocker,
    NoTime,
    LowEnergy,
    WaitingOnOthers,
    Unclear,
    Other,
}

impl ReasonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonType::Blocker => "blocker",
            ReasonType::NoTime => "no_time",
            ReasonType::LowEnergy => "low_energy",
            ReasonType::WaitingOnOthers => "waiting_on_others",
            ReasonType::Unclear => "unclear",
            ReasonType::Other => "other",
        }
    }
}

impl fmt::Display for ReasonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "blocker" => Ok(ReasonType::Blocker),
            "no_time" => Ok(ReasonType::NoTime),
            "low_energy" => Ok(ReasonType::LowEnergy),
            "waiting_on_others" | "waiting" => Ok(ReasonType::WaitingOnOthers),
            "unclear" => Ok(ReasonType::Unclear),
            "other" => Ok(ReasonType::Other),
            _ => Err(ValidationError::InvalidValue {
                field: "reason_type".into(),
                message: format!("unknown reason '{s}'"),
            }),
        }
    }
}

/// Caller-supplied part of a postpone record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostponeInput {
    pub reason_type: ReasonType,
    pub notes: Option<String>,
    /// Free-form description of what was done; derived from the transition when absent.
    pub action_taken: Option<String>,
}

impl PostponeInput {
    pub fn new(reason_type: ReasonType) -> Self {
        PostponeInput {
            reason_type,
            notes: None,
            action_taken: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Immutable log of one deferral or delegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostponeRecord {
    pub task_id: TaskId,
    pub reason_type: ReasonType,
    pub notes: Option<String>,
    pub action_taken: String,
    pub recorded_at: DateTime<Utc>,
}

/// Immutable log of one resolved comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub winner_id: TaskId,
    pub loser_id: TaskId,
    pub winner_rating_before: f64,
    pub winner_rating_after: f64,
    pub loser_rating_before: f64,
    pub loser_rating_after: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Error returned when an invalid state transition is attempted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskTransitionError {
    pub task_id: TaskId,
    pub from: TaskState,
    pub to: TaskState,
}

impl std::fmt::Display for TaskTransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid state transition for task {}: {} → {}",
            self.task_id, self.from, self.to
        )
    }
}

impl std::error::Error for TaskTransitionError {}
