//! The persistence seam the engine talks to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::DependencyEdge;
use crate::task::{ComparisonRecord, NewTask, PostponeRecord, Task, TaskId, TaskState};

/// Last advisory alert raised for a task by postponement analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterventionEntry {
    pub task_id: TaskId,
    pub alerted_at: DateTime<Utc>,
    pub postpone_count: usize,
}

/// Task persistence.
///
/// `update` is revision-checked: it succeeds only if the stored revision
/// equals `task.revision`, and returns the task with the bumped revision.
/// A mismatch is a `CoreError::ConcurrencyConflict`.
pub trait TaskStore {
    fn get_by_id(&self, id: TaskId) -> Result<Option<Task>>;
    fn get_by_state(&self, state: TaskState) -> Result<Vec<Task>>;
    fn list_all(&self) -> Result<Vec<Task>>;
    fn create(&self, draft: &NewTask, initial_rating: f64, now: DateTime<Utc>) -> Result<Task>;
    fn update(&self, task: &Task) -> Result<Task>;

    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;

    fn load_edges(&self) -> Result<Vec<DependencyEdge>>;
    fn insert_edge(&self, edge: DependencyEdge, now: DateTime<Utc>) -> Result<()>;
    /// Returns whether a row was removed.
    fn delete_edge(&self, edge: DependencyEdge) -> Result<bool>;
    /// Delete every edge where `blocking` is the blocker; returns the former dependents.
    fn delete_edges_blocked_by(&self, blocking: TaskId) -> Result<Vec<TaskId>>;

    fn append_postpone(&self, record: &PostponeRecord) -> Result<()>;
    /// Oldest first.
    fn postpone_history(
        &self,
        task: Option<TaskId>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PostponeRecord>>;
    fn append_comparison(&self, record: &ComparisonRecord) -> Result<()>;
    /// Oldest first.
    fn comparison_history(&self, task: Option<TaskId>) -> Result<Vec<ComparisonRecord>>;

    fn last_intervention(&self, task: TaskId) -> Result<Option<InterventionEntry>>;
    fn record_intervention(&self, entry: &InterventionEntry) -> Result<()>;

    fn get_kv(&self, key: &str) -> Result<Option<String>>;
    fn set_kv(&self, key: &str, value: &str) -> Result<()>;
}

/// Run `f` between begin and commit, rolling back on any error.
pub fn with_transaction<S, T, F>(store: &S, f: F) -> Result<T>
where
    S: TaskStore + ?Sized,
    F: FnOnce(&S) -> Result<T>,
{
    store.begin()?;
    match f(store).and_then(|value| store.commit().map(|()| value)) {
        Ok(value) => Ok(value),
        Err(err) => {
            if let Err(rollback_err) = store.rollback() {
                tracing::error!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
