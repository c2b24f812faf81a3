//! The engine: the single entry point UI collaborators and the resurfacing
//! scheduler call into.
//!
//! Every mutation runs in one store transaction. Writes are
//! revision-checked; a `ConcurrencyConflict` from a racing writer is retried
//! once against fresh state and then surfaced. Locks are always taken in the
//! order workflow, then store.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::comparison::{ComparisonWorkflow, Evaluation, WorkflowSnapshot, WorkflowState};
use crate::error::{CoreError, Result, ValidationError};
use crate::events::Notifier;
use crate::graph::{DependencyEdge, DependencyGraph};
use crate::importance::{rank, ScoredTask};
use crate::rating::{apply_comparison, reset_rating};
use crate::resurfacing::{jobs, JobDescriptor, JobName, JobOutcome, JobReport, JobRunState};
use crate::storage::{with_transaction, Config, TaskDb, TaskStore};
use crate::task::lifecycle::{plan_transition, TransitionMetadata};
use crate::task::{
    ComparisonRecord, NewTask, PostponeInput, PostponeRecord, PriorityTier, ReasonType, Task,
    TaskId, TaskState,
};

const WORKFLOW_KEY: &str = "comparison_workflow";

/// Partial edit of the descriptive fields of a task.
///
/// `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub due_date: Option<Option<chrono::NaiveDate>>,
    pub context_id: Option<Option<String>>,
    #[serde(default)]
    pub add_tags: Vec<String>,
    #[serde(default)]
    pub remove_tags: Vec<String>,
}

/// Warning raised when a rating is discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingResetNotice {
    pub task_id: TaskId,
    pub previous_rating: f64,
    pub previous_comparison_count: u32,
    pub new_rating: f64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierChange {
    pub task: Task,
    /// `None` when the tier was already the requested one.
    pub reset: Option<RatingResetNotice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionResult {
    pub task: Task,
    pub postpone: Option<PostponeRecord>,
    /// Dependents that became actionable because this task completed.
    pub unblocked: Vec<TaskId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonOutcome {
    pub record: ComparisonRecord,
    /// Rounds spent on the current tie episode, including this one.
    pub round: u32,
    pub state: WorkflowState,
    /// Next pair to compare if the tie persists.
    pub next: Option<(TaskId, TaskId)>,
}

/// What the user should do now.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NextAction {
    Work { task: ScoredTask },
    Compare { a: Task, b: Task },
    Nothing,
}

/// Result of promoting one dormant task from a scheduler job.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Resurface {
    Activated(Task),
    /// Still has incomplete blockers.
    Blocked(Vec<TaskId>),
    /// Gone, or no longer in the expected state.
    Skipped,
}

pub struct Engine {
    store: Mutex<Box<dyn TaskStore + Send>>,
    workflow: Mutex<ComparisonWorkflow>,
    notifier: Arc<dyn Notifier>,
    config: Config,
}

impl Engine {
    /// Wrap `store`, restoring any comparison session it holds.
    pub fn new(
        store: Box<dyn TaskStore + Send>,
        notifier: Arc<dyn Notifier>,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        let snapshot: WorkflowSnapshot = match store.get_kv(WORKFLOW_KEY)? {
            Some(json) => serde_json::from_str(&json)?,
            None => WorkflowSnapshot::default(),
        };
        let workflow = ComparisonWorkflow::restore(snapshot, &config.ranking);
        Ok(Engine {
            store: Mutex::new(store),
            workflow: Mutex::new(workflow),
            notifier,
            config,
        })
    }

    /// Open the database and config under the data directory.
    pub fn open_default(notifier: Arc<dyn Notifier>) -> Result<Self> {
        let store = TaskDb::open()?;
        let config = Config::load()?;
        Self::new(Box::new(store), notifier, config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn with_store<T>(&self, f: impl FnOnce(&dyn TaskStore) -> Result<T>) -> Result<T> {
        let guard = self.store.lock();
        f(&**guard)
    }

    /// Run `f` in a transaction, retrying once on a revision conflict.
    pub(crate) fn mutate<T>(
        &self,
        op: &'static str,
        f: impl Fn(&dyn TaskStore) -> Result<T>,
    ) -> Result<T> {
        let attempt = || self.with_store(|store| with_transaction(store, |tx| f(tx)));
        match attempt() {
            Err(err) if err.is_conflict() => {
                warn!(op, error = %err, "write conflict, retrying against fresh state");
                attempt()
            }
            other => other,
        }
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    pub fn create_task(&self, draft: NewTask) -> Result<Task> {
        self.create_task_at(draft, Utc::now())
    }

    pub fn create_task_at(&self, mut draft: NewTask, now: DateTime<Utc>) -> Result<Task> {
        draft.title = validate_title(&draft.title)?;
        draft.project_tags = normalize_tags(draft.project_tags);
        draft.context_id = draft.context_id.and_then(non_empty);

        let postpone = draft.start_date.map(|start| {
            let input = draft
                .postpone
                .clone()
                .unwrap_or_else(|| PostponeInput::new(ReasonType::Other));
            (input, format!("created deferred until {start}"))
        });

        let task = self.mutate("create_task", |store| {
            let task = store.create(&draft, self.config.rating.default_rating, now)?;
            if let Some((input, default_action)) = &postpone {
                store.append_postpone(&PostponeRecord {
                    task_id: task.id,
                    reason_type: input.reason_type,
                    notes: input.notes.clone(),
                    action_taken: input
                        .action_taken
                        .clone()
                        .unwrap_or_else(|| default_action.clone()),
                    recorded_at: now,
                })?;
            }
            Ok(task)
        })?;
        info!(task_id = %task.id, state = %task.state, tier = ?task.tier, "task created");
        Ok(task)
    }

    pub fn get_task(&self, id: TaskId) -> Result<Task> {
        self.with_store(|store| store.get_by_id(id)?.ok_or(CoreError::NotFound(id)))
    }

    /// All tasks, or those in `state`.
    pub fn list_tasks(&self, state: Option<TaskState>) -> Result<Vec<Task>> {
        self.with_store(|store| match state {
            Some(state) => store.get_by_state(state),
            None => store.list_all(),
        })
    }

    pub fn update_details(&self, id: TaskId, patch: TaskPatch) -> Result<Task> {
        self.update_details_at(id, patch, Utc::now())
    }

    pub fn update_details_at(
        &self,
        id: TaskId,
        patch: TaskPatch,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let title = patch.title.as_deref().map(validate_title).transpose()?;
        let add = normalize_tags(patch.add_tags.iter().cloned().collect());
        let remove = normalize_tags(patch.remove_tags.iter().cloned().collect());

        let task = self.mutate("update_details", |store| {
            let mut task = store.get_by_id(id)?.ok_or(CoreError::NotFound(id))?;
            if let Some(title) = &title {
                task.title = title.clone();
            }
            if let Some(due) = patch.due_date {
                task.due_date = due;
            }
            if let Some(context) = &patch.context_id {
                task.context_id = context.clone().and_then(non_empty);
            }
            task.project_tags.extend(add.iter().cloned());
            task.project_tags.retain(|tag| !remove.contains(tag));
            task.updated_at = now;
            store.update(&task)
        })?;
        debug!(task_id = %id, "task details updated");
        Ok(task)
    }

    /// Change the tier. A real change discards the rating and returns a warning.
    pub fn set_priority_tier(&self, id: TaskId, tier: PriorityTier) -> Result<TierChange> {
        self.set_priority_tier_at(id, tier, Utc::now())
    }

    pub fn set_priority_tier_at(
        &self,
        id: TaskId,
        tier: PriorityTier,
        now: DateTime<Utc>,
    ) -> Result<TierChange> {
        let change = self.mutate("set_priority_tier", |store| {
            let mut task = store.get_by_id(id)?.ok_or(CoreError::NotFound(id))?;
            if task.tier == tier {
                return Ok(TierChange { task, reset: None });
            }
            let from = task.tier;
            let (previous_rating, previous_count) = (task.rating, task.comparison_count);
            task.tier = tier;
            reset_rating(&mut task, &self.config.rating);
            task.updated_at = now;
            let task = store.update(&task)?;
            let reset = self.reset_notice(
                &task,
                previous_rating,
                previous_count,
                format!("tier changed from {from:?} to {tier:?}"),
            );
            Ok(TierChange {
                task,
                reset: Some(reset),
            })
        })?;
        if let Some(reset) = &change.reset {
            warn!(task_id = %id, "{}", reset.message);
        }
        Ok(change)
    }

    /// Put the rating back to the default and forget the comparison count.
    pub fn reset_rating(&self, id: TaskId) -> Result<RatingResetNotice> {
        self.reset_rating_at(id, Utc::now())
    }

    pub fn reset_rating_at(&self, id: TaskId, now: DateTime<Utc>) -> Result<RatingResetNotice> {
        let notice = self.mutate("reset_rating", |store| {
            let mut task = store.get_by_id(id)?.ok_or(CoreError::NotFound(id))?;
            let (previous_rating, previous_count) = (task.rating, task.comparison_count);
            reset_rating(&mut task, &self.config.rating);
            task.updated_at = now;
            let task = store.update(&task)?;
            Ok(self.reset_notice(&task, previous_rating, previous_count, "manual reset".into()))
        })?;
        warn!(task_id = %id, "{}", notice.message);
        Ok(notice)
    }

    fn reset_notice(
        &self,
        task: &Task,
        previous_rating: f64,
        previous_comparison_count: u32,
        cause: String,
    ) -> RatingResetNotice {
        RatingResetNotice {
            task_id: task.id,
            previous_rating,
            previous_comparison_count,
            new_rating: task.rating,
            message: format!(
                "rating of task {} reset to {:.0} ({cause}; was {previous_rating:.1} after {previous_comparison_count} comparisons)",
                task.id, task.rating
            ),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn transition_task(
        &self,
        id: TaskId,
        target: TaskState,
        meta: TransitionMetadata,
    ) -> Result<TransitionResult> {
        self.transition_task_at(id, target, meta, Utc::now())
    }

    pub fn transition_task_at(
        &self,
        id: TaskId,
        target: TaskState,
        meta: TransitionMetadata,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult> {
        let result = self.mutate("transition_task", |store| {
            let task = store.get_by_id(id)?.ok_or(CoreError::NotFound(id))?;
            let plan = plan_transition(&task, target, &meta, now)?;
            let stored = store.update(&plan.task)?;
            if let Some(record) = &plan.postpone {
                store.append_postpone(record)?;
            }
            let unblocked = if plan.release_dependents {
                let released = store.delete_edges_blocked_by(id)?;
                newly_unblocked(store, released)?
            } else {
                Vec::new()
            };
            Ok(TransitionResult {
                task: stored,
                postpone: plan.postpone,
                unblocked,
            })
        })?;
        info!(
            task_id = %id,
            state = %result.task.state,
            unblocked = result.unblocked.len(),
            "task transitioned"
        );
        Ok(result)
    }

    /// Promote a dormant task to Active on behalf of a scheduler job.
    pub(crate) fn resurface(
        &self,
        id: TaskId,
        expected: TaskState,
        require_unblocked: bool,
        now: DateTime<Utc>,
    ) -> Result<Resurface> {
        self.mutate("resurface", |store| {
            let Some(task) = store.get_by_id(id)? else {
                return Ok(Resurface::Skipped);
            };
            if task.state != expected {
                return Ok(Resurface::Skipped);
            }
            if require_unblocked {
                let blockers = incomplete_blockers(store, id)?;
                if !blockers.is_empty() {
                    return Ok(Resurface::Blocked(blockers));
                }
            }
            let plan = plan_transition(&task, TaskState::Active, &TransitionMetadata::resurfaced(), now)?;
            Ok(Resurface::Activated(store.update(&plan.task)?))
        })
    }

    // =========================================================================
    // Dependencies
    // =========================================================================

    /// `blocked` waits on `blocking`. Returns false if the edge already existed.
    pub fn add_dependency(&self, blocked: TaskId, blocking: TaskId) -> Result<bool> {
        self.add_dependency_at(blocked, blocking, Utc::now())
    }

    pub fn add_dependency_at(
        &self,
        blocked: TaskId,
        blocking: TaskId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let added = self.mutate("add_dependency", |store| {
            let mut graph = DependencyGraph::from_edges(store.load_edges()?)?;
            if blocked != blocking {
                for id in [blocked, blocking] {
                    store.get_by_id(id)?.ok_or(CoreError::NotFound(id))?;
                }
            }
            let added = graph.add_edge(blocked, blocking)?;
            if added {
                store.insert_edge(DependencyEdge::new(blocked, blocking), now)?;
            }
            Ok(added)
        })?;
        if added {
            info!(%blocked, %blocking, "dependency added");
        } else {
            debug!(%blocked, %blocking, "dependency already present");
        }
        Ok(added)
    }

    /// Idempotent; returns whether an edge was removed.
    pub fn remove_dependency(&self, blocked: TaskId, blocking: TaskId) -> Result<bool> {
        let removed = self.mutate("remove_dependency", |store| {
            store.delete_edge(DependencyEdge::new(blocked, blocking))
        })?;
        if removed {
            info!(%blocked, %blocking, "dependency removed");
        }
        Ok(removed)
    }

    /// Transitive blockers of `id`, nearest first.
    pub fn blocking_chain(&self, id: TaskId) -> Result<Vec<Task>> {
        self.with_store(|store| {
            store.get_by_id(id)?.ok_or(CoreError::NotFound(id))?;
            let graph = DependencyGraph::from_edges(store.load_edges()?)?;
            graph
                .blocking_chain(id)
                .into_iter()
                .filter_map(|blocker| store.get_by_id(blocker).transpose())
                .collect()
        })
    }

    pub fn is_blocked(&self, id: TaskId) -> Result<bool> {
        self.with_store(|store| Ok(!incomplete_blockers(store, id)?.is_empty()))
    }

    // =========================================================================
    // Ranking and comparison
    // =========================================================================

    /// Active, unblocked tasks by importance, descending.
    pub fn get_ranked_actionable_tasks(&self) -> Result<Vec<ScoredTask>> {
        self.rank_at(None, Utc::now())
    }

    pub fn get_ranked_in_context(&self, context: &str) -> Result<Vec<ScoredTask>> {
        self.rank_at(Some(context), Utc::now())
    }

    /// Rank the actionable pool as of `now`, optionally limited to one context.
    ///
    /// Only the unfiltered ranking feeds the tie workflow.
    pub fn rank_at(&self, context: Option<&str>, now: DateTime<Utc>) -> Result<Vec<ScoredTask>> {
        let mut pool = self.with_store(actionable_pool)?;
        if let Some(context) = context {
            pool.retain(|task| task.context_id.as_deref() == Some(context));
        }
        let mut ranked = rank(pool, now.date_naive(), &self.config.rating, &self.config.ranking);

        // A resurfacing job may have changed the pool while we were scoring.
        let still_actionable: BTreeSet<TaskId> = self
            .with_store(actionable_pool)?
            .into_iter()
            .map(|task| task.id)
            .collect();
        let before = ranked.len();
        ranked.retain(|scored| still_actionable.contains(&scored.task.id));
        if ranked.len() != before {
            debug!(dropped = before - ranked.len(), "tasks left the pool during ranking");
        }

        if context.is_none() {
            self.evaluate_ties(&mut ranked)?;
        }
        Ok(ranked)
    }

    fn evaluate_ties(&self, ranked: &mut [ScoredTask]) -> Result<Evaluation> {
        let scores: Vec<(TaskId, f64)> = ranked
            .iter()
            .map(|scored| (scored.task.id, scored.importance))
            .collect();
        let mut workflow = self.workflow.lock();
        let before = workflow.snapshot().clone();
        let evaluation = workflow.evaluate(&scores);
        if let Evaluation::BrokenById { order } = &evaluation {
            ranked[..order.len()].sort_by_key(|scored| scored.task.id);
        }
        if let Evaluation::Prompt { a, b, round } = &evaluation {
            info!(%a, %b, round, "tie detected, comparison requested");
        }
        if *workflow.snapshot() != before {
            self.persist_workflow(workflow.snapshot())?;
        }
        Ok(evaluation)
    }

    fn persist_workflow(&self, snapshot: &WorkflowSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)?;
        self.with_store(|store| store.set_kv(WORKFLOW_KEY, &json))
    }

    pub fn comparison_state(&self) -> WorkflowState {
        self.workflow.lock().state()
    }

    /// The pair awaiting a comparison, after re-evaluating the ranking.
    pub fn get_pending_comparison(&self) -> Result<Option<(Task, Task)>> {
        self.get_pending_comparison_at(Utc::now())
    }

    pub fn get_pending_comparison_at(&self, now: DateTime<Utc>) -> Result<Option<(Task, Task)>> {
        self.rank_at(None, now)?;
        let pair = self.workflow.lock().pending_pair();
        match pair {
            Some((a, b)) => Ok(Some((self.get_task(a)?, self.get_task(b)?))),
            None => Ok(None),
        }
    }

    pub fn submit_comparison_result(
        &self,
        winner: TaskId,
        loser: TaskId,
    ) -> Result<ComparisonOutcome> {
        self.submit_comparison_result_at(winner, loser, Utc::now())
    }

    /// Apply the user's pick to both ratings, log it, and re-rank.
    ///
    /// Both rating updates and the history record commit together or not at all.
    pub fn submit_comparison_result_at(
        &self,
        winner: TaskId,
        loser: TaskId,
        now: DateTime<Utc>,
    ) -> Result<ComparisonOutcome> {
        let mut workflow = self.workflow.lock();
        workflow.expect_pair(winner, loser)?;

        let record = self.mutate("submit_comparison", |store| {
            let mut w = store.get_by_id(winner)?.ok_or(CoreError::NotFound(winner))?;
            let mut l = store.get_by_id(loser)?.ok_or(CoreError::NotFound(loser))?;
            let update = apply_comparison(&mut w, &mut l, &self.config.rating);
            w.updated_at = now;
            l.updated_at = now;
            store.update(&w)?;
            store.update(&l)?;
            let record = ComparisonRecord {
                winner_id: winner,
                loser_id: loser,
                winner_rating_before: update.winner_before,
                winner_rating_after: update.winner_after,
                loser_rating_before: update.loser_before,
                loser_rating_after: update.loser_after,
                recorded_at: now,
            };
            store.append_comparison(&record)?;
            Ok(record)
        })?;

        let round = workflow.record_result(winner, loser)?;
        self.persist_workflow(workflow.snapshot())?;
        drop(workflow);
        info!(
            %winner,
            %loser,
            round,
            winner_rating = record.winner_rating_after,
            loser_rating = record.loser_rating_after,
            "comparison recorded"
        );

        self.rank_at(None, now)?;
        let workflow = self.workflow.lock();
        Ok(ComparisonOutcome {
            record,
            round,
            state: workflow.state(),
            next: workflow.pending_pair(),
        })
    }

    /// The top actionable task, or the comparison that must come first.
    pub fn next_action(&self) -> Result<NextAction> {
        self.next_action_at(Utc::now())
    }

    pub fn next_action_at(&self, now: DateTime<Utc>) -> Result<NextAction> {
        let ranked = self.rank_at(None, now)?;
        let pair = self.workflow.lock().pending_pair();
        if let Some((a, b)) = pair {
            return Ok(NextAction::Compare {
                a: self.get_task(a)?,
                b: self.get_task(b)?,
            });
        }
        Ok(match ranked.into_iter().next() {
            Some(task) => NextAction::Work { task },
            None => NextAction::Nothing,
        })
    }

    // =========================================================================
    // History
    // =========================================================================

    pub fn postpone_history(
        &self,
        task: Option<TaskId>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PostponeRecord>> {
        self.with_store(|store| store.postpone_history(task, since))
    }

    pub fn comparison_history(&self, task: Option<TaskId>) -> Result<Vec<ComparisonRecord>> {
        self.with_store(|store| store.comparison_history(task))
    }

    // =========================================================================
    // Resurfacing
    // =========================================================================

    pub fn job_descriptor(&self, job: JobName) -> Result<JobDescriptor> {
        let state: JobRunState = self
            .with_store(|store| store.get_kv(&job.state_key()))?
            .map(|json| serde_json::from_str(&json))
            .transpose()?
            .unwrap_or_default();
        let mut descriptor = JobDescriptor::new(job, &self.config.resurfacing);
        descriptor.state = state;
        Ok(descriptor)
    }

    pub fn job_descriptors(&self) -> Result<Vec<JobDescriptor>> {
        JobName::ALL
            .into_iter()
            .map(|job| self.job_descriptor(job))
            .collect()
    }

    /// Run one job now, regardless of its schedule.
    pub fn run_resurfacing_job(&self, job: JobName) -> Result<JobReport> {
        self.run_resurfacing_job_at(job, Utc::now())
    }

    /// Run `job` as of `now`, emit its event, and persist its run state.
    ///
    /// A run with per-task failures still emits what it did, but returns
    /// `SchedulerJob` and leaves the job due so the next tick retries.
    pub fn run_resurfacing_job_at(&self, job: JobName, now: DateTime<Utc>) -> Result<JobReport> {
        let mut descriptor = self.job_descriptor(job)?;
        let result = jobs::run(self, job, now);
        let report = match result {
            Ok(report) => report,
            Err(err) => {
                descriptor.mark_run(
                    now,
                    JobOutcome::Failed {
                        message: err.to_string(),
                    },
                );
                self.save_job_state(&descriptor);
                warn!(%job, error = %err, "resurfacing job failed");
                return Err(CoreError::SchedulerJob {
                    job: job.to_string(),
                    message: err.to_string(),
                });
            }
        };

        if let Some(event) = &report.event {
            self.notifier.emit(event.clone());
        }
        let outcome = report.outcome();
        descriptor.mark_run(now, outcome.clone());
        self.save_job_state(&descriptor);

        match outcome {
            JobOutcome::Failed { message } => {
                warn!(%job, %message, changed = report.changed.len(), "resurfacing job partially failed");
                Err(CoreError::SchedulerJob {
                    job: job.to_string(),
                    message,
                })
            }
            JobOutcome::Succeeded { changed, skipped } => {
                info!(%job, changed, skipped, "resurfacing job finished");
                Ok(report)
            }
        }
    }

    /// Run `job` only if its schedule says it is due.
    pub fn run_job_if_due(&self, job: JobName, now: DateTime<Utc>) -> Result<Option<JobReport>> {
        if !self.job_descriptor(job)?.is_due(now) {
            return Ok(None);
        }
        self.run_resurfacing_job_at(job, now).map(Some)
    }

    fn save_job_state(&self, descriptor: &JobDescriptor) {
        let saved = serde_json::to_string(&descriptor.state)
            .map_err(CoreError::from)
            .and_then(|json| {
                self.with_store(|store| store.set_kv(&descriptor.name.state_key(), &json))
            });
        if let Err(err) = saved {
            warn!(job = %descriptor.name, error = %err, "failed to persist job run state");
        }
    }
}

/// Active tasks with no incomplete blocker.
pub(crate) fn actionable_pool(store: &dyn TaskStore) -> Result<Vec<Task>> {
    let tasks = store.list_all()?;
    let graph = DependencyGraph::from_edges(store.load_edges()?)?;
    let states: HashMap<TaskId, TaskState> = tasks.iter().map(|t| (t.id, t.state)).collect();
    Ok(tasks
        .into_iter()
        .filter(|t| t.state == TaskState::Active)
        .filter(|t| !graph.is_blocked(t.id, |b| states.get(&b).copied()))
        .collect())
}

fn incomplete_blockers(store: &dyn TaskStore, id: TaskId) -> Result<Vec<TaskId>> {
    let graph = DependencyGraph::from_edges(store.load_edges()?)?;
    let mut blockers = Vec::new();
    for blocker in graph.blockers_of(id) {
        let state = store.get_by_id(blocker)?.map(|t| t.state);
        if state != Some(TaskState::Completed) {
            blockers.push(blocker);
        }
    }
    Ok(blockers)
}

fn newly_unblocked(store: &dyn TaskStore, released: Vec<TaskId>) -> Result<Vec<TaskId>> {
    let mut unblocked = Vec::new();
    for dependent in released {
        if incomplete_blockers(store, dependent)?.is_empty() {
            unblocked.push(dependent);
        }
    }
    Ok(unblocked)
}

fn validate_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidValue {
            field: "title".into(),
            message: "must not be empty".into(),
        }
        .into());
    }
    Ok(trimmed.to_string())
}

fn normalize_tags(tags: BTreeSet<String>) -> BTreeSet<String> {
    tags.into_iter().filter_map(non_empty).collect()
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingNotifier;
    use crate::storage::store::InterventionEntry;
    use chrono::{Duration, NaiveDate, TimeZone};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        now().date_naive()
    }

    fn engine() -> Engine {
        Engine::new(
            Box::new(TaskDb::open_in_memory().unwrap()),
            Arc::new(CollectingNotifier::new()),
            Config::default(),
        )
        .unwrap()
    }

    fn create(engine: &Engine, title: &str, tier: PriorityTier, due_in: Option<i64>) -> Task {
        let mut draft = NewTask::new(title, tier);
        if let Some(days) = due_in {
            draft = draft.due(today() + Duration::days(days));
        }
        engine.create_task_at(draft, now()).unwrap()
    }

    #[test]
    fn create_rejects_blank_title() {
        let engine = engine();
        let err = engine
            .create_task_at(NewTask::new("   ", PriorityTier::Low), now())
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(engine.list_tasks(None).unwrap().is_empty());
    }

    #[test]
    fn create_deferred_logs_postpone() {
        let engine = engine();
        let draft = NewTask::new("Renew passport", PriorityTier::Medium)
            .deferred_until(today() + Duration::days(3));
        let task = engine.create_task_at(draft, now()).unwrap();
        assert_eq!(task.state, TaskState::Deferred);
        let history = engine.postpone_history(Some(task.id), None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason_type, ReasonType::Other);
        assert!(history[0].action_taken.starts_with("created deferred until"));
    }

    #[test]
    fn ranking_orders_by_urgency() {
        let engine = engine();
        let soon = create(&engine, "soon", PriorityTier::High, Some(0));
        let later = create(&engine, "later", PriorityTier::High, Some(10));
        let ranked = engine.rank_at(None, now()).unwrap();
        assert_eq!(ranked[0].task.id, soon.id);
        assert_eq!(ranked[1].task.id, later.id);
        assert_eq!(engine.comparison_state(), WorkflowState::Idle);
    }

    #[test]
    fn blocked_and_dormant_tasks_are_not_ranked() {
        let engine = engine();
        let blocker = create(&engine, "blocker", PriorityTier::Low, None);
        let blocked = create(&engine, "blocked", PriorityTier::High, None);
        let parked = create(&engine, "parked", PriorityTier::High, None);
        engine.add_dependency_at(blocked.id, blocker.id, now()).unwrap();
        engine
            .transition_task_at(parked.id, TaskState::SomedayMaybe, TransitionMetadata::default(), now())
            .unwrap();

        let ids: Vec<TaskId> = engine
            .rank_at(None, now())
            .unwrap()
            .into_iter()
            .map(|s| s.task.id)
            .collect();
        assert_eq!(ids, vec![blocker.id]);

        let result = engine
            .transition_task_at(blocker.id, TaskState::Completed, TransitionMetadata::default(), now())
            .unwrap();
        assert_eq!(result.unblocked, vec![blocked.id]);
        assert!(!engine.is_blocked(blocked.id).unwrap());
    }

    #[test]
    fn cycle_is_rejected_and_graph_unchanged() {
        let engine = engine();
        let a = create(&engine, "a", PriorityTier::Low, None);
        let b = create(&engine, "b", PriorityTier::Low, None);
        assert!(engine.add_dependency_at(a.id, b.id, now()).unwrap());
        assert!(!engine.add_dependency_at(a.id, b.id, now()).unwrap());
        let err = engine.add_dependency_at(b.id, a.id, now()).unwrap_err();
        assert!(matches!(err, CoreError::Dependency(_)));
        let err = engine.add_dependency_at(a.id, a.id, now()).unwrap_err();
        assert!(matches!(err, CoreError::Dependency(_)));
        assert_eq!(
            engine.blocking_chain(a.id).unwrap().iter().map(|t| t.id).collect::<Vec<_>>(),
            vec![b.id]
        );
        assert!(engine.remove_dependency(a.id, b.id).unwrap());
        assert!(!engine.remove_dependency(a.id, b.id).unwrap());
    }

    #[test]
    fn missing_task_dependency_is_not_found() {
        let engine = engine();
        let a = create(&engine, "a", PriorityTier::Low, None);
        let err = engine.add_dependency_at(a.id, TaskId(999), now()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound(TaskId(999))));
    }

    #[test]
    fn tie_prompts_and_result_breaks_it() {
        let engine = engine();
        let a = create(&engine, "a", PriorityTier::Medium, Some(2));
        let b = create(&engine, "b", PriorityTier::Medium, Some(2));
        let (x, y) = engine.get_pending_comparison_at(now()).unwrap().unwrap();
        assert_eq!((x.id, y.id), (a.id, b.id));

        let outcome = engine.submit_comparison_result_at(b.id, a.id, now()).unwrap();
        assert_eq!(outcome.round, 1);
        assert!((outcome.record.winner_rating_after - 1516.0).abs() < 1e-9);
        assert!((outcome.record.loser_rating_after - 1484.0).abs() < 1e-9);
        assert_eq!(outcome.next, None);

        let ranked = engine.rank_at(None, now()).unwrap();
        assert_eq!(ranked[0].task.id, b.id);
        assert_eq!(engine.comparison_history(None).unwrap().len(), 1);
    }

    #[test]
    fn submit_without_session_changes_nothing() {
        let engine = engine();
        let a = create(&engine, "a", PriorityTier::Medium, None);
        let b = create(&engine, "b", PriorityTier::High, None);
        let err = engine.submit_comparison_result_at(a.id, b.id, now()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::NoPendingComparison)
        ));
        assert_eq!(engine.get_task(a.id).unwrap().rating, 1500.0);
        assert!(engine.comparison_history(None).unwrap().is_empty());
    }

    #[test]
    fn workflow_survives_engine_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nextup.db");
        let open = || {
            Engine::new(
                Box::new(TaskDb::open_at(&path).unwrap()),
                Arc::new(CollectingNotifier::new()),
                Config::default(),
            )
            .unwrap()
        };
        let (a, b) = {
            let engine = open();
            let a = create(&engine, "a", PriorityTier::Low, None);
            let b = create(&engine, "b", PriorityTier::Low, None);
            engine.rank_at(None, now()).unwrap();
            (a, b)
        };
        let engine = open();
        assert!(engine.submit_comparison_result_at(a.id, b.id, now()).is_ok());
    }

    #[test]
    fn tier_change_resets_rating_with_notice() {
        let engine = engine();
        let a = create(&engine, "a", PriorityTier::High, None);
        let b = create(&engine, "b", PriorityTier::High, None);
        engine.rank_at(None, now()).unwrap();
        engine.submit_comparison_result_at(a.id, b.id, now()).unwrap();

        let change = engine.set_priority_tier_at(a.id, PriorityTier::Medium, now()).unwrap();
        let notice = change.reset.unwrap();
        assert!((notice.previous_rating - 1516.0).abs() < 1e-9);
        assert_eq!(notice.previous_comparison_count, 1);
        assert_eq!(change.task.rating, 1500.0);
        assert_eq!(change.task.comparison_count, 0);
        assert_eq!(change.task.tier, PriorityTier::Medium);

        let same = engine.set_priority_tier_at(a.id, PriorityTier::Medium, now()).unwrap();
        assert!(same.reset.is_none());
    }

    #[test]
    fn update_details_applies_patch() {
        let engine = engine();
        let task = create(&engine, "draft", PriorityTier::Low, Some(3));
        let patch = TaskPatch {
            title: Some("  final  ".into()),
            due_date: Some(None),
            context_id: Some(Some("office".into())),
            add_tags: vec!["q3".into(), " ".into()],
            remove_tags: vec![],
        };
        let updated = engine.update_details_at(task.id, patch, now()).unwrap();
        assert_eq!(updated.title, "final");
        assert_eq!(updated.due_date, None);
        assert_eq!(updated.context_id.as_deref(), Some("office"));
        assert_eq!(updated.project_tags.len(), 1);
        assert_eq!(
            engine.get_ranked_in_context("office").unwrap()[0].task.id,
            task.id
        );
        assert!(engine.get_ranked_in_context("home").unwrap().is_empty());
    }

    #[test]
    fn next_action_prefers_pending_comparison() {
        let engine = engine();
        assert!(matches!(engine.next_action_at(now()).unwrap(), NextAction::Nothing));
        let a = create(&engine, "a", PriorityTier::High, None);
        assert!(matches!(
            engine.next_action_at(now()).unwrap(),
            NextAction::Work { task } if task.task.id == a.id
        ));
        create(&engine, "b", PriorityTier::High, None);
        assert!(matches!(
            engine.next_action_at(now()).unwrap(),
            NextAction::Compare { .. }
        ));
    }

    #[test]
    fn pending_pair_dropped_when_higher_task_arrives() {
        let engine = engine();
        let a = create(&engine, "a", PriorityTier::Medium, None);
        let b = create(&engine, "b", PriorityTier::Medium, None);
        assert!(matches!(
            engine.next_action_at(now()).unwrap(),
            NextAction::Compare { a: x, b: y } if (x.id, y.id) == (a.id, b.id)
        ));

        let c = create(&engine, "c", PriorityTier::High, None);
        assert!(matches!(
            engine.next_action_at(now()).unwrap(),
            NextAction::Work { task } if task.task.id == c.id
        ));
        assert_eq!(engine.comparison_state(), WorkflowState::Idle);
        assert!(engine.submit_comparison_result_at(a.id, b.id, now()).is_err());
    }

    #[test]
    fn pending_pair_dropped_when_tier_change_breaks_tie() {
        let engine = engine();
        let a = create(&engine, "a", PriorityTier::Medium, None);
        let b = create(&engine, "b", PriorityTier::Medium, None);
        engine.rank_at(None, now()).unwrap();
        assert!(engine.get_pending_comparison_at(now()).unwrap().is_some());

        engine.set_priority_tier_at(a.id, PriorityTier::Low, now()).unwrap();
        let ranked = engine.rank_at(None, now()).unwrap();
        assert_eq!(ranked[0].task.id, b.id);
        assert!(!matches!(
            engine.comparison_state(),
            WorkflowState::AwaitingComparison { .. }
        ));
        assert!(engine.get_pending_comparison_at(now()).unwrap().is_none());
    }

    #[test]
    fn manual_reset_restores_default_rating() {
        let engine = engine();
        let a = create(&engine, "a", PriorityTier::High, None);
        let b = create(&engine, "b", PriorityTier::High, None);
        engine.rank_at(None, now()).unwrap();
        engine.submit_comparison_result_at(b.id, a.id, now()).unwrap();
        assert_eq!(engine.get_task(b.id).unwrap().comparison_count, 1);

        let notice = engine.reset_rating_at(b.id, now()).unwrap();
        assert_eq!(notice.task_id, b.id);
        assert!((notice.previous_rating - 1516.0).abs() < 1e-9);
        assert_eq!(notice.previous_comparison_count, 1);
        assert_eq!(notice.new_rating, 1500.0);
        assert!(notice.message.contains("manual reset"));

        let task = engine.get_task(b.id).unwrap();
        assert_eq!(task.rating, 1500.0);
        assert_eq!(task.comparison_count, 0);
        assert!(matches!(
            engine.reset_rating_at(TaskId(999), now()),
            Err(CoreError::NotFound(TaskId(999)))
        ));
    }

    /// Delegates to a real database but fails the first `conflicts` updates.
    struct FlakyStore {
        inner: TaskDb,
        conflicts: AtomicU32,
    }

    impl TaskStore for FlakyStore {
        fn get_by_id(&self, id: TaskId) -> Result<Option<Task>> {
            self.inner.get_by_id(id)
        }
        fn get_by_state(&self, state: TaskState) -> Result<Vec<Task>> {
            self.inner.get_by_state(state)
        }
        fn list_all(&self) -> Result<Vec<Task>> {
            self.inner.list_all()
        }
        fn create(&self, draft: &NewTask, initial_rating: f64, now: DateTime<Utc>) -> Result<Task> {
            self.inner.create(draft, initial_rating, now)
        }
        fn update(&self, task: &Task) -> Result<Task> {
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(CoreError::ConcurrencyConflict { task_id: task.id });
            }
            self.inner.update(task)
        }
        fn begin(&self) -> Result<()> {
            self.inner.begin()
        }
        fn commit(&self) -> Result<()> {
            self.inner.commit()
        }
        fn rollback(&self) -> Result<()> {
            self.inner.rollback()
        }
        fn load_edges(&self) -> Result<Vec<DependencyEdge>> {
            self.inner.load_edges()
        }
        fn insert_edge(&self, edge: DependencyEdge, now: DateTime<Utc>) -> Result<()> {
            self.inner.insert_edge(edge, now)
        }
        fn delete_edge(&self, edge: DependencyEdge) -> Result<bool> {
            self.inner.delete_edge(edge)
        }
        fn delete_edges_blocked_by(&self, blocking: TaskId) -> Result<Vec<TaskId>> {
            self.inner.delete_edges_blocked_by(blocking)
        }
        fn append_postpone(&self, record: &PostponeRecord) -> Result<()> {
            self.inner.append_postpone(record)
        }
        fn postpone_history(
            &self,
            task: Option<TaskId>,
            since: Option<DateTime<Utc>>,
        ) -> Result<Vec<PostponeRecord>> {
            self.inner.postpone_history(task, since)
        }
        fn append_comparison(&self, record: &ComparisonRecord) -> Result<()> {
            self.inner.append_comparison(record)
        }
        fn comparison_history(&self, task: Option<TaskId>) -> Result<Vec<ComparisonRecord>> {
            self.inner.comparison_history(task)
        }
        fn last_intervention(&self, task: TaskId) -> Result<Option<InterventionEntry>> {
            self.inner.last_intervention(task)
        }
        fn record_intervention(&self, entry: &InterventionEntry) -> Result<()> {
            self.inner.record_intervention(entry)
        }
        fn get_kv(&self, key: &str) -> Result<Option<String>> {
            self.inner.get_kv(key)
        }
        fn set_kv(&self, key: &str, value: &str) -> Result<()> {
            self.inner.set_kv(key, value)
        }
    }

    /// `create` never calls `update`, so setup is unaffected by the armed conflicts.
    fn flaky_engine(conflicts: u32) -> Engine {
        Engine::new(
            Box::new(FlakyStore {
                inner: TaskDb::open_in_memory().unwrap(),
                conflicts: AtomicU32::new(conflicts),
            }),
            Arc::new(CollectingNotifier::new()),
            Config::default(),
        )
        .unwrap()
    }

    #[test]
    fn single_conflict_is_retried() {
        let engine = flaky_engine(1);
        let task = engine
            .create_task_at(NewTask::new("a", PriorityTier::Low), now())
            .unwrap();
        let done = engine
            .transition_task_at(task.id, TaskState::Completed, TransitionMetadata::default(), now())
            .unwrap();
        assert_eq!(done.task.state, TaskState::Completed);
    }

    #[test]
    fn repeated_conflict_is_surfaced_and_rolled_back() {
        let engine = flaky_engine(2);
        let task = engine
            .create_task_at(NewTask::new("a", PriorityTier::Low), now())
            .unwrap();
        let err = engine
            .transition_task_at(task.id, TaskState::Completed, TransitionMetadata::default(), now())
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(engine.get_task(task.id).unwrap().state, TaskState::Active);
    }
}
