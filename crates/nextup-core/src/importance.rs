//! Urgency and importance scoring for the actionable pool.
//!
//! Urgency is relative: it compares each task's days-to-due against the
//! rest of the pool being ranked, so the same task can score differently in
//! a different pool. Importance is `effective_priority * urgency`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::rating::effective_priority;
use crate::storage::config::{RankingConfig, RatingConfig};
use crate::task::Task;

pub const MAX_URGENCY: f64 = 3.0;
const BASE_URGENCY: f64 = 1.0;

/// A task together with the scores it was ranked by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTask {
    pub task: Task,
    pub effective_priority: f64,
    pub urgency: f64,
    pub importance: f64,
}

/// Days until due; `sentinel` when there is no due date. Negative when overdue.
pub fn days_remaining(task: &Task, today: NaiveDate, sentinel: i64) -> i64 {
    task.due_date
        .map(|due| (due - today).num_days())
        .unwrap_or(sentinel)
}

/// Urgency of `task` relative to `pool`, in `[1, 3]`.
///
/// The pool minimum (including ties and overdue tasks) scores 3. Dated tasks
/// scale linearly down to 1 at the latest due date. Undated tasks score 1
/// unless nothing in the pool has a due date.
pub fn urgency(task: &Task, today: NaiveDate, pool: &[Task], sentinel: i64) -> f64 {
    let bounds = PoolBounds::of(pool, today, sentinel);
    bounds.urgency_of(task, today, sentinel)
}

/// `effective_priority * urgency`, in `[0, 9]`.
pub fn importance(
    task: &Task,
    today: NaiveDate,
    pool: &[Task],
    rating: &RatingConfig,
    ranking: &RankingConfig,
) -> f64 {
    effective_priority(task, rating) * urgency(task, today, pool, ranking.no_due_date_sentinel_days)
}

/// Score every task in `pool` and sort by importance, descending.
///
/// Equal scores fall back to ascending id so the order is total.
pub fn rank(
    pool: Vec<Task>,
    today: NaiveDate,
    rating: &RatingConfig,
    ranking: &RankingConfig,
) -> Vec<ScoredTask> {
    let sentinel = ranking.no_due_date_sentinel_days;
    let bounds = PoolBounds::of(&pool, today, sentinel);
    let mut scored: Vec<ScoredTask> = pool
        .into_iter()
        .map(|task| {
            let effective = effective_priority(&task, rating);
            let urgency = bounds.urgency_of(&task, today, sentinel);
            ScoredTask {
                effective_priority: effective,
                urgency,
                importance: effective * urgency,
                task,
            }
        })
        .collect();
    scored.sort_by(compare_scored);
    scored
}

fn compare_scored(a: &ScoredTask, b: &ScoredTask) -> Ordering {
    b.importance
        .partial_cmp(&a.importance)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.task.id.cmp(&b.task.id))
}

/// Extremes of days_remaining over one pool.
struct PoolBounds {
    /// Over every task, undated ones counted at the sentinel.
    min: i64,
    /// Over dated tasks only; `None` if no task has a due date.
    max_dated: Option<i64>,
}

impl PoolBounds {
    fn of(pool: &[Task], today: NaiveDate, sentinel: i64) -> Self {
        let min = pool
            .iter()
            .map(|t| days_remaining(t, today, sentinel))
            .min()
            .unwrap_or(sentinel);
        let max_dated = pool
            .iter()
            .filter(|t| t.due_date.is_some())
            .map(|t| days_remaining(t, today, sentinel))
            .max();
        PoolBounds { min, max_dated }
    }

    fn urgency_of(&self, task: &Task, today: NaiveDate, sentinel: i64) -> f64 {
        let days = days_remaining(task, today, sentinel);
        if days <= self.min {
            return MAX_URGENCY;
        }
        if task.due_date.is_none() {
            return BASE_URGENCY;
        }
        let Some(max) = self.max_dated else {
            return BASE_URGENCY;
        };
        if max <= self.min {
            return MAX_URGENCY;
        }
        let span = (max - self.min) as f64;
        let score = BASE_URGENCY + 2.0 * (max - days) as f64 / span;
        score.clamp(BASE_URGENCY, MAX_URGENCY)
    }
}
