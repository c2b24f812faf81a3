//! Postponement pattern detection over a window of postpone history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::task::{PostponeRecord, ReasonType, TaskId};

/// A task postponed often enough, or for the same reason often enough, to
/// warrant an intervention prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostponePattern {
    pub task_id: TaskId,
    pub count: usize,
    pub reason_counts: BTreeMap<ReasonType, usize>,
    /// Most frequent reason when it reached the repeat threshold.
    pub repeated_reason: Option<ReasonType>,
    pub latest_at: DateTime<Utc>,
}

impl PostponePattern {
    /// e.g. `postponed 4 times (blocker x4)`
    pub fn summary(&self) -> String {
        let mut reasons: Vec<(&ReasonType, &usize)> = self.reason_counts.iter().collect();
        reasons.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        let reasons = reasons
            .into_iter()
            .map(|(reason, n)| format!("{reason} x{n}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("postponed {} times ({reasons})", self.count)
    }
}

/// Group `records` by task and keep the tasks that cross either threshold.
///
/// Flagged when `count >= threshold`, or when one reason occurs at least
/// `repeated_reason_threshold` times. Output is ordered by task id.
pub fn analyze(
    records: &[PostponeRecord],
    threshold: usize,
    repeated_reason_threshold: usize,
) -> Vec<PostponePattern> {
    let mut by_task: BTreeMap<TaskId, Vec<&PostponeRecord>> = BTreeMap::new();
    for record in records {
        by_task.entry(record.task_id).or_default().push(record);
    }

    by_task
        .into_iter()
        .filter_map(|(task_id, records)| {
            let mut reason_counts: BTreeMap<ReasonType, usize> = BTreeMap::new();
            for record in &records {
                *reason_counts.entry(record.reason_type).or_default() += 1;
            }
            let top = reason_counts
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
                .map(|(reason, n)| (*reason, *n));
            let repeated_reason = top
                .filter(|(_, n)| *n >= repeated_reason_threshold)
                .map(|(reason, _)| reason);
            let count = records.len();
            if count < threshold && repeated_reason.is_none() {
                return None;
            }
            let latest_at = records.iter().map(|r| r.recorded_at).max()?;
            Some(PostponePattern {
                task_id,
                count,
                reason_counts,
                repeated_reason,
                latest_at,
            })
        })
        .collect()
}
