//! Tie detection and the single-flight pairwise comparison session.
//!
//! States: `Idle -> AwaitingComparison -> Resolved`. At most one session is
//! open at a time; ranking runs that happen while it is open are counted as
//! queued triggers and served by the re-evaluation that follows the result.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::ValidationError;
use crate::storage::config::{PairingPolicy, RankingConfig};
use crate::task::TaskId;

/// Absorbs float noise so 4.99 is not within 0.01 of 5.00.
const TIE_SLACK: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkflowState {
    #[default]
    Idle,
    AwaitingComparison {
        a: TaskId,
        b: TaskId,
        round: u32,
    },
    Resolved,
}

/// What the caller should do after a ranking pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Evaluation {
    NoTie,
    /// A session was opened; ask the user to pick between `a` and `b`.
    Prompt { a: TaskId, b: TaskId, round: u32 },
    /// A session is already open; this trigger waits for it.
    Queued { a: TaskId, b: TaskId, round: u32 },
    /// The round bound is spent; present `order` (ascending id) without prompting.
    BrokenById { order: Vec<TaskId> },
}

/// Persisted part of the workflow, so a session survives process restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub state: WorkflowState,
    /// Comparisons resolved for the current tie episode.
    pub rounds: u32,
    /// Tasks of the tie the current rounds belong to.
    pub episode: BTreeSet<TaskId>,
    /// Round-robin position.
    pub cursor: usize,
    pub queued: u32,
}

#[derive(Debug, Clone)]
pub struct ComparisonWorkflow {
    snapshot: WorkflowSnapshot,
    policy: PairingPolicy,
    epsilon: f64,
    max_rounds: u32,
}

/// Ids whose score is within `epsilon` (strictly) of the maximum, ascending.
pub fn tied_top(scores: &[(TaskId, f64)], epsilon: f64) -> Vec<TaskId> {
    let Some(max) = scores
        .iter()
        .map(|(_, s)| *s)
        .filter(|s| !s.is_nan())
        .reduce(f64::max)
    else {
        return Vec::new();
    };
    let mut tied: Vec<TaskId> = scores
        .iter()
        .filter(|(_, s)| max - *s + TIE_SLACK < epsilon)
        .map(|(id, _)| *id)
        .collect();
    tied.sort();
    tied
}

impl ComparisonWorkflow {
    pub fn new(cfg: &RankingConfig) -> Self {
        Self::restore(WorkflowSnapshot::default(), cfg)
    }

    pub fn restore(snapshot: WorkflowSnapshot, cfg: &RankingConfig) -> Self {
        ComparisonWorkflow {
            snapshot,
            policy: cfg.pairing,
            epsilon: cfg.tie_epsilon,
            max_rounds: cfg.max_comparison_rounds,
        }
    }

    pub fn snapshot(&self) -> &WorkflowSnapshot {
        &self.snapshot
    }

    pub fn state(&self) -> WorkflowState {
        self.snapshot.state
    }

    pub fn pending_pair(&self) -> Option<(TaskId, TaskId)> {
        match self.snapshot.state {
            WorkflowState::AwaitingComparison { a, b, .. } => Some((a, b)),
            _ => None,
        }
    }

    /// Feed the scores of a full ranking pass.
    ///
    /// An open session survives only while both of its tasks are still tied
    /// at the top; otherwise it is dropped and the ranking is re-evaluated.
    pub fn evaluate(&mut self, scores: &[(TaskId, f64)]) -> Evaluation {
        let tied = tied_top(scores, self.epsilon);

        if let WorkflowState::AwaitingComparison { a, b, round } = self.snapshot.state {
            if tied.contains(&a) && tied.contains(&b) {
                self.snapshot.queued += 1;
                debug!(%a, %b, queued = self.snapshot.queued, "comparison pending, trigger queued");
                return Evaluation::Queued { a, b, round };
            }
            debug!(%a, %b, "pending pair no longer tied at the top, abandoning");
            self.snapshot.state = WorkflowState::Idle;
            self.snapshot.queued = 0;
        }

        if tied.len() < 2 {
            if self.snapshot.state != WorkflowState::Idle {
                self.snapshot.state = WorkflowState::Resolved;
            }
            self.snapshot.rounds = 0;
            self.snapshot.episode.clear();
            self.snapshot.queued = 0;
            return Evaluation::NoTie;
        }

        let tied_set: BTreeSet<TaskId> = tied.iter().copied().collect();
        if !tied_set.is_subset(&self.snapshot.episode) {
            self.snapshot.rounds = 0;
            self.snapshot.episode = tied_set;
        }

        if self.snapshot.rounds >= self.max_rounds {
            debug!(rounds = self.snapshot.rounds, "tie persists past round bound, ordering by id");
            self.snapshot.state = WorkflowState::Resolved;
            self.snapshot.queued = 0;
            return Evaluation::BrokenById { order: tied };
        }

        let (a, b) = self.select_pair(&tied);
        let round = self.snapshot.rounds + 1;
        self.snapshot.state = WorkflowState::AwaitingComparison { a, b, round };
        Evaluation::Prompt { a, b, round }
    }

    /// Check that `winner`/`loser` is the open pair, in either order.
    pub fn expect_pair(&self, winner: TaskId, loser: TaskId) -> Result<(), ValidationError> {
        let WorkflowState::AwaitingComparison { a, b, .. } = self.snapshot.state else {
            return Err(ValidationError::NoPendingComparison);
        };
        let matches = (winner == a && loser == b) || (winner == b && loser == a);
        if matches {
            Ok(())
        } else {
            Err(ValidationError::ComparisonMismatch { winner, loser, a, b })
        }
    }

    /// Close the open session after its result has been persisted.
    pub fn record_result(&mut self, winner: TaskId, loser: TaskId) -> Result<u32, ValidationError> {
        self.expect_pair(winner, loser)?;
        self.snapshot.rounds += 1;
        self.snapshot.queued = 0;
        self.snapshot.state = WorkflowState::Resolved;
        Ok(self.snapshot.rounds)
    }

    fn select_pair(&mut self, tied: &[TaskId]) -> (TaskId, TaskId) {
        match self.policy {
            PairingPolicy::LowestIds => (tied[0], tied[1]),
            PairingPolicy::RoundRobin => {
                let n = tied.len();
                let i = self.snapshot.cursor % n;
                self.snapshot.cursor = self.snapshot.cursor.wrapping_add(1);
                (tied[i], tied[(i + 1) % n])
            }
        }
    }
}
