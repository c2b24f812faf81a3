//! Dependency graph between tasks.
//!
//! Nodes are task ids; an edge `blocked <- blocking` means `blocked` cannot
//! be worked on until `blocking` is completed. Forward and reverse adjacency
//! are kept in ordered maps so traversal output is deterministic.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::DependencyError;
use crate::task::{TaskId, TaskState};

/// One directed blocking relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub blocked_id: TaskId,
    pub blocking_id: TaskId,
}

impl DependencyEdge {
    pub fn new(blocked_id: TaskId, blocking_id: TaskId) -> Self {
        DependencyEdge {
            blocked_id,
            blocking_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// blocked -> tasks blocking it
    blockers: BTreeMap<TaskId, BTreeSet<TaskId>>,
    /// blocking -> tasks it blocks
    dependents: BTreeMap<TaskId, BTreeSet<TaskId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted edges, validating each one.
    pub fn from_edges<I>(edges: I) -> Result<Self, DependencyError>
    where
        I: IntoIterator<Item = DependencyEdge>,
    {
        let mut graph = Self::new();
        for edge in edges {
            graph.add_edge(edge.blocked_id, edge.blocking_id)?;
        }
        Ok(graph)
    }

    /// Link `blocking` as a blocker of `blocked`.
    ///
    /// Returns `Ok(false)` if the edge already existed. On error the graph
    /// is untouched.
    pub fn add_edge(&mut self, blocked: TaskId, blocking: TaskId) -> Result<bool, DependencyError> {
        if blocked == blocking {
            return Err(DependencyError::SelfEdge(blocked));
        }
        if self.has_edge(blocked, blocking) {
            return Ok(false);
        }
        if self.would_create_cycle(blocked, blocking) {
            return Err(DependencyError::Cycle { blocked, blocking });
        }
        self.blockers.entry(blocked).or_default().insert(blocking);
        self.dependents.entry(blocking).or_default().insert(blocked);
        Ok(true)
    }

    /// Remove an edge. Removing a missing edge is a no-op.
    pub fn remove_edge(&mut self, blocked: TaskId, blocking: TaskId) -> bool {
        let removed = remove_from(&mut self.blockers, blocked, blocking);
        remove_from(&mut self.dependents, blocking, blocked);
        removed
    }

    pub fn has_edge(&self, blocked: TaskId, blocking: TaskId) -> bool {
        self.blockers
            .get(&blocked)
            .is_some_and(|set| set.contains(&blocking))
    }

    /// Whether `blocked <- blocking` would close a cycle.
    ///
    /// Walks blockers-of-blockers starting at `blocking`; reaching `blocked`
    /// means `blocked` already (transitively) blocks `blocking`.
    pub fn would_create_cycle(&self, blocked: TaskId, blocking: TaskId) -> bool {
        if blocked == blocking {
            return true;
        }
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([blocking]);
        while let Some(current) = queue.pop_front() {
            if current == blocked {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = self.blockers.get(&current) {
                queue.extend(next.iter().copied());
            }
        }
        false
    }

    /// Direct blockers of a task.
    pub fn blockers_of(&self, task: TaskId) -> impl Iterator<Item = TaskId> + '_ {
        self.blockers.get(&task).into_iter().flatten().copied()
    }

    /// Tasks directly blocked by `task`.
    pub fn dependents_of(&self, task: TaskId) -> impl Iterator<Item = TaskId> + '_ {
        self.dependents.get(&task).into_iter().flatten().copied()
    }

    /// True iff any direct blocker is not Completed.
    ///
    /// `state_of` returning `None` (unknown task) counts as incomplete.
    pub fn is_blocked<F>(&self, task: TaskId, state_of: F) -> bool
    where
        F: Fn(TaskId) -> Option<TaskState>,
    {
        self.blockers_of(task)
            .any(|b| state_of(b) != Some(TaskState::Completed))
    }

    /// All transitive blockers, nearest first.
    pub fn blocking_chain(&self, task: TaskId) -> Vec<TaskId> {
        let mut chain = Vec::new();
        let mut visited = BTreeSet::from([task]);
        let mut queue: VecDeque<TaskId> = self.blockers_of(task).collect();
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            chain.push(current);
            queue.extend(self.blockers_of(current));
        }
        chain
    }

    /// Drop every edge where `blocking` is the blocker; returns its former dependents.
    pub fn remove_blocker(&mut self, blocking: TaskId) -> Vec<TaskId> {
        let dependents: Vec<TaskId> = self
            .dependents
            .remove(&blocking)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for dependent in &dependents {
            remove_from(&mut self.blockers, *dependent, blocking);
        }
        dependents
    }

    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.blockers
            .iter()
            .flat_map(|(blocked, set)| set.iter().map(|b| DependencyEdge::new(*blocked, *b)))
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.blockers.values().map(BTreeSet::len).sum()
    }

    /// Kahn's algorithm over the whole graph.
    pub fn is_acyclic(&self) -> bool {
        let mut nodes: BTreeSet<TaskId> = self.blockers.keys().copied().collect();
        nodes.extend(self.dependents.keys().copied());
        let mut indegree: BTreeMap<TaskId, usize> = nodes
            .iter()
            .map(|n| (*n, self.blockers.get(n).map_or(0, BTreeSet::len)))
            .collect();
        let mut ready: VecDeque<TaskId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut seen = 0;
        while let Some(node) = ready.pop_front() {
            seen += 1;
            for dependent in self.dependents_of(node) {
                if let Some(d) = indegree.get_mut(&dependent) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(dependent);
                    }
                }
            }
        }
        seen == nodes.len()
    }
}

fn remove_from(map: &mut BTreeMap<TaskId, BTreeSet<TaskId>>, key: TaskId, value: TaskId) -> bool {
    let Some(set) = map.get_mut(&key) else {
        return false;
    };
    let removed = set.remove(&value);
    if set.is_empty() {
        map.remove(&key);
    }
    removed
}
