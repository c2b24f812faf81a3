//! # nextup Core Library
//!
//! Decides which task to work on next. Tasks are ranked by an importance
//! score that combines a user-assigned priority tier, a pairwise comparison
//! rating, and how soon each task is due relative to the rest of the list.
//! All operations are exposed through the `nextup` CLI binary, which is a
//! thin layer over this library.
//!
//! ## Architecture
//!
//! - **Ranking**: banded Elo rating ([`rating`]) times relative urgency
//!   ([`importance`]); near-ties are settled by asking the user
//!   ([`comparison`])
//! - **Lifecycle**: six task states with validated transitions and
//!   postponement logging ([`task`])
//! - **Dependencies**: a DAG of blocking relationships ([`graph`])
//! - **Resurfacing**: background jobs that bring dormant tasks back and flag
//!   postponement patterns ([`resurfacing`])
//! - **Storage**: SQLite task store and TOML configuration ([`storage`])
//!
//! ## Key Components
//!
//! - [`Engine`]: the entry point for every operation
//! - [`TaskDb`]: SQLite implementation of [`TaskStore`]
//! - [`Config`]: application configuration management
//! - [`ResurfacingScheduler`]: tokio driver for the resurfacing jobs

pub mod comparison;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod importance;
pub mod rating;
pub mod resurfacing;
pub mod storage;
pub mod task;

pub use comparison::{ComparisonWorkflow, Evaluation, WorkflowState};
pub use engine::{
    ComparisonOutcome, Engine, NextAction, RatingResetNotice, TaskPatch, TierChange,
    TransitionResult,
};
pub use error::{ConfigError, CoreError, DatabaseError, DependencyError, ValidationError};
pub use events::{ChannelNotifier, CollectingNotifier, LogNotifier, NotificationEvent, NotificationKind, Notifier};
pub use graph::{DependencyEdge, DependencyGraph};
pub use importance::ScoredTask;
pub use resurfacing::{JobDescriptor, JobName, JobOutcome, JobReport, ResurfacingScheduler, Schedule, SchedulerHandle};
pub use storage::{Config, TaskDb, TaskStore};
pub use task::lifecycle::TransitionMetadata;
pub use task::{
    ComparisonRecord, NewTask, PostponeInput, PostponeRecord, PriorityTier, ReasonType, Task,
    TaskId, TaskState,
};
