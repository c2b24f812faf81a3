use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    DeferredActivated,
    DelegatedFollowUp,
    SomedayReview,
    PostponeIntervention,
}

/// Fire-and-forget notice for the user. One per job run, never one per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// What the UI should open when the notice is acted on, e.g. `task:12`.
    pub action_ref: Option<String>,
    #[serde(default)]
    pub task_ids: Vec<TaskId>,
    pub at: DateTime<Utc>,
}

impl NotificationEvent {
    /// Batched event about `task_ids`; links straight to the task when there is only one.
    pub fn batch(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        task_ids: Vec<TaskId>,
        at: DateTime<Utc>,
    ) -> Self {
        let action_ref = match task_ids.as_slice() {
            [single] => Some(format!("task:{single}")),
            [] => None,
            _ => Some(format!("tasks:{}", join_ids(&task_ids))),
        };
        NotificationEvent {
            kind,
            title: title.into(),
            message: message.into(),
            action_ref,
            task_ids,
            at,
        }
    }
}

pub(crate) fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(TaskId::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Delivery seam. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn emit(&self, event: NotificationEvent);
}

/// Pushes events onto a channel drained by the foreground.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<NotificationEvent>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::UnboundedSender<NotificationEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<NotificationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl Notifier for ChannelNotifier {
    fn emit(&self, event: NotificationEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("notification receiver dropped");
        }
    }
}

/// Writes events to the log only.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn emit(&self, event: NotificationEvent) {
        tracing::info!(kind = ?event.kind, title = %event.title, "{}", event.message);
    }
}

/// Keeps emitted events in memory until drained.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<NotificationEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Notifier for CollectingNotifier {
    fn emit(&self, event: NotificationEvent) {
        self.events.lock().push(event);
    }
}
