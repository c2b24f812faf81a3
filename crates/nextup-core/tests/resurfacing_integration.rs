//! Integration tests for lifecycle and resurfacing.
//!
//! These tests drive the engine end to end against an in-memory database:
//! deferring, blocking, scheduled activation, postponement analysis and the
//! persisted job run state.

use std::sync::{Arc, Barrier};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use nextup_core::{
    CollectingNotifier, Config, CoreError, Engine, JobName, JobOutcome, NewTask,
    NotificationKind, PostponeInput, PriorityTier, ReasonType, TaskDb, TaskId, TaskState,
    TransitionMetadata,
};

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, day, hour, 0, 0).unwrap()
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 5, day).unwrap()
}

fn setup() -> (Engine, Arc<CollectingNotifier>) {
    let notifier = Arc::new(CollectingNotifier::new());
    let engine = Engine::new(
        Box::new(TaskDb::open_in_memory().unwrap()),
        notifier.clone(),
        Config::default(),
    )
    .unwrap();
    (engine, notifier)
}

#[test]
fn test_blocked_deferred_task_waits_for_blocker() {
    let (engine, notifier) = setup();
    let blocker = engine
        .create_task_at(NewTask::new("Get quote", PriorityTier::Medium), at(1, 9))
        .unwrap();
    let task = engine
        .create_task_at(NewTask::new("Order parts", PriorityTier::High), at(1, 9))
        .unwrap();
    engine.add_dependency_at(task.id, blocker.id, at(1, 9)).unwrap();
    engine
        .transition_task_at(
            task.id,
            TaskState::Deferred,
            TransitionMetadata::defer(date(3), PostponeInput::new(ReasonType::Blocker)),
            at(1, 10),
        )
        .unwrap();

    // Start date reached, blocker still open: stays deferred, no event.
    let report = engine
        .run_resurfacing_job_at(JobName::DeferredActivation, at(3, 8))
        .unwrap();
    assert_eq!(report.skipped, vec![task.id]);
    assert_eq!(engine.get_task(task.id).unwrap().state, TaskState::Deferred);
    assert!(notifier.is_empty());

    let done = engine
        .transition_task_at(blocker.id, TaskState::Completed, TransitionMetadata::default(), at(3, 9))
        .unwrap();
    assert_eq!(done.unblocked, vec![task.id]);

    let report = engine
        .run_resurfacing_job_at(JobName::DeferredActivation, at(3, 10))
        .unwrap();
    assert_eq!(report.changed, vec![task.id]);
    let task = engine.get_task(task.id).unwrap();
    assert_eq!(task.state, TaskState::Active);
    assert_eq!(task.last_resurfaced_at, Some(at(3, 10)));

    let events = notifier.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, NotificationKind::DeferredActivated);
}

#[test]
fn test_repeated_blocker_postpones_raise_one_intervention() {
    let (engine, notifier) = setup();
    let task = engine
        .create_task_at(NewTask::new("Write report", PriorityTier::High), at(1, 9))
        .unwrap();
    for day in 1..=4 {
        engine
            .transition_task_at(
                task.id,
                TaskState::Deferred,
                TransitionMetadata::defer(date(day + 1), PostponeInput::new(ReasonType::Blocker)),
                at(day, 12),
            )
            .unwrap();
        engine
            .transition_task_at(task.id, TaskState::Active, TransitionMetadata::default(), at(day, 13))
            .unwrap();
    }
    assert_eq!(engine.postpone_history(Some(task.id), None).unwrap().len(), 4);

    let report = engine
        .run_resurfacing_job_at(JobName::PostponeAnalysis, at(4, 20))
        .unwrap();
    assert_eq!(report.changed, vec![task.id]);
    let events = notifier.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, NotificationKind::PostponeIntervention);
    assert!(events[0].message.contains("blocker x4"));

    // Unchanged history: nothing new to say.
    let again = engine
        .run_resurfacing_job_at(JobName::PostponeAnalysis, at(5, 20))
        .unwrap();
    assert!(again.changed.is_empty());
    assert!(notifier.is_empty());

    // A fresh postponement re-arms the alert.
    engine
        .transition_task_at(
            task.id,
            TaskState::Deferred,
            TransitionMetadata::defer(date(7), PostponeInput::new(ReasonType::Blocker)),
            at(6, 9),
        )
        .unwrap();
    engine
        .run_resurfacing_job_at(JobName::PostponeAnalysis, at(6, 20))
        .unwrap();
    assert_eq!(notifier.len(), 1);
}

#[test]
fn test_job_run_state_is_persisted() {
    let (engine, _notifier) = setup();
    let before = engine.job_descriptor(JobName::DelegatedFollowup).unwrap();
    assert_eq!(before.state.last_run, None);
    assert!(before.is_due(at(4, 9)));

    assert!(engine.run_job_if_due(JobName::DelegatedFollowup, at(4, 9)).unwrap().is_some());
    let after = engine.job_descriptor(JobName::DelegatedFollowup).unwrap();
    assert_eq!(after.state.last_run, Some(at(4, 9)));
    assert_eq!(
        after.state.last_outcome,
        Some(JobOutcome::Succeeded { changed: 0, skipped: 0 })
    );
    assert!(engine.run_job_if_due(JobName::DelegatedFollowup, at(4, 15)).unwrap().is_none());
    assert!(engine.run_job_if_due(JobName::DelegatedFollowup, at(5, 9)).unwrap().is_some());
    assert_eq!(engine.job_descriptors().unwrap().len(), 4);
}

#[test]
fn test_invalid_transitions_leave_task_unchanged() {
    let (engine, _notifier) = setup();
    let task = engine
        .create_task_at(NewTask::new("Plan offsite", PriorityTier::Low), at(1, 9))
        .unwrap();

    let err = engine
        .transition_task_at(task.id, TaskState::Deferred, TransitionMetadata::default(), at(1, 10))
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    engine
        .transition_task_at(task.id, TaskState::Trash, TransitionMetadata::default(), at(1, 11))
        .unwrap();
    let err = engine
        .transition_task_at(task.id, TaskState::Completed, TransitionMetadata::default(), at(1, 12))
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition(_)));

    let stored = engine.get_task(task.id).unwrap();
    assert_eq!(stored.state, TaskState::Trash);
    assert!(engine.postpone_history(Some(task.id), None).unwrap().is_empty());

    let restored = engine
        .transition_task_at(task.id, TaskState::Active, TransitionMetadata::default(), at(1, 13))
        .unwrap();
    assert_eq!(restored.task.state, TaskState::Active);
}

#[test]
fn test_delegated_task_follow_up_cycle() {
    let (engine, notifier) = setup();
    let task = engine
        .create_task_at(NewTask::new("Vendor contract", PriorityTier::Medium), at(1, 9))
        .unwrap();
    engine
        .transition_task_at(
            task.id,
            TaskState::Delegated,
            TransitionMetadata::delegate("Legal", date(3), PostponeInput::new(ReasonType::WaitingOnOthers)),
            at(1, 10),
        )
        .unwrap();
    assert!(engine.rank_at(None, at(1, 11)).unwrap().is_empty());

    engine
        .run_resurfacing_job_at(JobName::DelegatedFollowup, at(2, 9))
        .unwrap();
    assert!(notifier.is_empty());

    engine
        .run_resurfacing_job_at(JobName::DelegatedFollowup, at(3, 9))
        .unwrap();
    assert_eq!(notifier.drain()[0].kind, NotificationKind::DelegatedFollowUp);
    assert_eq!(engine.rank_at(None, at(3, 10)).unwrap()[0].task.id, task.id);
}

#[test]
fn test_every_job_is_idempotent_on_rerun() {
    let (engine, notifier) = setup();
    let deferred = engine
        .create_task_at(
            NewTask::new("Renew insurance", PriorityTier::Medium).deferred_until(date(4)),
            at(1, 9),
        )
        .unwrap();
    let delegated = engine
        .create_task_at(NewTask::new("Logo draft", PriorityTier::Medium), at(1, 9))
        .unwrap();
    engine
        .transition_task_at(
            delegated.id,
            TaskState::Delegated,
            TransitionMetadata::delegate("Sam", date(4), PostponeInput::new(ReasonType::WaitingOnOthers)),
            at(1, 10),
        )
        .unwrap();
    let parked = engine
        .create_task_at(NewTask::new("Learn Go", PriorityTier::Low), at(1, 9))
        .unwrap();
    engine
        .transition_task_at(parked.id, TaskState::SomedayMaybe, TransitionMetadata::default(), at(1, 10))
        .unwrap();
    let stalled = engine
        .create_task_at(NewTask::new("Clean garage", PriorityTier::Low), at(1, 9))
        .unwrap();
    for day in 1..=3 {
        engine
            .transition_task_at(
                stalled.id,
                TaskState::Deferred,
                TransitionMetadata::defer(date(day + 1), PostponeInput::new(ReasonType::NoTime)),
                at(day, 11),
            )
            .unwrap();
        engine
            .transition_task_at(stalled.id, TaskState::Active, TransitionMetadata::default(), at(day, 12))
            .unwrap();
    }
    assert_eq!(engine.get_task(deferred.id).unwrap().state, TaskState::Deferred);

    let now = at(4, 21);
    for job in JobName::ALL {
        let first = engine.run_resurfacing_job_at(job, now).unwrap();
        assert!(first.event.is_some(), "{job}: first run should notify");

        let tasks_before = engine.list_tasks(None).unwrap();
        let second = engine.run_resurfacing_job_at(job, now).unwrap();
        assert!(second.changed.is_empty(), "{job}: rerun changed {:?}", second.changed);
        assert!(second.event.is_none(), "{job}: rerun notified again");
        assert_eq!(engine.list_tasks(None).unwrap(), tasks_before, "{job}: rerun touched tasks");
    }
    assert_eq!(notifier.len(), JobName::ALL.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completion_racing_deferred_activation_stays_consistent() {
    let (engine, _notifier) = setup();
    let engine = Arc::new(engine);
    let mut created = Vec::new();
    for n in 0..20 {
        let task = engine
            .create_task_at(
                NewTask::new(format!("errand {n}"), PriorityTier::Medium).deferred_until(date(4)),
                at(1, 9),
            )
            .unwrap();
        created.push(task);
    }
    let ids: Vec<TaskId> = created.iter().map(|t| t.id).collect();
    let barrier = Arc::new(Barrier::new(2));

    let background = {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        tokio::task::spawn_blocking(move || {
            barrier.wait();
            engine.run_resurfacing_job_at(JobName::DeferredActivation, at(4, 8))
        })
    };
    let foreground = {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        let ids = ids.clone();
        tokio::task::spawn_blocking(move || {
            barrier.wait();
            ids.into_iter()
                .map(|id| {
                    let done = engine.transition_task_at(
                        id,
                        TaskState::Completed,
                        TransitionMetadata::default(),
                        at(4, 8),
                    );
                    (id, done.is_ok())
                })
                .collect::<Vec<_>>()
        })
    };

    let report = background.await.unwrap().unwrap();
    let completions = foreground.await.unwrap();

    for (original, (id, completed)) in created.iter().zip(completions) {
        assert_eq!(original.id, id);
        let activated = report.changed.contains(&id);
        // Every task is due, so the job activates each one exactly once.
        assert!(activated, "task {id} was never activated");

        let task = engine.get_task(id).unwrap();
        let writes = u64::from(activated) + u64::from(completed);
        assert_eq!(task.revision, original.revision + writes, "task {id}");
        assert_eq!(task.start_date, None);
        if completed {
            assert_eq!(task.state, TaskState::Completed);
            assert!(task.completed_at.is_some());
        } else {
            assert_eq!(task.state, TaskState::Active);
            assert_eq!(task.completed_at, None);
        }
    }
}
