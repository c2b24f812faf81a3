//! Task management and lifecycle commands for CLI.

use chrono::NaiveDate;
use clap::Subcommand;
use nextup_core::{
    NewTask, PostponeInput, PriorityTier, ReasonType, TaskId, TaskPatch, TaskState,
    TransitionMetadata,
};

use super::{open_engine, parse_date, print_json, split_list, CmdResult};

#[derive(Subcommand)]
pub enum TaskAction {
    /// Create a new task
    Create {
        /// Task title
        title: String,
        /// Priority tier: 1 (low) to 3 (high)
        #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(1..=3))]
        tier: u8,
        /// Due date (YYYY-MM-DD, today, tomorrow, +Nd)
        #[arg(long, value_parser = parse_date)]
        due: Option<NaiveDate>,
        /// Context the task belongs to (e.g. office, phone)
        #[arg(long)]
        context: Option<String>,
        /// Comma-separated project tags
        #[arg(long)]
        tags: Option<String>,
        /// Create the task deferred until this date
        #[arg(long, value_parser = parse_date)]
        defer_until: Option<NaiveDate>,
        /// Postponement reason when deferring (default: other)
        #[arg(long, requires = "defer_until")]
        reason: Option<ReasonType>,
    },
    /// List tasks
    List {
        /// Filter by state (active, deferred, delegated, someday, completed, trash)
        #[arg(long)]
        state: Option<TaskState>,
    },
    /// Get task details
    Get {
        /// Task ID
        id: TaskId,
    },
    /// Change the title
    Retitle {
        /// Task ID
        id: TaskId,
        /// New title
        title: String,
    },
    /// Change the priority tier (resets the comparison rating)
    SetTier {
        /// Task ID
        id: TaskId,
        /// New tier: 1 (low) to 3 (high)
        #[arg(value_parser = clap::value_parser!(u8).range(1..=3))]
        tier: u8,
    },
    /// Discard the comparison rating and start over from the default
    ResetRating {
        /// Task ID
        id: TaskId,
    },
    /// Set or clear the due date
    SetDue {
        /// Task ID
        id: TaskId,
        /// New due date; omit to clear
        #[arg(value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Set or clear the context
    SetContext {
        /// Task ID
        id: TaskId,
        /// New context; omit to clear
        context: Option<String>,
    },
    /// Add or remove project tags
    Tag {
        /// Task ID
        id: TaskId,
        /// Comma-separated tags to add
        #[arg(long)]
        add: Option<String>,
        /// Comma-separated tags to remove
        #[arg(long)]
        remove: Option<String>,
    },
    /// Defer until a start date
    Defer {
        /// Task ID
        id: TaskId,
        /// Date the task comes back
        #[arg(long, value_parser = parse_date)]
        until: NaiveDate,
        /// Why (blocker, no_time, low_energy, waiting_on_others, unclear, other)
        #[arg(long)]
        reason: ReasonType,
        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// Hand off to someone else
    Delegate {
        /// Task ID
        id: TaskId,
        /// Who the task was handed to
        #[arg(long)]
        to: String,
        /// Date to check back in
        #[arg(long, value_parser = parse_date)]
        follow_up: NaiveDate,
        /// Why (default: waiting_on_others)
        #[arg(long, default_value = "waiting_on_others")]
        reason: ReasonType,
        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// Park in someday/maybe
    Someday {
        /// Task ID
        id: TaskId,
    },
    /// Mark completed
    Complete {
        /// Task ID
        id: TaskId,
    },
    /// Move to trash
    Trash {
        /// Task ID
        id: TaskId,
    },
    /// Bring back to active
    Restore {
        /// Task ID
        id: TaskId,
    },
}

fn postpone(reason: ReasonType, notes: Option<String>) -> PostponeInput {
    let input = PostponeInput::new(reason);
    match notes {
        Some(notes) => input.with_notes(notes),
        None => input,
    }
}

pub fn run(action: TaskAction) -> CmdResult {
    let engine = open_engine()?;

    match action {
        TaskAction::Create {
            title,
            tier,
            due,
            context,
            tags,
            defer_until,
            reason,
        } => {
            let mut draft = NewTask::new(title, PriorityTier::try_from(tier)?);
            draft.due_date = due;
            draft.context_id = context;
            draft.project_tags = tags.map(|t| split_list(&t).into_iter().collect()).unwrap_or_default();
            if let Some(start) = defer_until {
                draft = draft.deferred_until(start);
                draft.postpone = reason.map(PostponeInput::new);
            }
            let task = engine.create_task(draft)?;
            eprintln!("Task created: {}", task.id);
            print_json(&task)?;
        }
        TaskAction::List { state } => {
            let tasks = engine.list_tasks(state)?;
            print_json(&tasks)?;
        }
        TaskAction::Get { id } => {
            let task = engine.get_task(id)?;
            print_json(&task)?;
        }
        TaskAction::Retitle { id, title } => {
            let patch = TaskPatch {
                title: Some(title),
                ..TaskPatch::default()
            };
            print_json(&engine.update_details(id, patch)?)?;
        }
        TaskAction::SetTier { id, tier } => {
            let change = engine.set_priority_tier(id, PriorityTier::try_from(tier)?)?;
            if let Some(reset) = &change.reset {
                eprintln!("warning: {}", reset.message);
            }
            print_json(&change.task)?;
        }
        TaskAction::ResetRating { id } => {
            let notice = engine.reset_rating(id)?;
            eprintln!("warning: {}", notice.message);
            print_json(&notice)?;
        }
        TaskAction::SetDue { id, date } => {
            let patch = TaskPatch {
                due_date: Some(date),
                ..TaskPatch::default()
            };
            print_json(&engine.update_details(id, patch)?)?;
        }
        TaskAction::SetContext { id, context } => {
            let patch = TaskPatch {
                context_id: Some(context),
                ..TaskPatch::default()
            };
            print_json(&engine.update_details(id, patch)?)?;
        }
        TaskAction::Tag { id, add, remove } => {
            let patch = TaskPatch {
                add_tags: add.as_deref().map(split_list).unwrap_or_default(),
                remove_tags: remove.as_deref().map(split_list).unwrap_or_default(),
                ..TaskPatch::default()
            };
            print_json(&engine.update_details(id, patch)?)?;
        }
        TaskAction::Defer {
            id,
            until,
            reason,
            notes,
        } => {
            let meta = TransitionMetadata::defer(until, postpone(reason, notes));
            let result = engine.transition_task(id, TaskState::Deferred, meta)?;
            eprintln!("Task {id} deferred until {until}");
            print_json(&result.task)?;
        }
        TaskAction::Delegate {
            id,
            to,
            follow_up,
            reason,
            notes,
        } => {
            let meta = TransitionMetadata::delegate(to, follow_up, postpone(reason, notes));
            let result = engine.transition_task(id, TaskState::Delegated, meta)?;
            print_json(&result.task)?;
        }
        TaskAction::Someday { id } => transition(&engine, id, TaskState::SomedayMaybe)?,
        TaskAction::Complete { id } => transition(&engine, id, TaskState::Completed)?,
        TaskAction::Trash { id } => transition(&engine, id, TaskState::Trash)?,
        TaskAction::Restore { id } => transition(&engine, id, TaskState::Active)?,
    }
    Ok(())
}

fn transition(engine: &nextup_core::Engine, id: TaskId, target: TaskState) -> CmdResult {
    let result = engine.transition_task(id, target, TransitionMetadata::default())?;
    for dependent in &result.unblocked {
        eprintln!("Task {dependent} is no longer blocked");
    }
    print_json(&result.task)
}
