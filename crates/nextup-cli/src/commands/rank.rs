use clap::Subcommand;
use nextup_core::{NextAction, WorkflowState};

use super::{open_engine, print_json, CmdResult};

#[derive(Subcommand)]
pub enum RankAction {
    /// Actionable tasks by importance, highest first
    List {
        /// Only rank tasks in this context
        #[arg(long)]
        context: Option<String>,
        /// Show at most this many
        #[arg(long)]
        limit: Option<usize>,
    },
    /// The top task, or the comparison that has to come first
    Next,
}

pub fn run(action: RankAction) -> CmdResult {
    let engine = open_engine()?;

    match action {
        RankAction::List { context, limit } => {
            let mut ranked = match context.as_deref() {
                Some(context) => engine.get_ranked_in_context(context)?,
                None => engine.get_ranked_actionable_tasks()?,
            };
            if let Some(limit) = limit {
                ranked.truncate(limit);
            }
            print_json(&ranked)?;
            if let WorkflowState::AwaitingComparison { a, b, .. } = engine.comparison_state() {
                eprintln!("tie at the top: run `nextup compare pending` to choose between {a} and {b}");
            }
        }
        RankAction::Next => {
            let action = engine.next_action()?;
            print_next(&action)?;
        }
    }
    Ok(())
}

fn print_next(action: &NextAction) -> CmdResult {
    match action {
        NextAction::Work { task } => eprintln!("Next: #{} {}", task.task.id, task.task.title),
        NextAction::Compare { a, b } => {
            eprintln!("Tie: which matters more, #{} {} or #{} {}?", a.id, a.title, b.id, b.title)
        }
        NextAction::Nothing => eprintln!("Nothing actionable"),
    }
    print_json(action)
}
