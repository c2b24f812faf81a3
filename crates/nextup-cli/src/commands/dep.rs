use clap::Subcommand;
use nextup_core::TaskId;
use serde_json::json;

use super::{open_engine, print_json, CmdResult};

#[derive(Subcommand)]
pub enum DepAction {
    /// Make TASK wait on BLOCKER
    Add {
        /// Blocked task ID
        task: TaskId,
        /// Blocking task ID
        blocker: TaskId,
    },
    /// Remove a dependency (no-op if absent)
    Remove {
        /// Blocked task ID
        task: TaskId,
        /// Blocking task ID
        blocker: TaskId,
    },
    /// Show everything a task transitively waits on
    Chain {
        /// Task ID
        task: TaskId,
    },
}

pub fn run(action: DepAction) -> CmdResult {
    let engine = open_engine()?;

    match action {
        DepAction::Add { task, blocker } => {
            let added = engine.add_dependency(task, blocker)?;
            if !added {
                eprintln!("dependency already exists");
            }
            print_json(&json!({ "blocked": task, "blocking": blocker, "added": added }))?;
        }
        DepAction::Remove { task, blocker } => {
            let removed = engine.remove_dependency(task, blocker)?;
            print_json(&json!({ "blocked": task, "blocking": blocker, "removed": removed }))?;
        }
        DepAction::Chain { task } => {
            let chain = engine.blocking_chain(task)?;
            print_json(&json!({
                "task": task,
                "blocked": engine.is_blocked(task)?,
                "chain": chain,
            }))?;
        }
    }
    Ok(())
}
