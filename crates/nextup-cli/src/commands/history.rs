use chrono::{Duration, Utc};
use clap::Subcommand;
use nextup_core::TaskId;

use super::{open_engine, print_json, CmdResult};

#[derive(Subcommand)]
pub enum HistoryAction {
    /// Postponement log, oldest first
    Postpones {
        /// Only this task
        #[arg(long)]
        task: Option<TaskId>,
        /// Only the last N days
        #[arg(long)]
        days: Option<i64>,
    },
    /// Comparison log, oldest first
    Comparisons {
        /// Only comparisons involving this task
        #[arg(long)]
        task: Option<TaskId>,
    },
}

pub fn run(action: HistoryAction) -> CmdResult {
    let engine = open_engine()?;

    match action {
        HistoryAction::Postpones { task, days } => {
            let since = days.map(|d| Utc::now() - Duration::days(d));
            print_json(&engine.postpone_history(task, since)?)?;
        }
        HistoryAction::Comparisons { task } => {
            print_json(&engine.comparison_history(task)?)?;
        }
    }
    Ok(())
}
