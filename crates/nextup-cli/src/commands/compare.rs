use clap::Subcommand;
use nextup_core::TaskId;
use serde_json::json;

use super::{open_engine, print_json, CmdResult};

#[derive(Subcommand)]
pub enum CompareAction {
    /// Show the pair waiting for a decision, if any
    Pending,
    /// Record which of the pending pair matters more
    Submit {
        /// Task that wins
        winner: TaskId,
        /// Task that loses
        loser: TaskId,
    },
    /// Current state of the comparison workflow
    Status,
}

pub fn run(action: CompareAction) -> CmdResult {
    let engine = open_engine()?;

    match action {
        CompareAction::Pending => match engine.get_pending_comparison()? {
            Some((a, b)) => {
                eprintln!("Which matters more: #{} {} or #{} {}?", a.id, a.title, b.id, b.title);
                print_json(&json!({ "a": a, "b": b }))?;
            }
            None => print_json(&json!(null))?,
        },
        CompareAction::Submit { winner, loser } => {
            let outcome = engine.submit_comparison_result(winner, loser)?;
            if let Some((a, b)) = outcome.next {
                eprintln!("still tied: compare {a} and {b}");
            }
            print_json(&outcome)?;
        }
        CompareAction::Status => print_json(&engine.comparison_state())?,
    }
    Ok(())
}
