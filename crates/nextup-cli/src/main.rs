use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "nextup", version, about = "Decide which task to work on next")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Task management and lifecycle
    Task {
        #[command(subcommand)]
        action: commands::task::TaskAction,
    },
    /// Dependencies between tasks
    Dep {
        #[command(subcommand)]
        action: commands::dep::DepAction,
    },
    /// Ranked list of actionable tasks
    Rank {
        #[command(subcommand)]
        action: commands::rank::RankAction,
    },
    /// Pairwise comparisons for tied tasks
    Compare {
        #[command(subcommand)]
        action: commands::compare::CompareAction,
    },
    /// Resurfacing jobs
    Jobs {
        #[command(subcommand)]
        action: commands::jobs::JobsAction,
    },
    /// Postponement and comparison history
    History {
        #[command(subcommand)]
        action: commands::history::HistoryAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Generate shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

fn init_tracing() {
    // RUST_LOG wins over the configured level.
    let level = nextup_core::Config::load_or_default().logging.level;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("nextup_core={level},nextup={level}"))),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command {
        Commands::Task { action } => commands::task::run(action),
        Commands::Dep { action } => commands::dep::run(action),
        Commands::Rank { action } => commands::rank::run(action),
        Commands::Compare { action } => commands::compare::run(action),
        Commands::Jobs { action } => commands::jobs::run(action),
        Commands::History { action } => commands::history::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Completions { shell } => commands::completions::run(shell),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
