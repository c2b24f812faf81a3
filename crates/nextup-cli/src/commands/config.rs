//! Engine tuning: ranking tolerance, rating scale and resurfacing schedules.

use clap::Subcommand;
use nextup_core::{Config, ConfigError};

use super::{print_json, CmdResult};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print one setting
    Get {
        /// Dotted key under rating, ranking, resurfacing or logging
        /// (e.g. "ranking.tie_epsilon", "resurfacing.someday_review_every_days")
        key: String,
    },
    /// Change one setting; the scheduler picks it up on its next start
    Set {
        /// Dotted key, as for `get`
        key: String,
        /// New value, validated before it is written
        value: String,
    },
    /// Print every setting as JSON
    List,
    /// Print where the config file lives
    Path,
    /// Restore the default tuning
    Reset,
}

pub fn run(action: ConfigAction) -> CmdResult {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key).ok_or(ConfigError::MissingKey(key))?;
            println!("{value}");
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            let previous = config.get(&key).ok_or_else(|| ConfigError::MissingKey(key.clone()))?;
            config.set(&key, &value)?;
            let current = config.get(&key).unwrap_or(value);
            tracing::info!(%key, %previous, %current, "config updated");
            println!("{key}: {previous} -> {current}");
        }
        ConfigAction::List => {
            let config = Config::load()?;
            print_json(&config)?;
        }
        ConfigAction::Path => {
            println!("{}", Config::path()?.display());
        }
        ConfigAction::Reset => {
            Config::default().save()?;
            println!("restored default tuning in {}", Config::path()?.display());
        }
    }
    Ok(())
}
