pub mod config;
pub mod migrations;
pub mod store;
pub mod task_db;

pub use config::Config;
pub use store::{with_transaction, TaskStore};
pub use task_db::TaskDb;

use std::path::PathBuf;

use crate::error::{ConfigError, Result};

/// Returns `~/.config/nextup[-dev]/` based on NEXTUP_ENV.
///
/// Set NEXTUP_ENV=dev to use the development data directory, or
/// NEXTUP_DATA_DIR to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os("NEXTUP_DATA_DIR") {
        Some(explicit) => PathBuf::from(explicit),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("NEXTUP_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("nextup-dev")
            } else {
                base_dir.join("nextup")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
