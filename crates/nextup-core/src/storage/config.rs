//! TOML-based engine configuration.
//!
//! Holds the tunable constants of the ranking engine:
//! - Rating scale and K factors
//! - Tie tolerance, comparison round bound and pairing policy
//! - Resurfacing job schedules and pattern thresholds
//! - Log level
//!
//! Configuration is stored at `~/.config/nextup/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::data_dir;
use crate::error::{ConfigError, CoreError, Result};

/// Rating scale configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingConfig {
    #[serde(default = "default_rating")]
    pub default_rating: f64,
    /// Lower edge of the operating range mapped onto a tier band.
    #[serde(default = "default_range_min")]
    pub range_min: f64,
    #[serde(default = "default_range_max")]
    pub range_max: f64,
    #[serde(default = "default_k_provisional")]
    pub k_provisional: f64,
    #[serde(default = "default_k_established")]
    pub k_established: f64,
    /// Comparisons before a rating counts as established.
    #[serde(default = "default_provisional_comparisons")]
    pub provisional_comparisons: u32,
}

/// How two tasks are picked when more than two tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PairingPolicy {
    /// Always the two lowest ids.
    #[default]
    LowestIds,
    /// Rotate through the tied set so every task gets compared.
    RoundRobin,
}

/// Ranking and tie resolution configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Scores strictly closer than this to the maximum count as tied.
    #[serde(default = "default_tie_epsilon")]
    pub tie_epsilon: f64,
    /// Comparisons per tie before falling back to id order.
    #[serde(default = "default_max_comparison_rounds")]
    pub max_comparison_rounds: u32,
    #[serde(default)]
    pub pairing: PairingPolicy,
    /// days_remaining used for tasks with no due date.
    #[serde(default = "default_no_due_date_sentinel_days")]
    pub no_due_date_sentinel_days: i64,
}

/// Resurfacing scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResurfacingConfig {
    #[serde(default = "default_deferred_check_interval_secs")]
    pub deferred_check_interval_secs: u64,
    #[serde(default = "default_delegated_followup_hour")]
    pub delegated_followup_hour: u8,
    #[serde(default)]
    pub delegated_followup_min: u8,
    #[serde(default = "default_someday_review_every_days")]
    pub someday_review_every_days: u32,
    #[serde(default = "default_someday_review_hour")]
    pub someday_review_hour: u8,
    #[serde(default = "default_postpone_analysis_hour")]
    pub postpone_analysis_hour: u8,
    #[serde(default)]
    pub postpone_analysis_min: u8,
    /// Rolling window for postponement pattern analysis.
    #[serde(default = "default_postpone_window_days")]
    pub postpone_window_days: u32,
    #[serde(default = "default_postpone_threshold")]
    pub postpone_threshold: usize,
    #[serde(default = "default_repeated_reason_threshold")]
    pub repeated_reason_threshold: usize,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// How often each job loop wakes to check whether it is due.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/nextup/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub rating: RatingConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub resurfacing: ResurfacingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default functions
fn default_rating() -> f64 {
    1500.0
}
fn default_range_min() -> f64 {
    1000.0
}
fn default_range_max() -> f64 {
    2000.0
}
fn default_k_provisional() -> f64 {
    32.0
}
fn default_k_established() -> f64 {
    16.0
}
fn default_provisional_comparisons() -> u32 {
    10
}
fn default_tie_epsilon() -> f64 {
    0.01
}
fn default_max_comparison_rounds() -> u32 {
    3
}
fn default_no_due_date_sentinel_days() -> i64 {
    36_500
}
fn default_deferred_check_interval_secs() -> u64 {
    3600
}
fn default_delegated_followup_hour() -> u8 {
    9
}
fn default_someday_review_every_days() -> u32 {
    7
}
fn default_someday_review_hour() -> u8 {
    10
}
fn default_postpone_analysis_hour() -> u8 {
    20
}
fn default_postpone_window_days() -> u32 {
    14
}
fn default_postpone_threshold() -> usize {
    3
}
fn default_repeated_reason_threshold() -> usize {
    2
}
fn default_job_timeout_secs() -> u64 {
    30
}
fn default_tick_secs() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            default_rating: default_rating(),
            range_min: default_range_min(),
            range_max: default_range_max(),
            k_provisional: default_k_provisional(),
            k_established: default_k_established(),
            provisional_comparisons: default_provisional_comparisons(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            tie_epsilon: default_tie_epsilon(),
            max_comparison_rounds: default_max_comparison_rounds(),
            pairing: PairingPolicy::default(),
            no_due_date_sentinel_days: default_no_due_date_sentinel_days(),
        }
    }
}

impl Default for ResurfacingConfig {
    fn default() -> Self {
        Self {
            deferred_check_interval_secs: default_deferred_check_interval_secs(),
            delegated_followup_hour: default_delegated_followup_hour(),
            delegated_followup_min: 0,
            someday_review_every_days: default_someday_review_every_days(),
            someday_review_hour: default_someday_review_hour(),
            postpone_analysis_hour: default_postpone_analysis_hour(),
            postpone_analysis_min: 0,
            postpone_window_days: default_postpone_window_days(),
            postpone_threshold: default_postpone_threshold(),
            repeated_reason_threshold: default_repeated_reason_threshold(),
            job_timeout_secs: default_job_timeout_secs(),
            tick_secs: default_tick_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(ConfigError::MissingKey(key.to_string()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) => {
                        return Err(invalid("cannot replace a whole section".into()));
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;
        }

        Err(ConfigError::MissingKey(key.to_string()))
    }

    /// `<data_dir>/config.toml`.
    pub fn path() -> Result<PathBuf> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk, writing defaults on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| {
                CoreError::Config(ConfigError::LoadFailed {
                    path,
                    message: e.to_string(),
                })
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
            Err(err) => Err(ConfigError::LoadFailed {
                path,
                message: err.to_string(),
            }
            .into()),
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(content).map_err(|e| ConfigError::InvalidValue {
            key: "<file>".into(),
            message: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, content).map_err(|e| ConfigError::SaveFailed {
            path,
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| {
            Err(ConfigError::InvalidValue {
                key: key.into(),
                message: message.into(),
            })
        };
        if self.rating.range_max <= self.rating.range_min {
            return invalid("rating.range_max", "must be greater than rating.range_min");
        }
        if self.ranking.tie_epsilon <= 0.0 {
            return invalid("ranking.tie_epsilon", "must be positive");
        }
        if self.resurfacing.postpone_threshold == 0 {
            return invalid("resurfacing.postpone_threshold", "must be at least 1");
        }
        if self.resurfacing.someday_review_every_days == 0 {
            return invalid("resurfacing.someday_review_every_days", "must be at least 1");
        }
        for (key, secs) in [
            ("resurfacing.tick_secs", self.resurfacing.tick_secs),
            ("resurfacing.job_timeout_secs", self.resurfacing.job_timeout_secs),
            (
                "resurfacing.deferred_check_interval_secs",
                self.resurfacing.deferred_check_interval_secs,
            ),
        ] {
            if secs == 0 {
                return invalid(key, "must be at least 1 second");
            }
        }
        for (key, hour) in [
            ("resurfacing.delegated_followup_hour", self.resurfacing.delegated_followup_hour),
            ("resurfacing.someday_review_hour", self.resurfacing.someday_review_hour),
            ("resurfacing.postpone_analysis_hour", self.resurfacing.postpone_analysis_hour),
        ] {
            if hour > 23 {
                return invalid(key, "must be 0-23");
            }
        }
        for (key, min) in [
            ("resurfacing.delegated_followup_min", self.resurfacing.delegated_followup_min),
            ("resurfacing.postpone_analysis_min", self.resurfacing.postpone_analysis_min),
        ] {
            if min > 59 {
                return invalid(key, "must be 0-59");
            }
        }
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value does not fit the field.
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let mut json = serde_json::to_value(&*self)?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config =
            serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Set a config value by key and persist. Returns error if key is unknown.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.set_value(key, value)?;
        self.save()
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "falling back to default config");
            Self::default()
        })
    }
}
