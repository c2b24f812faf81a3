pub mod compare;
pub mod completions;
pub mod config;
pub mod dep;
pub mod history;
pub mod jobs;
pub mod rank;
pub mod task;

use std::error::Error;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use nextup_core::{Engine, LogNotifier, Notifier};
use serde::Serialize;

pub type CmdResult = Result<(), Box<dyn Error>>;

/// Engine over the default data directory; events go to the log.
pub fn open_engine() -> Result<Engine, Box<dyn Error>> {
    open_engine_with(Arc::new(LogNotifier))
}

pub fn open_engine_with(notifier: Arc<dyn Notifier>) -> Result<Engine, Box<dyn Error>> {
    Ok(Engine::open_default(notifier)?)
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `YYYY-MM-DD`, `today`, `tomorrow`, or `+N` / `+Nd` days from today (UTC).
pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    let today = Utc::now().date_naive();
    match s.trim().to_ascii_lowercase().as_str() {
        "today" => Ok(today),
        "tomorrow" => Ok(today + Duration::days(1)),
        other => {
            if let Some(offset) = other.strip_prefix('+') {
                let days: i64 = offset
                    .trim_end_matches('d')
                    .parse()
                    .map_err(|_| format!("invalid day offset '{s}'"))?;
                return Ok(today + Duration::days(days));
            }
            NaiveDate::parse_from_str(other, "%Y-%m-%d")
                .map_err(|_| format!("invalid date '{s}', expected YYYY-MM-DD"))
        }
    }
}

/// Comma-separated list, blanks dropped.
pub fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relative_and_absolute_dates() {
        let today = Utc::now().date_naive();
        assert_eq!(parse_date("today").unwrap(), today);
        assert_eq!(parse_date("+3d").unwrap(), today + Duration::days(3));
        assert_eq!(parse_date("+1").unwrap(), today + Duration::days(1));
        assert_eq!(
            parse_date("2026-05-04").unwrap(),
            NaiveDate::from_ymd_opt(2026, 5, 4).unwrap()
        );
        assert!(parse_date("next week").is_err());
    }

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(split_list("a, b,,c "), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }
}
