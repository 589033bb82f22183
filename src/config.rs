use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;

/// Process configuration, read from `ROOMBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// JSON file with rooms and users. The built-in seed is used when unset.
    pub directory: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub reminder_interval: Duration,
    pub reminder_tolerance: TimeDelta,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            directory: None,
            metrics_port: None,
            compact_threshold: 1000,
            reminder_interval: Duration::from_secs(30),
            reminder_tolerance: crate::engine::DEFAULT_REMINDER_TOLERANCE,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to the default
    /// with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let data_dir = lookup("ROOMBOOK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let directory = lookup("ROOMBOOK_DIRECTORY").map(PathBuf::from);
        let metrics_port = parsed(&lookup, "ROOMBOOK_METRICS_PORT");
        let compact_threshold =
            parsed(&lookup, "ROOMBOOK_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold);
        let reminder_interval = parsed::<u64>(&lookup, "ROOMBOOK_REMINDER_INTERVAL_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.reminder_interval);
        let reminder_tolerance = parsed::<i64>(&lookup, "ROOMBOOK_REMINDER_TOLERANCE_SECS")
            .filter(|secs| *secs >= 0)
            .map(TimeDelta::seconds)
            .unwrap_or(defaults.reminder_tolerance);

        Self {
            data_dir,
            directory,
            metrics_port,
            compact_threshold,
            reminder_interval,
            reminder_tolerance,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("roombook.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring {key}={raw:?}: not a valid value");
            None
        }
    }
}
