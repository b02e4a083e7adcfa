//! Engine configuration.
//!
//! Built programmatically with [`EngineConfig::default()`] or from the
//! environment with [`EngineConfig::from_env()`]. Unset or unparsable
//! variables fall back to the default.
//!
//! - `ROSTERLINE_DATA_DIR`: directory holding one WAL per club (default `./data`)
//! - `ROSTERLINE_MAX_HEADCOUNT`: members per subteam (default `15`)
//! - `ROSTERLINE_LOCK_TIMEOUT_MS`: default lock wait before `Busy` (default: wait forever)
//! - `ROSTERLINE_COMPACT_THRESHOLD`: WAL appends before compaction (default `1000`)
//! - `ROSTERLINE_METRICS_PORT`: Prometheus exporter port (default: disabled)

use std::path::PathBuf;
use std::time::Duration;

use crate::limits::MAX_HEADCOUNT;

pub const DEFAULT_MAX_HEADCOUNT: u32 = 15;
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    /// Captured on each subteam when it is created.
    pub max_headcount: u32,
    /// Used when a mutation is called without its own timeout.
    pub lock_timeout: Option<Duration>,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            max_headcount: DEFAULT_MAX_HEADCOUNT,
            lock_timeout: None,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            metrics_port: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, with the variable lookup supplied by the caller.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse = |key: &str| lookup(key).map(|v| v.trim().to_string());

        let max_headcount = parse("ROSTERLINE_MAX_HEADCOUNT")
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|n| (1..=MAX_HEADCOUNT).contains(n))
            .unwrap_or(defaults.max_headcount);

        Self {
            data_dir: parse("ROSTERLINE_DATA_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_headcount,
            lock_timeout: parse("ROSTERLINE_LOCK_TIMEOUT_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis),
            compact_threshold: parse("ROSTERLINE_COMPACT_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parse("ROSTERLINE_METRICS_PORT").and_then(|v| v.parse().ok()),
        }
    }
}
