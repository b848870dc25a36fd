//! Sidecar configuration loaded from environment variables.
//!
//! | Variable                 | Default   | Description                                   |
//! |--------------------------|-----------|-----------------------------------------------|
//! | `SIGCE_WORKSPACE`        | unset     | Workspace directory opened at startup         |
//! | `SIGCE_LOG_LEVEL`        | `info`    | tracing filter (written to stderr)            |
//! | `SIGCE_AGGREGATION_MODE` | `average` | Fallback unit aggregation (`average` / `sum`) |

use crate::calc::AggregationMode;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,

    /// Tracing filter string, e.g. `"sigced=debug,info"`.
    pub log_level: String,

    /// Used when neither the request nor the workspace settings pick a mode.
    pub aggregation_mode: AggregationMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_level: "info".to_string(),
            aggregation_mode: AggregationMode::Average,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset, blank or unparseable values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            workspace: non_empty("SIGCE_WORKSPACE").map(PathBuf::from),
            log_level: non_empty("SIGCE_LOG_LEVEL").unwrap_or(defaults.log_level),
            aggregation_mode: non_empty("SIGCE_AGGREGATION_MODE")
                .and_then(|v| AggregationMode::parse(&v))
                .unwrap_or(defaults.aggregation_mode),
        }
    }
}
