//! Daemon configuration from environment variables
//!
//! Everything the daemon needs beyond the service file comes from the
//! environment; there are no command-line flags.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use supervisor_engine::constants::manager::{DEFAULT_STATUS_FILE, DEFAULT_TICK};

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    /// Service configuration file (JSON or YAML)
    pub config_file: Option<PathBuf>,

    /// Where the status snapshot is written
    pub status_file: PathBuf,

    /// Manager run-loop period
    pub tick: Duration,

    /// tracing filter directive
    pub log_level: String,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            config_file: lookup("SV_CONFIG_FILE")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            status_file: lookup("SV_STATUS_FILE")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATUS_FILE)),
            tick: Self::parse_millis(&lookup, "SV_TICK_MS").unwrap_or(DEFAULT_TICK),
            // Priority: SV_LOG_LEVEL > RUST_LOG > default
            log_level: lookup("SV_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        }
    }

    fn parse_millis<F>(lookup: &F, var_name: &str) -> Option<Duration>
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(var_name)
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.tick.is_zero() {
            return Err("SV_TICK_MS must be greater than 0".to_string());
        }
        Ok(())
    }
}
