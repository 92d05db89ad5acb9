//! ServiceConfig value object
//! Everything needed to launch and supervise one service process

use super::duration_secs;
use crate::constants::service as defaults;
use crate::domain::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Immutable description of a supervised service
///
/// File-based configs omit `name`; the loader fills it from the map key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub name: String,

    /// argv; the first element is the program
    pub command: Vec<String>,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Port the service binds; checked for availability before spawning
    #[serde(default)]
    pub port: Option<u16>,

    /// Overrides merged over the supervisor's own environment
    #[serde(default)]
    pub env_vars: HashMap<String, String>,

    // Advisory resource ceilings
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: f64,

    // Restart policy
    #[serde(default = "default_true")]
    pub restart_on_failure: bool,
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    #[serde(default = "default_restart_delay", with = "duration_secs")]
    pub restart_delay: Duration,
    #[serde(default)]
    pub restart_backoff: bool,

    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Optional argv run periodically by the monitor; failures are only logged
    #[serde(default)]
    pub health_check: Option<Vec<String>>,
    #[serde(default = "default_health_check_interval", with = "duration_secs")]
    pub health_check_interval: Duration,

    // Timing
    #[serde(default = "default_startup_delay", with = "duration_secs")]
    pub startup_delay: Duration,
    #[serde(default = "default_monitor_interval", with = "duration_secs")]
    pub monitor_interval: Duration,
    #[serde(default = "default_stop_timeout", with = "duration_secs")]
    pub stop_timeout: Duration,
}

fn default_true() -> bool {
    true
}
fn default_max_memory_mb() -> u64 {
    defaults::DEFAULT_MAX_MEMORY_MB
}
fn default_max_cpu_percent() -> f64 {
    defaults::DEFAULT_MAX_CPU_PERCENT
}
fn default_max_restart_attempts() -> u32 {
    defaults::DEFAULT_MAX_RESTART_ATTEMPTS
}
fn default_restart_delay() -> Duration {
    defaults::DEFAULT_RESTART_DELAY
}
fn default_health_check_interval() -> Duration {
    defaults::DEFAULT_HEALTH_CHECK_INTERVAL
}
fn default_startup_delay() -> Duration {
    defaults::DEFAULT_STARTUP_DELAY
}
fn default_monitor_interval() -> Duration {
    defaults::DEFAULT_MONITOR_INTERVAL
}
fn default_stop_timeout() -> Duration {
    defaults::DEFAULT_STOP_TIMEOUT
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            working_dir: None,
            port: None,
            env_vars: HashMap::new(),
            max_memory_mb: default_max_memory_mb(),
            max_cpu_percent: default_max_cpu_percent(),
            restart_on_failure: true,
            max_restart_attempts: default_max_restart_attempts(),
            restart_delay: default_restart_delay(),
            restart_backoff: false,
            depends_on: Vec::new(),
            health_check: None,
            health_check_interval: default_health_check_interval(),
            startup_delay: default_startup_delay(),
            monitor_interval: default_monitor_interval(),
            stop_timeout: default_stop_timeout(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    pub fn with_limits(mut self, max_memory_mb: u64, max_cpu_percent: f64) -> Self {
        self.max_memory_mb = max_memory_mb;
        self.max_cpu_percent = max_cpu_percent;
        self
    }

    pub fn with_restart(mut self, enabled: bool, max_attempts: u32, delay: Duration) -> Self {
        self.restart_on_failure = enabled;
        self.max_restart_attempts = max_attempts;
        self.restart_delay = delay;
        self
    }

    pub fn with_restart_backoff(mut self, backoff: bool) -> Self {
        self.restart_backoff = backoff;
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn with_health_check(mut self, command: Vec<String>, interval: Duration) -> Self {
        self.health_check = Some(command);
        self.health_check_interval = interval;
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            enabled: self.restart_on_failure,
            max_attempts: self.max_restart_attempts,
            delay: self.restart_delay,
            backoff: self.restart_backoff,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::InvalidConfiguration(
                "service name cannot be empty".to_string(),
            ));
        }
        match self.command.first() {
            None => {
                return Err(DomainError::InvalidCommand(format!(
                    "service '{}' has an empty command",
                    self.name
                )));
            }
            Some(program) if program.trim().is_empty() => {
                return Err(DomainError::InvalidCommand(format!(
                    "service '{}' has an empty program name",
                    self.name
                )));
            }
            Some(_) => {}
        }
        if self.max_memory_mb == 0 {
            return Err(DomainError::InvalidConfiguration(format!(
                "service '{}': max_memory_mb must be greater than 0",
                self.name
            )));
        }
        if self.max_cpu_percent.is_nan() || self.max_cpu_percent <= 0.0 {
            return Err(DomainError::InvalidConfiguration(format!(
                "service '{}': max_cpu_percent must be greater than 0",
                self.name
            )));
        }
        if self.monitor_interval.is_zero() {
            return Err(DomainError::InvalidConfiguration(format!(
                "service '{}': monitor_interval must be greater than 0",
                self.name
            )));
        }
        if self.depends_on.iter().any(|dep| dep == &self.name) {
            return Err(DomainError::CircularDependency(self.name.clone()));
        }
        if let Some(check) = &self.health_check
            && check.is_empty()
        {
            return Err(DomainError::InvalidCommand(format!(
                "service '{}' has an empty health check command",
                self.name
            )));
        }
        Ok(())
    }
}

/// Crash-restart policy of a ManagedService
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub delay: Duration,
    /// Double the delay per consecutive restart, capped at 60s
    pub backoff: bool,
}

impl RestartPolicy {
    /// Whether another crash restart is allowed after `restarts_so_far`
    pub fn allows(&self, restarts_so_far: u32) -> bool {
        self.enabled && restarts_so_far < self.max_attempts
    }

    /// Delay before restart number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.backoff || attempt <= 1 {
            return self.delay;
        }
        let exponent = (attempt - 1).min(16);
        self.delay
            .saturating_mul(1u32 << exponent)
            .min(defaults::MAX_RESTART_BACKOFF.max(self.delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleeper(name: &str) -> ServiceConfig {
        ServiceConfig::new(name, vec!["/bin/sleep".into(), "30".into()])
    }

    #[test]
    fn test_defaults_from_minimal_json() {
        let config: ServiceConfig = serde_json::from_str(r#"{"command": ["python", "app.py"]}"#)
            .unwrap();
        assert!(config.restart_on_failure);
        assert_eq!(config.max_restart_attempts, 3);
        assert_eq!(config.restart_delay, Duration::from_secs(5));
        assert_eq!(config.startup_delay, Duration::from_secs(2));
        assert_eq!(config.max_memory_mb, 4096);
        assert!(config.depends_on.is_empty());
        assert!(config.port.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        assert!(sleeper("api").validate().is_ok());

        let empty_name = sleeper(" ");
        assert!(matches!(
            empty_name.validate(),
            Err(DomainError::InvalidConfiguration(_))
        ));

        let no_command = ServiceConfig::new("api", vec![]);
        assert!(matches!(
            no_command.validate(),
            Err(DomainError::InvalidCommand(_))
        ));

        let self_dep = sleeper("api").with_dependency("api");
        assert_eq!(
            self_dep.validate(),
            Err(DomainError::CircularDependency("api".into()))
        );

        let zero_memory = sleeper("api").with_limits(0, 50.0);
        assert!(zero_memory.validate().is_err());
    }

    #[test]
    fn test_restart_policy_limits() {
        let policy = sleeper("api")
            .with_restart(true, 2, Duration::from_secs(1))
            .restart_policy();
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));

        let disabled = sleeper("api")
            .with_restart(false, 5, Duration::from_secs(1))
            .restart_policy();
        assert!(!disabled.allows(0));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RestartPolicy {
            enabled: true,
            max_attempts: 10,
            delay: Duration::from_secs(5),
            backoff: true,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for(5), Duration::from_secs(60));
        assert_eq!(policy.delay_for(30), Duration::from_secs(60));

        let flat = RestartPolicy {
            backoff: false,
            ..policy
        };
        assert_eq!(flat.delay_for(4), Duration::from_secs(5));
    }
}
