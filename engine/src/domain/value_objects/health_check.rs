//! Health check value objects
//! Domain model for service health polling

use crate::constants::health_check as defaults;
use crate::domain::ports::RestartHandler;
use crate::domain::{DomainError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Predicate for CUSTOM checks: `Ok((healthy, message))`, errors count as unhealthy
pub type CustomCheckFn = Arc<dyn Fn() -> anyhow::Result<(bool, String)> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckType {
    Http,
    Tcp,
    Process,
    Custom,
}

impl fmt::Display for HealthCheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Tcp => write!(f, "tcp"),
            Self::Process => write!(f, "process"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// What to probe
#[derive(Clone)]
pub enum HealthCheckKind {
    /// GET `url`; status < 400 is healthy
    Http { url: String },
    /// Bare TCP connect
    Tcp { host: String, port: u16 },
    /// Substring match against process names
    Process { process_name: String },
    Custom(CustomCheckFn),
}

impl HealthCheckKind {
    pub fn check_type(&self) -> HealthCheckType {
        match self {
            Self::Http { .. } => HealthCheckType::Http,
            Self::Tcp { .. } => HealthCheckType::Tcp,
            Self::Process { .. } => HealthCheckType::Process,
            Self::Custom(_) => HealthCheckType::Custom,
        }
    }
}

impl fmt::Debug for HealthCheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { url } => f.debug_struct("Http").field("url", url).finish(),
            Self::Tcp { host, port } => f
                .debug_struct("Tcp")
                .field("host", host)
                .field("port", port)
                .finish(),
            Self::Process { process_name } => f
                .debug_struct("Process")
                .field("process_name", process_name)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(<predicate>)"),
        }
    }
}

/// Health check configuration value object
#[derive(Clone)]
pub struct HealthCheckConfig {
    /// Service name; also the name handed to the restart handler
    pub name: String,
    pub kind: HealthCheckKind,

    // Timing configuration
    pub interval: Duration,
    pub timeout: Duration,
    /// Consecutive failures before the service is unhealthy
    pub retries: u32,

    // Restart action
    pub restart_enabled: bool,
    pub restart_delay: Duration,
    pub max_restarts: u32,
    pub restart_window: Duration,
    /// Overrides the monitor-wide restart handler for this service
    pub restart_handler: Option<Arc<dyn RestartHandler>>,
}

impl HealthCheckConfig {
    fn with_kind(name: impl Into<String>, kind: HealthCheckKind) -> Self {
        Self {
            name: name.into(),
            kind,
            interval: defaults::DEFAULT_INTERVAL,
            timeout: defaults::DEFAULT_TIMEOUT,
            retries: defaults::DEFAULT_RETRIES,
            restart_enabled: true,
            restart_delay: defaults::DEFAULT_RESTART_DELAY,
            max_restarts: defaults::DEFAULT_MAX_RESTARTS,
            restart_window: defaults::DEFAULT_RESTART_WINDOW,
            restart_handler: None,
        }
    }

    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_kind(name, HealthCheckKind::Http { url: url.into() })
    }

    pub fn tcp(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self::with_kind(
            name,
            HealthCheckKind::Tcp {
                host: host.into(),
                port,
            },
        )
    }

    pub fn process(name: impl Into<String>, process_name: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            HealthCheckKind::Process {
                process_name: process_name.into(),
            },
        )
    }

    pub fn custom<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn() -> anyhow::Result<(bool, String)> + Send + Sync + 'static,
    {
        Self::with_kind(name, HealthCheckKind::Custom(Arc::new(predicate)))
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_restart(mut self, max_restarts: u32, window: Duration, delay: Duration) -> Self {
        self.restart_enabled = true;
        self.max_restarts = max_restarts;
        self.restart_window = window;
        self.restart_delay = delay;
        self
    }

    pub fn without_restart(mut self) -> Self {
        self.restart_enabled = false;
        self
    }

    pub fn with_restart_handler(mut self, handler: Arc<dyn RestartHandler>) -> Self {
        self.restart_handler = Some(handler);
        self
    }

    pub fn check_type(&self) -> HealthCheckType {
        self.kind.check_type()
    }

    /// Failure count that turns the service unhealthy; 0 retries behaves like 1
    pub fn failure_threshold(&self) -> u32 {
        self.retries.max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::InvalidConfiguration(
                "health check name cannot be empty".to_string(),
            ));
        }
        if self.interval.is_zero() {
            return Err(DomainError::InvalidConfiguration(format!(
                "health check '{}': interval must be greater than 0",
                self.name
            )));
        }
        if self.timeout.is_zero() {
            return Err(DomainError::InvalidConfiguration(format!(
                "health check '{}': timeout must be greater than 0",
                self.name
            )));
        }

        match &self.kind {
            HealthCheckKind::Http { url } => {
                if url.trim().is_empty() {
                    return Err(DomainError::InvalidConfiguration(format!(
                        "health check '{}': HTTP url cannot be empty",
                        self.name
                    )));
                }
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(DomainError::InvalidConfiguration(format!(
                        "health check '{}': url must start with http:// or https://",
                        self.name
                    )));
                }
            }
            HealthCheckKind::Tcp { host, port } => {
                if host.trim().is_empty() {
                    return Err(DomainError::InvalidConfiguration(format!(
                        "health check '{}': TCP host cannot be empty",
                        self.name
                    )));
                }
                if *port == 0 {
                    return Err(DomainError::InvalidConfiguration(format!(
                        "health check '{}': TCP port must be greater than 0",
                        self.name
                    )));
                }
            }
            HealthCheckKind::Process { process_name } => {
                if process_name.trim().is_empty() {
                    return Err(DomainError::InvalidConfiguration(format!(
                        "health check '{}': process name cannot be empty",
                        self.name
                    )));
                }
            }
            HealthCheckKind::Custom(_) => {}
        }

        Ok(())
    }
}

impl fmt::Debug for HealthCheckConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthCheckConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("restart_enabled", &self.restart_enabled)
            .field("restart_delay", &self.restart_delay)
            .field("max_restarts", &self.max_restarts)
            .field("restart_window", &self.restart_window)
            .field("restart_handler", &self.restart_handler.is_some())
            .finish()
    }
}

/// Health status of a monitored service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Failing, but below the retry threshold
    Degraded,
    /// Registered, no conclusive result yet
    #[default]
    Starting,
    Unhealthy,
}

impl HealthStatus {
    /// Lower is worse
    pub fn severity_rank(self) -> u8 {
        match self {
            Self::Unhealthy => 0,
            Self::Degraded => 1,
            Self::Starting => 2,
            Self::Healthy => 3,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Starting => write!(f, "starting"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Outcome of a single probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub service: String,
    pub check_type: HealthCheckType,
    pub healthy: bool,
    pub message: String,
    pub response_time_ms: Option<f64>,
    pub checked_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl HealthCheckResult {
    pub fn healthy(
        service: impl Into<String>,
        check_type: HealthCheckType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            check_type,
            healthy: true,
            message: message.into(),
            response_time_ms: None,
            checked_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn unhealthy(
        service: impl Into<String>,
        check_type: HealthCheckType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            healthy: false,
            ..Self::healthy(service, check_type, message)
        }
    }

    pub fn with_response_time(mut self, response_time_ms: f64) -> Self {
        self.response_time_ms = Some(response_time_ms);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthEventKind {
    CheckPassed,
    CheckFailed,
    BecameUnhealthy,
    Recovered,
    Restarted,
    RestartFailed,
    RestartSuppressed,
}

/// Entry in the monitor's event history; also the payload of callbacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEvent {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub kind: HealthEventKind,
    pub status: HealthStatus,
    pub message: String,
}

impl HealthEvent {
    pub fn new(
        service: impl Into<String>,
        kind: HealthEventKind,
        status: HealthStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            service: service.into(),
            kind,
            status,
            message: message.into(),
        }
    }
}
