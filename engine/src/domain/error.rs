//! Domain-level errors

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    // Registry errors
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),

    // Validation errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    // Lifecycle errors
    #[error("Port {port} required by '{service}' is already in use")]
    PortInUse { service: String, port: u16 },

    #[error("Failed to spawn '{service}': {reason}")]
    SpawnFailed { service: String, reason: String },

    #[error("Service '{service}' exited during startup ({status})")]
    ExitedDuringStartup { service: String, status: String },

    // Dependency errors
    #[error("Required dependency '{dependency}' of '{service}' failed to start")]
    DependencyFailed { service: String, dependency: String },

    #[error("Service '{service}' requires '{dependency}' to be running")]
    DependencyNotRunning { service: String, dependency: String },

    #[error("Circular dependency detected at '{0}'")]
    CircularDependency(String),

    #[error("Services failed to start: {}", .0.join(", "))]
    PartialStart(Vec<String>),

    // Persistence errors
    #[error("Status snapshot error: {0}")]
    Snapshot(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;

/// Outcome of a call made through a [`crate::CircuitBreaker`]
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Rejected without running the operation
    #[error("Circuit breaker '{name}' is open, retry in {retry_after:?}")]
    Open { name: String, retry_after: Duration },

    #[error("Call through circuit breaker '{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("{0}")]
    Operation(E),
}

impl<E> CircuitError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The operation's own error, if it ran and failed
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_start_lists_services() {
        let err = DomainError::PartialStart(vec!["api".into(), "worker".into()]);
        assert_eq!(err.to_string(), "Services failed to start: api, worker");
    }

    #[test]
    fn test_circuit_error_accessors() {
        let open: CircuitError<String> = CircuitError::Open {
            name: "db".into(),
            retry_after: Duration::from_secs(3),
        };
        assert!(open.is_open());
        assert!(open.into_operation().is_none());

        let failed: CircuitError<String> = CircuitError::Operation("refused".into());
        assert_eq!(failed.to_string(), "refused");
        assert_eq!(failed.into_operation().as_deref(), Some("refused"));
    }
}
