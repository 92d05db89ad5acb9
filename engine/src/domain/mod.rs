pub mod error;
pub mod ports;
pub mod services;
pub mod value_objects;

pub use error::{CircuitError, DomainError, Result};
pub use ports::{Alert, AlertSeverity, AlertSink, ProcessInspector, RestartHandler};
pub use value_objects::{
    CircuitBreakerConfig, CircuitBreakerStats, CircuitState, HealthCheckConfig, HealthCheckKind,
    HealthCheckResult, HealthCheckType, HealthEvent, HealthEventKind, HealthStatus, ProcessSample,
    ResourceUsage, RestartPolicy, SampleHistory, ServiceConfig, ServiceStats, ServiceStatus,
    StateTransition, SystemUsage,
};
