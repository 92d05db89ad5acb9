pub mod circuit;
pub mod duration_secs;
pub mod health_check;
pub mod resource_usage;
pub mod sample_history;
pub mod service_config;
pub mod service_status;

pub use circuit::{CircuitBreakerConfig, CircuitBreakerStats, CircuitState, StateTransition};
pub use health_check::{
    CustomCheckFn, HealthCheckConfig, HealthCheckKind, HealthCheckResult, HealthCheckType,
    HealthEvent, HealthEventKind, HealthStatus,
};
pub use resource_usage::{ProcessSample, ResourceUsage, ServiceStats, SystemUsage};
pub use sample_history::SampleHistory;
pub use service_config::{RestartPolicy, ServiceConfig};
pub use service_status::ServiceStatus;
