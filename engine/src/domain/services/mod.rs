pub mod circuit_breaker;
pub mod dependency_resolution_service;
pub mod health_monitor;
pub mod managed_service;
pub mod service_health;

pub use circuit_breaker::CircuitBreaker;
pub use dependency_resolution_service::{DependencyResolutionService, StartOrder};
pub use health_monitor::{
    HealthCallback, HealthMonitor, HealthReport, ProcessResourceUsage, ServiceHealthReport,
};
pub use managed_service::ManagedService;
pub use service_health::{HealthTransition, ServiceHealth, ServiceHealthSnapshot};
