//! Supervisor engine
//!
//! Launches, monitors and restarts long-running service processes, isolates
//! failing dependencies behind circuit breakers and polls service health.
//!
//! Layers follow the usual split:
//! - `domain`: value objects, ports and the supervision services
//! - `application`: the [`ProcessManager`] and its shared [`SupervisorContext`]
//! - `infrastructure`: sysinfo, network probes, config files and log alerting

pub mod application;
pub mod constants;
pub mod domain;
pub mod infrastructure;

pub use application::{
    ManagerCommand, ProcessManager, StatusSnapshot, SupervisorContext,
};
pub use domain::services::{
    CircuitBreaker, DependencyResolutionService, HealthMonitor, ManagedService,
};
pub use domain::{CircuitError, DomainError, Result};
