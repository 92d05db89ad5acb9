//! Resource usage value objects
//! Samples taken from the process table and the reports built from them

use super::ServiceStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One point-in-time reading for a single OS process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

/// Host-wide usage, all values in percent
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_usage: f64,
}

/// Latest sample of a service next to its configured ceilings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: Option<f64>,
    pub memory_mb: Option<f64>,
    pub max_memory_mb: u64,
    pub max_cpu_percent: f64,
}

impl ResourceUsage {
    pub fn memory_exceeded(&self) -> bool {
        self.memory_mb
            .is_some_and(|mb| mb > self.max_memory_mb as f64)
    }

    pub fn cpu_exceeded(&self) -> bool {
        self.cpu_percent.is_some_and(|cpu| cpu > self.max_cpu_percent)
    }
}

/// Snapshot of one ManagedService, as written to the status file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub name: String,
    pub status: ServiceStatus,
    /// Seconds since the current process reached RUNNING, 0 otherwise
    pub uptime: f64,
    pub restart_count: u32,
    pub last_restart: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
    pub port: Option<u16>,
    pub resource_usage: ResourceUsage,
}
