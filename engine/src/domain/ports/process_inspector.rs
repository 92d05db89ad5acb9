//! Process table port
//! Implementations block; async callers go through `spawn_blocking`

use crate::domain::value_objects::{ProcessSample, SystemUsage};

pub trait ProcessInspector: Send + Sync {
    /// CPU and memory of a single pid, `None` if it is gone
    fn sample(&self, pid: u32) -> Option<ProcessSample>;

    /// First process whose name contains `pattern`
    fn find_by_name(&self, pattern: &str) -> Option<ProcessSample>;

    /// Used system memory in percent
    fn memory_percent(&self) -> f64;

    fn system_usage(&self) -> SystemUsage;
}
