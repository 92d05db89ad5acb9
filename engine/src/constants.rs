//! Supervisor defaults
//!
//! Grouped by the component that owns them.

/// ManagedService defaults
pub mod service {
    use std::time::Duration;

    /// Capacity of the CPU and memory sample rings
    pub const HISTORY_CAPACITY: usize = 60;

    pub const DEFAULT_MAX_MEMORY_MB: u64 = 4096;
    pub const DEFAULT_MAX_CPU_PERCENT: f64 = 90.0;

    pub const DEFAULT_MAX_RESTART_ATTEMPTS: u32 = 3;
    pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);

    /// Upper bound for exponential restart backoff
    pub const MAX_RESTART_BACKOFF: Duration = Duration::from_secs(60);

    pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(2);
    pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(5);
    pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

    /// Health check commands are killed after this long
    pub const HEALTH_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

    /// How long an exited child gets to flush its output pipes
    pub const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

    /// Grace period for a monitor task to exit before it is aborted
    pub const MONITOR_JOIN_TIMEOUT: Duration = Duration::from_secs(5);
}

/// ProcessManager defaults
pub mod manager {
    use std::time::Duration;

    pub const DEFAULT_STATUS_FILE: &str = "logs/process_status.json";
    pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

    /// System memory usage (percent) above which the run loop warns
    pub const SYSTEM_MEMORY_WARN_PERCENT: f64 = 90.0;
}

/// HealthMonitor defaults
pub mod health_check {
    use std::time::Duration;

    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_RETRIES: u32 = 3;
    pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);
    pub const DEFAULT_MAX_RESTARTS: u32 = 3;
    pub const DEFAULT_RESTART_WINDOW: Duration = Duration::from_secs(300);

    pub const EVENT_HISTORY_CAPACITY: usize = 1000;
    pub const REPORT_EVENT_COUNT: usize = 10;

    /// Breakers guarding HTTP/TCP probes
    pub const BREAKER_FAILURE_THRESHOLD: u32 = 5;
    pub const BREAKER_MIN_RESET_TIMEOUT: Duration = Duration::from_secs(1);
}

/// CircuitBreaker defaults
pub mod circuit_breaker {
    use std::time::Duration;

    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
    pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 3;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);
    pub const DEFAULT_WINDOW_SIZE: Duration = Duration::from_secs(60);
    pub const DEFAULT_BUCKET_COUNT: usize = 6;
    pub const DEFAULT_SLOW_CALL_DURATION: Duration = Duration::from_secs(5);
    pub const DEFAULT_SLOW_CALL_RATE_THRESHOLD: f64 = 0.5;

    /// Rate-based tripping needs at least this many calls in the window
    pub const MIN_CALLS_FOR_RATE: u64 = 10;
    pub const FAILURE_RATE_THRESHOLD: f64 = 0.5;

    pub const TRANSITION_HISTORY_CAPACITY: usize = 50;
    pub const REPORTED_TRANSITIONS: usize = 5;
}
