//! Circuit breaker value objects

use crate::constants::circuit_breaker as defaults;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, all calls admitted
    #[default]
    Closed,
    /// Failing, calls rejected until the reset timeout elapses
    Open,
    /// Probing with a limited number of trial calls
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub name: String,
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,
    /// Per-call deadline
    pub timeout: Duration,
    /// Time spent open before trial calls are let through
    pub reset_timeout: Duration,
    pub window_size: Duration,
    pub bucket_count: usize,
    pub slow_call_duration: Duration,
    pub slow_call_rate_threshold: f64,
}

impl CircuitBreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_threshold: defaults::DEFAULT_FAILURE_THRESHOLD,
            success_threshold: defaults::DEFAULT_SUCCESS_THRESHOLD,
            timeout: defaults::DEFAULT_TIMEOUT,
            reset_timeout: defaults::DEFAULT_RESET_TIMEOUT,
            window_size: defaults::DEFAULT_WINDOW_SIZE,
            bucket_count: defaults::DEFAULT_BUCKET_COUNT,
            slow_call_duration: defaults::DEFAULT_SLOW_CALL_DURATION,
            slow_call_rate_threshold: defaults::DEFAULT_SLOW_CALL_RATE_THRESHOLD,
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }

    pub fn with_window(mut self, window_size: Duration, bucket_count: usize) -> Self {
        self.window_size = window_size;
        self.bucket_count = bucket_count.max(1);
        self
    }

    pub fn with_slow_calls(mut self, duration: Duration, rate_threshold: f64) -> Self {
        self.slow_call_duration = duration;
        self.slow_call_rate_threshold = rate_threshold;
        self
    }

    /// Rotation period of the sliding window buckets
    pub fn bucket_duration(&self) -> Duration {
        let buckets = self.bucket_count.max(1) as u32;
        (self.window_size / buckets).max(Duration::from_millis(1))
    }
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub slow_calls: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Failure rate over the sliding window, 0.0..=1.0
    pub failure_rate: f64,
    pub slow_call_rate: f64,
    pub window_calls: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    /// Most recent transitions, oldest first
    pub recent_transitions: Vec<StateTransition>,
}
