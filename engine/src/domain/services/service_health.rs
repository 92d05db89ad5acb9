use crate::domain::value_objects::{HealthCheckResult, HealthStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// How a single result moved the service's health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    Unchanged,
    BecameUnhealthy,
    Recovered,
}

/// Mutable health record of one monitored service
///
/// Written only by that service's polling task.
#[derive(Debug)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub last_result: Option<HealthCheckResult>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub healthy_since: Option<DateTime<Utc>>,
    /// Failures since the last restart attempt; gates the next one
    failures_since_restart: u32,
    /// Attempts inside the current window, oldest first
    restart_history: VecDeque<DateTime<Utc>>,
    restart_suppressed: bool,
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Starting,
            last_result: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
            healthy_since: None,
            failures_since_restart: 0,
            restart_history: VecDeque::new(),
            restart_suppressed: false,
        }
    }
}

impl ServiceHealth {
    /// Fold one check result into the counters and status
    ///
    /// Once unhealthy, a service stays unhealthy until a check passes.
    pub fn apply_result(&mut self, result: HealthCheckResult, failure_threshold: u32) -> HealthTransition {
        let previous = self.status;

        if result.healthy {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
            self.failures_since_restart = 0;
            self.status = HealthStatus::Healthy;
            if previous != HealthStatus::Healthy {
                self.healthy_since = Some(result.checked_at);
            }
            self.restart_suppressed = false;
        } else {
            self.consecutive_failures += 1;
            self.failures_since_restart += 1;
            self.consecutive_successes = 0;
            self.status = if previous == HealthStatus::Unhealthy
                || self.consecutive_failures >= failure_threshold
            {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Degraded
            };
            self.healthy_since = None;
        }
        self.last_result = Some(result);

        match (previous, self.status) {
            (HealthStatus::Unhealthy, HealthStatus::Unhealthy) => HealthTransition::Unchanged,
            (_, HealthStatus::Unhealthy) => HealthTransition::BecameUnhealthy,
            (HealthStatus::Unhealthy, HealthStatus::Healthy) => HealthTransition::Recovered,
            _ => HealthTransition::Unchanged,
        }
    }

    /// Enough failures have piled up since the last attempt to try again
    pub fn restart_due(&self, failure_threshold: u32) -> bool {
        self.status == HealthStatus::Unhealthy && self.failures_since_restart >= failure_threshold
    }

    /// Drop attempts older than `window`, then check whether another attempt fits
    pub fn is_restart_allowed(&mut self, max_restarts: u32, window: Duration, now: DateTime<Utc>) -> bool {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        while let Some(oldest) = self.restart_history.front() {
            if now.signed_duration_since(*oldest) < window {
                break;
            }
            self.restart_history.pop_front();
        }
        (self.restart_history.len() as u64) < u64::from(max_restarts)
    }

    pub fn record_restart_attempt(&mut self, at: DateTime<Utc>) {
        let position = self.restart_history.partition_point(|attempt| *attempt <= at);
        self.restart_history.insert(position, at);
        self.failures_since_restart = 0;
        self.restart_suppressed = false;
    }

    /// True the first time a restart is suppressed since the last attempt or recovery
    pub fn mark_restart_suppressed(&mut self) -> bool {
        !std::mem::replace(&mut self.restart_suppressed, true)
    }

    pub fn restart_history(&self) -> Vec<DateTime<Utc>> {
        self.restart_history.iter().copied().collect()
    }

    pub fn snapshot(&self) -> ServiceHealthSnapshot {
        ServiceHealthSnapshot {
            status: self.status,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            restart_history: self.restart_history(),
            last_result: self.last_result.clone(),
        }
    }
}

/// Point-in-time copy of a service's health
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceHealthSnapshot {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub restart_history: Vec<DateTime<Utc>>,
    pub last_result: Option<HealthCheckResult>,
}
