//! Circuit breaker for calls into supervised services.
//!
//! Wraps an async operation, records every outcome in a sliding window and
//! rejects calls outright while the protected target is considered down.
//!
//! # State Machine
//!
//! ```text
//!   Closed ──(failure_threshold consecutive failures)──> Open
//!   Closed ──(window failure rate > 50% or slow rate > threshold)──> Open
//!   Open ──(reset_timeout elapsed, next call)──> HalfOpen
//!   HalfOpen ──(success_threshold consecutive successes)──> Closed
//!   HalfOpen ──(any failure)──> Open
//! ```
//!
//! Rate rules only apply once the window holds at least 10 calls. A call that
//! exceeds `timeout` is abandoned and counts as both failed and slow.
//!
//! # Window
//!
//! The window is `bucket_count` buckets of `window_size / bucket_count` each.
//! When created inside a tokio runtime the breaker spawns a rotation task that
//! clears the oldest bucket every period; the task stops when the breaker is
//! dropped.

use crate::constants::circuit_breaker::{
    FAILURE_RATE_THRESHOLD, MIN_CALLS_FOR_RATE, REPORTED_TRANSITIONS,
    TRANSITION_HISTORY_CAPACITY,
};
use crate::domain::CircuitError;
use crate::domain::value_objects::{
    CircuitBreakerConfig, CircuitBreakerStats, CircuitState, StateTransition,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ─── State ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    calls: u64,
    failures: u64,
    slow: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    state_changed_at: Instant,

    buckets: Vec<Bucket>,
    current_bucket: usize,

    /// Trial calls admitted since entering HalfOpen
    half_open_admitted: u32,
    consecutive_failures: u32,
    consecutive_successes: u32,

    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    rejected_calls: u64,
    slow_calls: u64,

    last_failure_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,
    transitions: VecDeque<StateTransition>,
}

impl BreakerState {
    fn new(bucket_count: usize) -> Self {
        Self {
            state: CircuitState::Closed,
            state_changed_at: Instant::now(),
            buckets: vec![Bucket::default(); bucket_count.max(1)],
            current_bucket: 0,
            half_open_admitted: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
            slow_calls: 0,
            last_failure_time: None,
            last_success_time: None,
            transitions: VecDeque::new(),
        }
    }

    fn window_totals(&self) -> Bucket {
        self.buckets.iter().fold(Bucket::default(), |acc, b| Bucket {
            calls: acc.calls + b.calls,
            failures: acc.failures + b.failures,
            slow: acc.slow + b.slow,
        })
    }

    fn clear_window(&mut self) {
        for bucket in &mut self.buckets {
            *bucket = Bucket::default();
        }
    }
}

// ─── Circuit Breaker ────────────────────────────────────────────────────────

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    rotation: CancellationToken,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        let breaker = Arc::new(Self {
            state: Mutex::new(BreakerState::new(config.bucket_count)),
            config,
            rotation: CancellationToken::new(),
        });
        breaker.spawn_rotation();
        breaker
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Run `operation` through the breaker
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.acquire_permission()?;

        let started = Instant::now();
        match tokio::time::timeout(self.config.timeout, operation()).await {
            Ok(Ok(value)) => {
                self.record_outcome(started.elapsed(), true, false);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record_outcome(started.elapsed(), false, false);
                Err(CircuitError::Operation(err))
            }
            Err(_) => {
                warn!(
                    breaker = %self.config.name,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "Call timed out"
                );
                self.record_outcome(started.elapsed(), false, true);
                Err(CircuitError::Timeout {
                    name: self.config.name.clone(),
                    timeout: self.config.timeout,
                })
            }
        }
    }

    /// Force CLOSED and zero every counter
    pub fn reset(&self) {
        let mut state = self.state.lock();
        self.transition(&mut state, CircuitState::Closed, "manual reset");
        state.clear_window();
        state.half_open_admitted = 0;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.total_calls = 0;
        state.successful_calls = 0;
        state.failed_calls = 0;
        state.rejected_calls = 0;
        state.slow_calls = 0;
        state.last_failure_time = None;
        state.last_success_time = None;
        info!(breaker = %self.config.name, "Circuit breaker reset");
    }

    /// Trip the breaker regardless of recorded outcomes
    pub fn force_open(&self, reason: &str) {
        let mut state = self.state.lock();
        self.transition(&mut state, CircuitState::Open, reason);
    }

    pub fn get_stats(&self) -> CircuitBreakerStats {
        let state = self.state.lock();
        let window = state.window_totals();
        let rate = |n: u64| {
            if window.calls == 0 {
                0.0
            } else {
                n as f64 / window.calls as f64
            }
        };
        let skip = state.transitions.len().saturating_sub(REPORTED_TRANSITIONS);

        CircuitBreakerStats {
            name: self.config.name.clone(),
            state: state.state,
            total_calls: state.total_calls,
            successful_calls: state.successful_calls,
            failed_calls: state.failed_calls,
            rejected_calls: state.rejected_calls,
            slow_calls: state.slow_calls,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            failure_rate: rate(window.failures),
            slow_call_rate: rate(window.slow),
            window_calls: window.calls,
            last_failure_time: state.last_failure_time,
            last_success_time: state.last_success_time,
            recent_transitions: state.transitions.iter().skip(skip).cloned().collect(),
        }
    }

    // ─── Internal ───────────────────────────────────────────────────

    fn acquire_permission<E>(&self) -> Result<(), CircuitError<E>> {
        let mut state = self.state.lock();
        let current = state.state;
        match current {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = state.state_changed_at.elapsed();
                if elapsed >= self.config.reset_timeout {
                    self.transition(&mut state, CircuitState::HalfOpen, "reset timeout elapsed");
                    state.half_open_admitted = 1;
                    Ok(())
                } else {
                    state.rejected_calls += 1;
                    debug!(breaker = %self.config.name, "Rejecting call, circuit open");
                    Err(CircuitError::Open {
                        name: self.config.name.clone(),
                        retry_after: self.config.reset_timeout - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_admitted < self.config.success_threshold {
                    state.half_open_admitted += 1;
                    Ok(())
                } else {
                    state.rejected_calls += 1;
                    debug!(breaker = %self.config.name, "Rejecting call, trial calls exhausted");
                    Err(CircuitError::Open {
                        name: self.config.name.clone(),
                        retry_after: Duration::ZERO,
                    })
                }
            }
        }
    }

    /// Record one completed call; applies at most one transition
    fn record_outcome(&self, duration: Duration, succeeded: bool, timed_out: bool) {
        let mut state = self.state.lock();
        let slow = timed_out || duration >= self.config.slow_call_duration;

        let current = state.current_bucket;
        let bucket = &mut state.buckets[current];
        bucket.calls += 1;
        if !succeeded {
            bucket.failures += 1;
        }
        if slow {
            bucket.slow += 1;
        }

        state.total_calls += 1;
        if slow {
            state.slow_calls += 1;
        }

        let state_now = state.state;

        if succeeded {
            state.successful_calls += 1;
            state.consecutive_successes += 1;
            state.consecutive_failures = 0;
            state.last_success_time = Some(Utc::now());

            match state_now {
                CircuitState::HalfOpen
                    if state.consecutive_successes >= self.config.success_threshold =>
                {
                    let reason = format!(
                        "{} consecutive successful trial calls",
                        state.consecutive_successes
                    );
                    self.transition(&mut state, CircuitState::Closed, &reason);
                }
                CircuitState::Closed => {
                    if let Some(reason) = self.window_trip_reason(&state) {
                        self.transition(&mut state, CircuitState::Open, &reason);
                    }
                }
                _ => {}
            }
        } else {
            state.failed_calls += 1;
            state.consecutive_failures += 1;
            state.consecutive_successes = 0;
            state.last_failure_time = Some(Utc::now());

            match state_now {
                CircuitState::HalfOpen => {
                    self.transition(&mut state, CircuitState::Open, "trial call failed");
                }
                CircuitState::Closed => {
                    let reason = if state.consecutive_failures >= self.config.failure_threshold {
                        Some(format!(
                            "{} consecutive failures",
                            state.consecutive_failures
                        ))
                    } else {
                        self.window_trip_reason(&state)
                    };
                    if let Some(reason) = reason {
                        self.transition(&mut state, CircuitState::Open, &reason);
                    }
                }
                CircuitState::Open => {}
            }
        }
    }

    fn window_trip_reason(&self, state: &BreakerState) -> Option<String> {
        let window = state.window_totals();
        if window.calls < MIN_CALLS_FOR_RATE {
            return None;
        }
        let failure_rate = window.failures as f64 / window.calls as f64;
        if failure_rate > FAILURE_RATE_THRESHOLD {
            return Some(format!(
                "failure rate {:.0}% over {} calls",
                failure_rate * 100.0,
                window.calls
            ));
        }
        let slow_rate = window.slow as f64 / window.calls as f64;
        if slow_rate > self.config.slow_call_rate_threshold {
            return Some(format!(
                "slow call rate {:.0}% over {} calls",
                slow_rate * 100.0,
                window.calls
            ));
        }
        None
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState, reason: &str) {
        let from = state.state;
        if from == to {
            return;
        }

        state.state = to;
        state.state_changed_at = Instant::now();
        state.half_open_admitted = 0;
        state.consecutive_successes = 0;
        if to == CircuitState::Closed {
            state.consecutive_failures = 0;
            state.clear_window();
        }

        if state.transitions.len() == TRANSITION_HISTORY_CAPACITY {
            state.transitions.pop_front();
        }
        state.transitions.push_back(StateTransition {
            from,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });

        match to {
            CircuitState::Open => warn!(
                breaker = %self.config.name,
                from = %from,
                reason,
                "Circuit breaker opened"
            ),
            _ => info!(
                breaker = %self.config.name,
                from = %from,
                to = %to,
                reason,
                "Circuit breaker state changed"
            ),
        }
    }

    /// Advance to the next bucket, discarding its old contents
    pub(crate) fn rotate_bucket(&self) {
        let mut state = self.state.lock();
        let next = (state.current_bucket + 1) % state.buckets.len();
        state.current_bucket = next;
        state.buckets[next] = Bucket::default();
    }

    fn spawn_rotation(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(
                breaker = %self.config.name,
                "No tokio runtime, sliding window will not rotate"
            );
            return;
        };

        let breaker = Arc::downgrade(self);
        let token = self.rotation.clone();
        let period = self.config.bucket_duration();

        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match breaker.upgrade() {
                    Some(breaker) => breaker.rotate_bucket(),
                    None => break,
                }
            }
        });
    }
}

impl Drop for CircuitBreaker {
    fn drop(&mut self) {
        self.rotation.cancel();
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .finish()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
