//! Periodic health checking with rate-limited recovery
//!
//! Every registered service gets its own polling task. HTTP and TCP probes run
//! through a per-service [`CircuitBreaker`] so an unreachable target is not
//! hammered. When a service stays unhealthy for `retries` consecutive checks
//! the monitor asks a [`RestartHandler`] to restart it, at most `max_restarts`
//! times per rolling `restart_window`.

use crate::constants::health_check::{
    BREAKER_FAILURE_THRESHOLD, BREAKER_MIN_RESET_TIMEOUT, EVENT_HISTORY_CAPACITY,
    REPORT_EVENT_COUNT,
};
use crate::constants::service::MONITOR_JOIN_TIMEOUT;
use crate::domain::ports::{Alert, AlertSeverity, AlertSink, ProcessInspector, RestartHandler};
use crate::domain::services::CircuitBreaker;
use crate::domain::services::service_health::{
    HealthTransition, ServiceHealth, ServiceHealthSnapshot,
};
use crate::domain::value_objects::{
    CircuitBreakerConfig, HealthCheckConfig, HealthCheckKind, HealthCheckResult, HealthCheckType,
    HealthEvent, HealthEventKind, HealthStatus, SampleHistory,
};
use crate::domain::{CircuitError, DomainError, Result};
use crate::infrastructure::health_check_executor::{
    ProbeError, ProbeSuccess, probe_custom, probe_http, probe_process, probe_tcp,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Callback invoked on health transitions and restarts
pub type HealthCallback = Arc<dyn Fn(&HealthEvent) + Send + Sync>;

struct MonitoredService {
    config: HealthCheckConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    health: Mutex<ServiceHealth>,
}

struct Poller {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Callbacks {
    unhealthy: Vec<HealthCallback>,
    recovered: Vec<HealthCallback>,
    restarted: Vec<HealthCallback>,
}

/// CPU and memory of the checked process, from PROCESS checks
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProcessResourceUsage {
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceHealthReport {
    pub status: HealthStatus,
    pub check_type: HealthCheckType,
    /// Seconds since the service last became healthy
    pub uptime: f64,
    pub consecutive_failures: u32,
    pub restart_attempts: usize,
    pub resource_usage: Option<ProcessResourceUsage>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub overall_status: HealthStatus,
    pub services: BTreeMap<String, ServiceHealthReport>,
    pub recent_events: Vec<HealthEvent>,
}

pub struct HealthMonitor {
    inspector: Arc<dyn ProcessInspector>,
    alerts: Arc<dyn AlertSink>,
    client: reqwest::Client,
    services: RwLock<BTreeMap<String, Arc<MonitoredService>>>,
    events: Mutex<SampleHistory<HealthEvent>>,
    callbacks: RwLock<Callbacks>,
    restart_handler: RwLock<Option<Arc<dyn RestartHandler>>>,
    pollers: Mutex<HashMap<String, Poller>>,
    running: Mutex<Option<CancellationToken>>,
    weak_self: Weak<HealthMonitor>,
}

impl HealthMonitor {
    pub fn new(inspector: Arc<dyn ProcessInspector>, alerts: Arc<dyn AlertSink>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            inspector,
            alerts,
            client: reqwest::Client::new(),
            services: RwLock::new(BTreeMap::new()),
            events: Mutex::new(SampleHistory::new(EVENT_HISTORY_CAPACITY)),
            callbacks: RwLock::new(Callbacks::default()),
            restart_handler: RwLock::new(None),
            pollers: Mutex::new(HashMap::new()),
            running: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    /// Register (or replace) a service check
    ///
    /// When the monitor is already running the new check starts polling
    /// immediately.
    pub fn register_service(&self, config: HealthCheckConfig) -> Result<()> {
        config.validate()?;

        let breaker = match config.kind {
            HealthCheckKind::Http { .. } | HealthCheckKind::Tcp { .. } => {
                let reset_timeout = config.interval.saturating_mul(3).max(BREAKER_MIN_RESET_TIMEOUT);
                Some(CircuitBreaker::new(
                    CircuitBreakerConfig::new(format!("health-{}", config.name))
                        .with_failure_threshold(BREAKER_FAILURE_THRESHOLD)
                        .with_success_threshold(1)
                        .with_timeout(config.timeout.saturating_add(std::time::Duration::from_secs(1)))
                        .with_reset_timeout(reset_timeout),
                ))
            }
            HealthCheckKind::Process { .. } | HealthCheckKind::Custom(_) => None,
        };

        let name = config.name.clone();
        let service = Arc::new(MonitoredService {
            config,
            breaker,
            health: Mutex::new(ServiceHealth::default()),
        });

        if self
            .services
            .write()
            .insert(name.clone(), Arc::clone(&service))
            .is_some()
        {
            warn!(service = %name, "Health check re-registered, replacing previous configuration");
        }
        info!(
            service = %name,
            check_type = %service.config.check_type(),
            interval_ms = service.config.interval.as_millis() as u64,
            "Registered health check"
        );

        let running = self.running.lock().clone();
        if let Some(root) = running {
            self.spawn_poller(&root, service);
        }
        Ok(())
    }

    pub fn unregister_service(&self, name: &str) -> bool {
        if let Some(poller) = self.pollers.lock().remove(name) {
            poller.cancel.cancel();
        }
        self.services.write().remove(name).is_some()
    }

    pub fn set_restart_handler(&self, handler: Arc<dyn RestartHandler>) {
        *self.restart_handler.write() = Some(handler);
    }

    pub fn on_service_unhealthy<F>(&self, callback: F)
    where
        F: Fn(&HealthEvent) + Send + Sync + 'static,
    {
        self.callbacks.write().unhealthy.push(Arc::new(callback));
    }

    pub fn on_service_recovered<F>(&self, callback: F)
    where
        F: Fn(&HealthEvent) + Send + Sync + 'static,
    {
        self.callbacks.write().recovered.push(Arc::new(callback));
    }

    pub fn on_service_restarted<F>(&self, callback: F)
    where
        F: Fn(&HealthEvent) + Send + Sync + 'static,
    {
        self.callbacks.write().restarted.push(Arc::new(callback));
    }

    /// Launch one polling task per registered service
    pub fn start(&self) {
        let root = {
            let mut running = self.running.lock();
            if running.is_some() {
                warn!("Health monitor already running");
                return;
            }
            let root = CancellationToken::new();
            *running = Some(root.clone());
            root
        };

        let services: Vec<_> = self.services.read().values().cloned().collect();
        info!(services = services.len(), "Starting health monitor");
        for service in services {
            self.spawn_poller(&root, service);
        }
    }

    /// Cancel every polling task and wait for them within a grace period
    pub async fn stop(&self) {
        let Some(root) = self.running.lock().take() else {
            return;
        };
        root.cancel();

        let pollers: Vec<_> = self.pollers.lock().drain().collect();
        for (name, mut poller) in pollers {
            match tokio::time::timeout(MONITOR_JOIN_TIMEOUT, &mut poller.task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => warn!(service = %name, error = %e, "Health poller panicked"),
                Err(_) => {
                    warn!(service = %name, "Health poller did not stop in time, abandoning it");
                    poller.task.abort();
                }
            }
        }
        info!("Health monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Probe a service once without touching its recorded health
    pub async fn check_now(&self, name: &str) -> Result<HealthCheckResult> {
        let service = self
            .service(name)
            .ok_or_else(|| DomainError::ServiceNotFound(name.to_string()))?;
        Ok(self.perform_check(&service).await)
    }

    pub fn service_health(&self, name: &str) -> Option<ServiceHealthSnapshot> {
        self.service(name).map(|s| s.health.lock().snapshot())
    }

    pub fn breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.service(name).and_then(|s| s.breaker.clone())
    }

    /// HEALTHY iff every service is healthy, otherwise the worst status seen
    pub fn get_overall_status(&self) -> HealthStatus {
        let services = self.services.read();
        services
            .values()
            .map(|s| s.health.lock().status)
            .min_by_key(|status| status.severity_rank())
            .unwrap_or(HealthStatus::Healthy)
    }

    pub fn recent_events(&self, count: usize) -> Vec<HealthEvent> {
        let events = self.events.lock();
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn get_health_report(&self) -> HealthReport {
        let now = Utc::now();
        let services = self
            .services
            .read()
            .iter()
            .map(|(name, service)| {
                let health = service.health.lock();
                let uptime = health
                    .healthy_since
                    .map(|since| (now - since).num_milliseconds().max(0) as f64 / 1000.0)
                    .unwrap_or(0.0);
                let last = health.last_result.as_ref();
                let report = ServiceHealthReport {
                    status: health.status,
                    check_type: service.config.check_type(),
                    uptime,
                    consecutive_failures: health.consecutive_failures,
                    restart_attempts: health.restart_history().len(),
                    resource_usage: last.and_then(|r| {
                        Some(ProcessResourceUsage {
                            cpu_percent: r.metadata.get("cpu_percent")?.as_f64()?,
                            memory_mb: r.metadata.get("memory_mb")?.as_f64()?,
                        })
                    }),
                    last_check: last.map(|r| r.checked_at),
                    last_message: last.map(|r| r.message.clone()),
                };
                (name.clone(), report)
            })
            .collect();

        HealthReport {
            timestamp: now,
            overall_status: self.get_overall_status(),
            services,
            recent_events: self.recent_events(REPORT_EVENT_COUNT),
        }
    }

    // ─── Polling ────────────────────────────────────────────────────

    fn service(&self, name: &str) -> Option<Arc<MonitoredService>> {
        self.services.read().get(name).cloned()
    }

    fn spawn_poller(&self, root: &CancellationToken, service: Arc<MonitoredService>) {
        let cancel = root.child_token();
        let name = service.config.name.clone();
        let task = tokio::spawn(poll_loop(self.weak_self.clone(), service, cancel.clone()));
        if let Some(previous) = self.pollers.lock().insert(name, Poller { cancel, task }) {
            previous.cancel.cancel();
        }
    }

    async fn perform_check(&self, service: &MonitoredService) -> HealthCheckResult {
        let config = &service.config;
        let timeout = config.timeout;

        let outcome: std::result::Result<ProbeSuccess, String> = match &config.kind {
            HealthCheckKind::Http { url } => {
                let client = self.client.clone();
                let url = url.clone();
                self.guarded(service, move || async move { probe_http(&client, &url, timeout).await })
                    .await
            }
            HealthCheckKind::Tcp { host, port } => {
                let host = host.clone();
                let port = *port;
                self.guarded(service, move || async move { probe_tcp(&host, port, timeout).await })
                    .await
            }
            HealthCheckKind::Process { process_name } => {
                probe_process(Arc::clone(&self.inspector), process_name)
                    .await
                    .map_err(|e| e.to_string())
            }
            HealthCheckKind::Custom(predicate) => probe_custom(Arc::clone(predicate), timeout)
                .await
                .map_err(|e| e.to_string()),
        };

        match outcome {
            Ok(success) => {
                let mut result =
                    HealthCheckResult::healthy(&config.name, config.check_type(), success.message)
                        .with_metadata(success.metadata);
                if let Some(ms) = success.response_time_ms {
                    result = result.with_response_time(ms);
                }
                result
            }
            Err(message) => HealthCheckResult::unhealthy(&config.name, config.check_type(), message),
        }
    }

    async fn guarded<F, Fut>(
        &self,
        service: &MonitoredService,
        probe: F,
    ) -> std::result::Result<ProbeSuccess, String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<ProbeSuccess, ProbeError>>,
    {
        match &service.breaker {
            Some(breaker) => breaker.call(probe).await.map_err(|e| match e {
                CircuitError::Operation(probe_error) => probe_error.to_string(),
                other => other.to_string(),
            }),
            None => probe().await.map_err(|e| e.to_string()),
        }
    }

    async fn handle_result(&self, service: &MonitoredService, result: HealthCheckResult) {
        let config = &service.config;
        let name = config.name.as_str();
        let healthy = result.healthy;
        let message = result.message.clone();

        let (transition, status, failures) = {
            let mut health = service.health.lock();
            let transition = health.apply_result(result, config.failure_threshold());
            (transition, health.status, health.consecutive_failures)
        };

        if healthy {
            debug!(service = %name, message = %message, "Health check passed");
            self.record_event(HealthEvent::new(name, HealthEventKind::CheckPassed, status, &message));
        } else {
            warn!(
                service = %name,
                consecutive_failures = failures,
                message = %message,
                "Health check failed"
            );
            self.record_event(HealthEvent::new(name, HealthEventKind::CheckFailed, status, &message));
        }

        match transition {
            HealthTransition::BecameUnhealthy => {
                error!(service = %name, consecutive_failures = failures, "Service became unhealthy");
                let event = HealthEvent::new(name, HealthEventKind::BecameUnhealthy, status, &message);
                self.record_event(event.clone());
                self.alerts.send_alert(
                    Alert::new(
                        format!("Service {name} unhealthy"),
                        format!("{failures} consecutive failed health checks: {message}"),
                        AlertSeverity::Warning,
                        "health",
                    )
                    .for_service(name),
                );
                let callbacks = self.callbacks.read().unhealthy.clone();
                fire(&callbacks, &event);
            }
            HealthTransition::Recovered => {
                info!(service = %name, "Service recovered");
                let event = HealthEvent::new(name, HealthEventKind::Recovered, status, &message);
                self.record_event(event.clone());
                let callbacks = self.callbacks.read().recovered.clone();
                fire(&callbacks, &event);
            }
            HealthTransition::Unchanged => {}
        }

        if !healthy {
            self.maybe_restart(service).await;
        }
    }

    async fn maybe_restart(&self, service: &MonitoredService) {
        let config = &service.config;
        let name = config.name.as_str();

        if !config.restart_enabled {
            return;
        }
        if !service.health.lock().restart_due(config.failure_threshold()) {
            return;
        }

        let handler = config
            .restart_handler
            .clone()
            .or_else(|| self.restart_handler.read().clone());
        let Some(handler) = handler else {
            debug!(service = %name, "No restart handler configured, not restarting");
            return;
        };

        let allowed = {
            let mut health = service.health.lock();
            let now = Utc::now();
            if health.is_restart_allowed(config.max_restarts, config.restart_window, now) {
                health.record_restart_attempt(now);
                Ok(())
            } else {
                Err((health.mark_restart_suppressed(), health.status))
            }
        };

        if let Err((first_time, status)) = allowed {
            if first_time {
                warn!(
                    service = %name,
                    max_restarts = config.max_restarts,
                    window_secs = config.restart_window.as_secs(),
                    "Restart limit reached, not restarting"
                );
                self.record_event(HealthEvent::new(
                    name,
                    HealthEventKind::RestartSuppressed,
                    status,
                    "restart limit reached",
                ));
            }
            return;
        }

        info!(
            service = %name,
            delay_ms = config.restart_delay.as_millis() as u64,
            "Restarting unhealthy service"
        );
        if !config.restart_delay.is_zero() {
            tokio::time::sleep(config.restart_delay).await;
        }

        let status = service.health.lock().status;
        match handler.restart_service(name).await {
            Ok(()) => {
                info!(service = %name, "Service restarted by health monitor");
                if let Some(breaker) = &service.breaker {
                    breaker.reset();
                }
                let event = HealthEvent::new(name, HealthEventKind::Restarted, status, "restarted");
                self.record_event(event.clone());
                let callbacks = self.callbacks.read().restarted.clone();
                fire(&callbacks, &event);
            }
            Err(e) => {
                error!(service = %name, error = %e, "Restart failed");
                self.record_event(HealthEvent::new(
                    name,
                    HealthEventKind::RestartFailed,
                    status,
                    e.to_string(),
                ));
                self.alerts.send_alert(
                    Alert::new(
                        format!("Restart of {name} failed"),
                        e.to_string(),
                        AlertSeverity::Critical,
                        "health",
                    )
                    .for_service(name),
                );
            }
        }
    }

    fn record_event(&self, event: HealthEvent) {
        self.events.lock().push(event);
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(root) = self.running.get_mut().take() {
            root.cancel();
        }
    }
}

async fn poll_loop(monitor: Weak<HealthMonitor>, service: Arc<MonitoredService>, cancel: CancellationToken) {
    let name = service.config.name.clone();
    let mut ticker = tokio::time::interval(service.config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    debug!(service = %name, "Health poller started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(monitor) = monitor.upgrade() else {
            break;
        };
        let iteration = async {
            let result = monitor.perform_check(&service).await;
            monitor.handle_result(&service, result).await;
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = iteration => {}
        }
    }

    debug!(service = %name, "Health poller stopped");
}

fn fire(callbacks: &[HealthCallback], event: &HealthEvent) {
    for callback in callbacks {
        if std::panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            error!(service = %event.service, kind = ?event.kind, "Health callback panicked");
        }
    }
}
