//! Named collection of managed services
//!
//! Starts services in dependency order, stops them in reverse registration
//! order, serves queued commands and periodically persists a status snapshot.

use crate::application::context::SupervisorContext;
use crate::application::snapshot::StatusSnapshot;
use crate::constants::manager::{DEFAULT_STATUS_FILE, DEFAULT_TICK, SYSTEM_MEMORY_WARN_PERCENT};
use crate::domain::ports::RestartHandler;
use crate::domain::services::{DependencyResolutionService, ManagedService};
use crate::domain::value_objects::{HealthCheckConfig, ServiceConfig, ServiceStatus, SystemUsage};
use crate::domain::{DomainError, Result};
use crate::infrastructure::config::{ConfigError, load_file};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Commands accepted by the run loop
#[derive(Debug)]
pub enum ManagerCommand {
    Start(String),
    Stop(String),
    Restart(String),
    Status(oneshot::Sender<StatusSnapshot>),
}

#[derive(Default)]
struct Registry {
    services: HashMap<String, Arc<ManagedService>>,
    /// Registration order, used for start tie-breaking and reverse shutdown
    order: Vec<String>,
}

pub struct ProcessManager {
    context: SupervisorContext,
    registry: RwLock<Registry>,
    status_file: PathBuf,
    tick: Duration,
    command_tx: mpsc::UnboundedSender<ManagerCommand>,
    command_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ManagerCommand>>,
    shutdown: CancellationToken,
}

impl ProcessManager {
    pub fn new(context: SupervisorContext) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            context,
            registry: RwLock::new(Registry::default()),
            status_file: PathBuf::from(DEFAULT_STATUS_FILE),
            tick: DEFAULT_TICK,
            command_tx,
            command_rx: tokio::sync::Mutex::new(command_rx),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_status_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.status_file = path.into();
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn status_file(&self) -> &Path {
        &self.status_file
    }

    /// Register a service; an existing registration under the same name is replaced
    pub fn add_service(&self, config: ServiceConfig) -> Result<()> {
        let name = config.name.clone();
        let service = ManagedService::new(config, Arc::clone(&self.context.inspector))?;

        let mut registry = self.registry.write();
        if registry.services.insert(name.clone(), service).is_some() {
            warn!(service = %name, "Service re-registered, replacing previous configuration");
        } else {
            registry.order.push(name.clone());
        }
        info!(service = %name, "Registered service");
        Ok(())
    }

    /// Register every service of a config file and hand back its health checks
    pub fn load_config(&self, path: &Path) -> std::result::Result<Vec<HealthCheckConfig>, ConfigError> {
        let loaded = load_file(path)?;
        for service in loaded.services {
            let name = service.name.clone();
            self.add_service(service)
                .map_err(|source| ConfigError::Invalid { name, source })?;
        }
        info!(path = %path.display(), services = self.len(), "Configuration loaded");
        Ok(loaded.health_checks)
    }

    pub fn service(&self, name: &str) -> Option<Arc<ManagedService>> {
        self.registry.read().services.get(name).cloned()
    }

    /// Service names in registration order
    pub fn service_names(&self) -> Vec<String> {
        self.registry.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.registry.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, name: &str) -> Result<Arc<ManagedService>> {
        self.service(name).ok_or_else(|| {
            error!(service = %name, "Unknown service");
            DomainError::ServiceNotFound(name.to_string())
        })
    }

    fn registered(&self) -> Vec<Arc<ManagedService>> {
        let registry = self.registry.read();
        registry
            .order
            .iter()
            .filter_map(|name| registry.services.get(name).cloned())
            .collect()
    }

    // ─── Lifecycle ──────────────────────────────────────────────────

    /// Start a service after making sure each of its dependencies is running
    pub async fn start_service(&self, name: &str) -> Result<()> {
        let mut chain = Vec::new();
        self.start_with_dependencies(name, &mut chain).await
    }

    fn start_with_dependencies<'a>(
        &'a self,
        name: &'a str,
        chain: &'a mut Vec<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let service = self.lookup(name)?;

            if chain.iter().any(|n| n == name) {
                chain.push(name.to_string());
                let cycle = chain.join(" -> ");
                error!(service = %name, cycle = %cycle, "Dependency cycle");
                return Err(DomainError::CircularDependency(cycle));
            }
            chain.push(name.to_string());

            for dependency in &service.config().depends_on {
                let running = self
                    .service(dependency)
                    .is_some_and(|dep| dep.status() == ServiceStatus::Running);
                if running {
                    continue;
                }

                info!(service = %name, dependency = %dependency, "Starting dependency");
                let started = self.start_with_dependencies(dependency, chain).await;
                let dependency_running = self
                    .service(dependency)
                    .is_some_and(|dep| dep.status() == ServiceStatus::Running);

                match started {
                    Err(e) => {
                        error!(service = %name, dependency = %dependency, error = %e, "Dependency failed to start");
                        return Err(DomainError::DependencyFailed {
                            service: name.to_string(),
                            dependency: dependency.clone(),
                        });
                    }
                    Ok(()) if !dependency_running => {
                        error!(service = %name, dependency = %dependency, "Dependency is not running");
                        return Err(DomainError::DependencyNotRunning {
                            service: name.to_string(),
                            dependency: dependency.clone(),
                        });
                    }
                    Ok(()) => {}
                }
            }

            chain.pop();
            service.start().await
        })
    }

    pub async fn stop_service(&self, name: &str) -> Result<()> {
        let service = self.lookup(name)?;
        service.stop(service.config().stop_timeout).await
    }

    pub async fn restart_service(&self, name: &str) -> Result<()> {
        let service = self.lookup(name)?;
        service.restart().await
    }

    /// Start everything in dependency order
    ///
    /// Services whose dependencies are not running are skipped, cycle members
    /// are never started. Every service that did not end up running is named
    /// in the returned `PartialStart`.
    pub async fn start_all(&self) -> Result<()> {
        let services = self.registered();
        let configs: Vec<&ServiceConfig> = services.iter().map(|s| s.config()).collect();
        let order = DependencyResolutionService::compute_start_order(&configs);

        let mut failed = Vec::new();
        if !order.cyclic.is_empty() {
            error!(services = ?order.cyclic, "Dependency cycle, not starting these services");
            failed.extend(order.cyclic.iter().cloned());
        }

        for (service, dependency) in &order.missing {
            warn!(service = %service, dependency = %dependency, "Unknown dependency, service cannot start");
        }

        info!(services = order.ordered.len(), "Starting all services");
        for name in &order.ordered {
            let Some(service) = self.service(name) else {
                continue;
            };
            if service.status() == ServiceStatus::Running {
                debug!(service = %name, "Already running");
                continue;
            }

            let blocked = service.config().depends_on.iter().find(|dep| {
                self.service(dep)
                    .is_none_or(|d| d.status() != ServiceStatus::Running)
            });
            if let Some(dependency) = blocked {
                warn!(service = %name, dependency = %dependency, "Dependency not running, skipping service");
                failed.push(name.clone());
                continue;
            }

            if let Err(e) = service.start().await {
                error!(service = %name, error = %e, "Failed to start service");
                failed.push(name.clone());
            }
        }

        if failed.is_empty() {
            info!("All services started");
            Ok(())
        } else {
            Err(DomainError::PartialStart(failed))
        }
    }

    /// Stop everything in reverse registration order
    pub async fn stop_all(&self) {
        let services = self.registered();
        info!(services = services.len(), "Stopping all services");
        for service in services.iter().rev() {
            if let Err(e) = service.stop(service.config().stop_timeout).await {
                error!(service = %service.name(), error = %e, "Failed to stop service");
            }
        }
    }

    // ─── Status ─────────────────────────────────────────────────────

    pub async fn get_status(&self) -> StatusSnapshot {
        let services: BTreeMap<_, _> = self
            .registered()
            .iter()
            .map(|s| (s.name().to_string(), s.get_stats()))
            .collect();

        let inspector = Arc::clone(&self.context.inspector);
        let system = tokio::task::spawn_blocking(move || inspector.system_usage())
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "System usage sampling failed");
                SystemUsage::default()
            });

        StatusSnapshot {
            timestamp: Utc::now(),
            services,
            system,
        }
    }

    pub async fn persist_status(&self) -> Result<()> {
        let snapshot = self.get_status().await;
        snapshot.write_to(&self.status_file).await?;
        debug!(path = %self.status_file.display(), "Status snapshot written");
        Ok(())
    }

    // ─── Run loop ───────────────────────────────────────────────────

    /// Cloneable handle for queueing commands
    pub fn command_sender(&self) -> mpsc::UnboundedSender<ManagerCommand> {
        self.command_tx.clone()
    }

    /// Serve one queued command per tick, watch system memory and persist the
    /// status snapshot once per wall-clock minute, until shutdown
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_persisted_minute = None;
        info!(tick_ms = self.tick.as_millis() as u64, "Process manager running");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.process_next_command().await;
            self.check_system_memory().await;

            let minute = Utc::now().timestamp() / 60;
            if last_persisted_minute != Some(minute) {
                match self.persist_status().await {
                    Ok(()) => last_persisted_minute = Some(minute),
                    Err(e) => warn!(error = %e, "Failed to persist status snapshot"),
                }
            }
        }

        info!("Process manager run loop stopped");
    }

    /// Stop the run loop and every service
    pub async fn shutdown(&self) {
        info!("Shutting down process manager");
        self.shutdown.cancel();
        self.stop_all().await;
    }

    async fn process_next_command(&self) {
        let command = self.command_rx.lock().await.try_recv();
        let Ok(command) = command else {
            return;
        };

        debug!(command = ?command, "Processing command");
        let outcome = match command {
            ManagerCommand::Start(name) => self.start_service(&name).await,
            ManagerCommand::Stop(name) => self.stop_service(&name).await,
            ManagerCommand::Restart(name) => self.restart_service(&name).await,
            ManagerCommand::Status(reply) => {
                if reply.send(self.get_status().await).is_err() {
                    debug!("Status requester went away");
                }
                Ok(())
            }
        };
        if let Err(e) = outcome {
            error!(error = %e, "Command failed");
        }
    }

    async fn check_system_memory(&self) {
        let inspector = Arc::clone(&self.context.inspector);
        let Ok(percent) = tokio::task::spawn_blocking(move || inspector.memory_percent()).await
        else {
            return;
        };
        if percent > SYSTEM_MEMORY_WARN_PERCENT {
            warn!(memory_percent = percent, "System memory usage high");
        }
    }
}

#[async_trait]
impl RestartHandler for ProcessManager {
    async fn restart_service(&self, name: &str) -> Result<()> {
        ProcessManager::restart_service(self, name).await
    }
}
