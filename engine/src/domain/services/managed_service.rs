//! One supervised OS process
//!
//! A `ManagedService` exclusively owns its child process. Starting spawns the
//! child with captured output and launches a monitor task that, once per
//! `monitor_interval`, checks liveness, samples CPU and memory, and runs the
//! optional health-check command. Output lines are forwarded to the log as
//! they arrive.
//!
//! Lifecycle operations (`start`, `stop`, `restart`) are serialized by an
//! internal lock, and every teardown joins the monitor task before the process
//! is signalled, so two monitors or two live processes never coexist.

use crate::constants::service::{
    HEALTH_COMMAND_TIMEOUT, HISTORY_CAPACITY, MONITOR_JOIN_TIMEOUT, OUTPUT_DRAIN_TIMEOUT,
};
use crate::domain::ports::ProcessInspector;
use crate::domain::value_objects::{
    ResourceUsage, SampleHistory, ServiceConfig, ServiceStats, ServiceStatus,
};
use crate::domain::{DomainError, Result};
use crate::infrastructure::network::is_port_available;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct RuntimeState {
    status: ServiceStatus,
    restart_count: u32,
    last_restart: Option<DateTime<Utc>>,
    start_time: Option<Instant>,
    pid: Option<u32>,
    cpu_history: SampleHistory<f64>,
    memory_history: SampleHistory<f64>,
    last_health_check: Option<Instant>,
}

struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

enum MonitorStep {
    Continue,
    Exit,
    Restart,
}

enum MonitorEvent {
    Tick,
    Stdout(std::io::Result<Option<String>>),
    Stderr(std::io::Result<Option<String>>),
}

#[derive(Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

pub struct ManagedService {
    config: ServiceConfig,
    inspector: Arc<dyn ProcessInspector>,
    runtime: Mutex<RuntimeState>,
    child: tokio::sync::Mutex<Option<Child>>,
    monitor: Mutex<Option<MonitorHandle>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl ManagedService {
    pub fn new(config: ServiceConfig, inspector: Arc<dyn ProcessInspector>) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            inspector,
            runtime: Mutex::new(RuntimeState {
                status: ServiceStatus::Stopped,
                restart_count: 0,
                last_restart: None,
                start_time: None,
                pid: None,
                cpu_history: SampleHistory::new(HISTORY_CAPACITY),
                memory_history: SampleHistory::new(HISTORY_CAPACITY),
                last_health_check: None,
            }),
            child: tokio::sync::Mutex::new(None),
            monitor: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn status(&self) -> ServiceStatus {
        self.runtime.lock().status
    }

    pub fn restart_count(&self) -> u32 {
        self.runtime.lock().restart_count
    }

    pub fn pid(&self) -> Option<u32> {
        self.runtime.lock().pid
    }

    pub fn cpu_history(&self) -> Vec<f64> {
        self.runtime.lock().cpu_history.to_vec()
    }

    pub fn memory_history(&self) -> Vec<f64> {
        self.runtime.lock().memory_history.to_vec()
    }

    /// Append one CPU% / memory-MB reading to the bounded histories
    pub fn record_resource_sample(&self, cpu_percent: f64, memory_mb: f64) {
        let mut runtime = self.runtime.lock();
        runtime.cpu_history.push(cpu_percent);
        runtime.memory_history.push(memory_mb);
    }

    /// Whether the owned child exists and has not exited
    pub async fn is_process_alive(&self) -> bool {
        let mut slot = self.child.lock().await;
        match slot.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub fn get_stats(&self) -> ServiceStats {
        let runtime = self.runtime.lock();
        let uptime = match (runtime.status, runtime.start_time) {
            (ServiceStatus::Running, Some(started)) => started.elapsed().as_secs_f64(),
            _ => 0.0,
        };
        ServiceStats {
            name: self.config.name.clone(),
            status: runtime.status,
            uptime,
            restart_count: runtime.restart_count,
            last_restart: runtime.last_restart,
            pid: runtime.pid,
            port: self.config.port,
            resource_usage: ResourceUsage {
                cpu_percent: runtime.cpu_history.latest().copied(),
                memory_mb: runtime.memory_history.latest().copied(),
                max_memory_mb: self.config.max_memory_mb,
                max_cpu_percent: self.config.max_cpu_percent,
            },
        }
    }

    /// Spawn the process and launch its monitor
    ///
    /// A no-op when the service is already starting, running or stopping.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.start_locked().await
    }

    /// SIGTERM, wait up to `timeout`, then SIGKILL
    ///
    /// A failed service is only marked stopped. Otherwise succeeds without doing
    /// anything unless the service is running or starting.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let status = self.status();
        if status == ServiceStatus::Failed {
            // A pending crash restart sees STOPPED and backs off
            self.teardown(timeout).await;
            self.set_status(ServiceStatus::Stopped);
            info!(service = %self.config.name, "Failed service marked stopped");
            return Ok(());
        }
        if !status.is_stoppable() {
            debug!(service = %self.config.name, status = %status, "Service not running, nothing to stop");
            return Ok(());
        }

        info!(service = %self.config.name, "Stopping service");
        self.set_status(ServiceStatus::Stopping);
        self.teardown(timeout).await;
        self.set_status(ServiceStatus::Stopped);
        info!(service = %self.config.name, "Service stopped");
        Ok(())
    }

    /// Stop, wait `restart_delay`, start again
    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        info!(service = %self.config.name, "Restarting service");
        self.restart_locked(1).await
    }

    // Lifecycle internals; callers hold the lifecycle lock

    async fn start_locked(self: &Arc<Self>) -> Result<()> {
        let name = &self.config.name;
        let status = self.status();
        if !status.is_startable() {
            warn!(service = %name, status = %status, "Service already active, ignoring start request");
            return Ok(());
        }

        info!(service = %name, "Starting service");
        self.set_status(ServiceStatus::Starting);

        if let Some(port) = self.config.port
            && !is_port_available(port)
        {
            error!(service = %name, port, "Port already in use, not starting");
            self.set_status(ServiceStatus::Failed);
            return Err(DomainError::PortInUse {
                service: name.clone(),
                port,
            });
        }

        // Leftovers of a crashed process
        self.stop_monitor().await;
        let stale = self.child.lock().await.take();
        if let Some(mut stale) = stale {
            terminate_child(name, &mut stale, self.config.stop_timeout).await;
        }

        let spawned = self.build_command().and_then(|mut cmd| {
            cmd.spawn().map_err(|e| DomainError::SpawnFailed {
                service: name.clone(),
                reason: e.to_string(),
            })
        });
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!(service = %name, error = %e, "Failed to spawn service");
                self.set_status(ServiceStatus::Failed);
                return Err(e);
            }
        };

        let pid = child.id();
        info!(
            service = %name,
            pid = pid.unwrap_or(0),
            command = %self.config.command.join(" "),
            "Service spawned"
        );
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        tokio::time::sleep(self.config.startup_delay).await;

        match child.try_wait() {
            Ok(Some(exit)) => {
                drop(child.stdin.take());
                drain_output(name, stdout, stderr).await;
                error!(service = %name, status = %exit, "Service exited during startup");
                self.set_status(ServiceStatus::Failed);
                return Err(DomainError::ExitedDuringStartup {
                    service: name.clone(),
                    status: exit.to_string(),
                });
            }
            Ok(None) => {}
            Err(e) => warn!(service = %name, error = %e, "Could not poll service after startup delay"),
        }

        *self.child.lock().await = Some(child);
        {
            let mut runtime = self.runtime.lock();
            runtime.pid = pid;
            runtime.start_time = Some(Instant::now());
            runtime.last_health_check = None;
        }
        self.set_status(ServiceStatus::Running);
        self.spawn_monitor(stdout, stderr);
        info!(service = %name, pid = pid.unwrap_or(0), "Service is running");
        Ok(())
    }

    async fn restart_locked(self: &Arc<Self>, attempt: u32) -> Result<()> {
        self.set_status(ServiceStatus::Restarting);
        self.runtime.lock().last_restart = Some(Utc::now());
        self.teardown(self.config.stop_timeout).await;

        let delay = self.config.restart_policy().delay_for(attempt);
        debug!(
            service = %self.config.name,
            delay_ms = delay.as_millis() as u64,
            "Waiting before restart"
        );
        tokio::time::sleep(delay).await;

        self.start_locked().await
    }

    async fn restart_after_crash(self: Arc<Self>) {
        let _lifecycle = self.lifecycle.lock().await;
        // stop() or a manual restart may have won the race
        if self.status() != ServiceStatus::Failed {
            debug!(service = %self.config.name, "State changed before crash restart, skipping");
            return;
        }
        let attempt = self.restart_count();
        if let Err(e) = self.restart_locked(attempt).await {
            error!(service = %self.config.name, error = %e, "Restart after crash failed");
        }
    }

    /// Join the monitor, then terminate and drop the child with all its pipes
    async fn teardown(&self, timeout: Duration) {
        self.stop_monitor().await;

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            drop(child.stdin.take());
            drop(child.stdout.take());
            drop(child.stderr.take());
            terminate_child(&self.config.name, &mut child, timeout).await;
        }

        let mut runtime = self.runtime.lock();
        runtime.pid = None;
        runtime.start_time = None;
    }

    fn set_status(&self, next: ServiceStatus) {
        let mut runtime = self.runtime.lock();
        let current = runtime.status;
        if current == next {
            return;
        }
        if !current.can_transition_to(next) {
            warn!(service = %self.config.name, from = %current, to = %next, "Unexpected status transition");
        }
        debug!(service = %self.config.name, from = %current, to = %next, "Status changed");
        runtime.status = next;
    }

    fn build_command(&self) -> Result<Command> {
        let Some((program, args)) = self.config.command.split_first() else {
            return Err(DomainError::InvalidCommand(format!(
                "service '{}' has an empty command",
                self.config.name
            )));
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&self.config.env_vars)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }

    // Monitor

    fn spawn_monitor(self: &Arc<Self>, stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(monitor_loop(
            Arc::downgrade(self),
            cancel.clone(),
            self.config.name.clone(),
            self.config.monitor_interval,
            stdout,
            stderr,
        ));
        *self.monitor.lock() = Some(MonitorHandle { cancel, task });
    }

    async fn stop_monitor(&self) {
        let handle = self.monitor.lock().take();
        let Some(MonitorHandle { cancel, mut task }) = handle else {
            return;
        };

        cancel.cancel();
        match tokio::time::timeout(MONITOR_JOIN_TIMEOUT, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_cancelled() => {}
            Ok(Err(e)) => warn!(service = %self.config.name, error = %e, "Monitor task panicked"),
            Err(_) => {
                warn!(
                    service = %self.config.name,
                    "Monitor did not stop within grace period, aborting it"
                );
                task.abort();
                let _ = task.await;
            }
        }
    }

    async fn monitor_iteration(&self) -> MonitorStep {
        let exit = {
            let mut slot = self.child.lock().await;
            let Some(child) = slot.as_mut() else {
                return MonitorStep::Exit;
            };
            match child.try_wait() {
                Ok(exit) => exit,
                Err(e) => {
                    warn!(service = %self.config.name, error = %e, "Could not poll process");
                    None
                }
            }
        };

        if let Some(exit) = exit {
            return self.handle_unexpected_exit(exit);
        }

        self.sample_resources().await;
        self.run_health_check_if_due().await;
        MonitorStep::Continue
    }

    fn handle_unexpected_exit(&self, exit: ExitStatus) -> MonitorStep {
        let name = &self.config.name;
        error!(service = %name, status = %exit, "Service exited unexpectedly");

        let policy = self.config.restart_policy();
        let attempt = {
            let mut runtime = self.runtime.lock();
            runtime.pid = None;
            runtime.start_time = None;
            if policy.allows(runtime.restart_count) {
                runtime.restart_count += 1;
                Some(runtime.restart_count)
            } else {
                None
            }
        };
        self.set_status(ServiceStatus::Failed);

        match attempt {
            Some(attempt) => {
                info!(
                    service = %name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "Scheduling restart"
                );
                MonitorStep::Restart
            }
            None if policy.enabled => {
                error!(
                    service = %name,
                    max_attempts = policy.max_attempts,
                    "Restart limit reached, service left failed"
                );
                MonitorStep::Exit
            }
            None => {
                info!(service = %name, "Restart on failure disabled, service left failed");
                MonitorStep::Exit
            }
        }
    }

    async fn sample_resources(&self) {
        let Some(pid) = self.pid() else {
            return;
        };
        let inspector = Arc::clone(&self.inspector);
        let sample = match tokio::task::spawn_blocking(move || inspector.sample(pid)).await {
            Ok(Some(sample)) => sample,
            Ok(None) => {
                debug!(service = %self.config.name, pid, "Process missing from process table");
                return;
            }
            Err(e) => {
                warn!(service = %self.config.name, error = %e, "Resource sampling failed");
                return;
            }
        };

        self.record_resource_sample(sample.cpu_percent, sample.memory_mb);

        // Ceilings are advisory
        if sample.memory_mb > self.config.max_memory_mb as f64 {
            warn!(
                service = %self.config.name,
                memory_mb = sample.memory_mb,
                limit_mb = self.config.max_memory_mb,
                "Memory usage above limit"
            );
        }
        if sample.cpu_percent > self.config.max_cpu_percent {
            warn!(
                service = %self.config.name,
                cpu_percent = sample.cpu_percent,
                limit_percent = self.config.max_cpu_percent,
                "CPU usage above limit"
            );
        }
    }

    async fn run_health_check_if_due(&self) {
        let Some((program, args)) = self
            .config
            .health_check
            .as_ref()
            .and_then(|argv| argv.split_first())
        else {
            return;
        };

        let interval = self.config.health_check_interval;
        let due = {
            let mut runtime = self.runtime.lock();
            let due = runtime
                .last_health_check
                .is_none_or(|last| last.elapsed() >= interval);
            if due {
                runtime.last_health_check = Some(Instant::now());
            }
            due
        };
        if !due {
            return;
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&self.config.env_vars)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        match tokio::time::timeout(HEALTH_COMMAND_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) if status.success() => {
                debug!(service = %self.config.name, "Health check command passed")
            }
            Ok(Ok(status)) => {
                warn!(service = %self.config.name, status = %status, "Health check command failed")
            }
            Ok(Err(e)) => {
                warn!(service = %self.config.name, error = %e, "Health check command could not run")
            }
            Err(_) => warn!(service = %self.config.name, "Health check command timed out"),
        }
    }
}

impl Drop for ManagedService {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.get_mut().take() {
            handle.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for ManagedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedService")
            .field("name", &self.config.name)
            .field("status", &self.status())
            .field("pid", &self.pid())
            .finish()
    }
}

async fn monitor_loop(
    service: Weak<ManagedService>,
    cancel: CancellationToken,
    name: String,
    interval: Duration,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
) {
    let mut stdout = stdout.map(|s| BufReader::new(s).lines());
    let mut stderr = stderr.map(|s| BufReader::new(s).lines());
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    debug!(service = %name, "Monitor started");

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => MonitorEvent::Tick,
            line = next_line(&mut stdout) => MonitorEvent::Stdout(line),
            line = next_line(&mut stderr) => MonitorEvent::Stderr(line),
        };

        match event {
            MonitorEvent::Stdout(line) => {
                if !forward_output(&name, OutputStream::Stdout, line) {
                    stdout = None;
                }
            }
            MonitorEvent::Stderr(line) => {
                if !forward_output(&name, OutputStream::Stderr, line) {
                    stderr = None;
                }
            }
            MonitorEvent::Tick => {
                let Some(service) = service.upgrade() else {
                    break;
                };
                match service.monitor_iteration().await {
                    MonitorStep::Continue => {}
                    MonitorStep::Exit => break,
                    MonitorStep::Restart => {
                        tokio::spawn(service.restart_after_crash());
                        break;
                    }
                }
            }
        }
    }

    debug!(service = %name, "Monitor stopped");
}

/// Next line of an optional stream; a closed stream never resolves
async fn next_line<R>(lines: &mut Option<Lines<BufReader<R>>>) -> std::io::Result<Option<String>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

/// Log one output line; false once the stream is closed
fn forward_output(name: &str, stream: OutputStream, line: std::io::Result<Option<String>>) -> bool {
    match (line, stream) {
        (Ok(Some(line)), OutputStream::Stdout) => {
            info!(service = %name, "[stdout] {line}");
            true
        }
        (Ok(Some(line)), OutputStream::Stderr) => {
            warn!(service = %name, "[stderr] {line}");
            true
        }
        (Ok(None), _) => {
            debug!(service = %name, "Output stream closed");
            false
        }
        (Err(e), _) => {
            debug!(service = %name, error = %e, "Output stream unreadable");
            false
        }
    }
}

/// Log whatever an exited child left in its pipes
async fn drain_output(name: &str, stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) {
    let mut stdout = stdout.map(|s| BufReader::new(s).lines());
    let mut stderr = stderr.map(|s| BufReader::new(s).lines());

    let drain = async {
        while stdout.is_some() || stderr.is_some() {
            tokio::select! {
                line = next_line(&mut stdout) => {
                    if !forward_output(name, OutputStream::Stdout, line) {
                        stdout = None;
                    }
                }
                line = next_line(&mut stderr) => {
                    if !forward_output(name, OutputStream::Stderr, line) {
                        stderr = None;
                    }
                }
            }
        }
    };
    if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, drain).await.is_err() {
        debug!(service = %name, "Output still open after exit, not waiting further");
    }
}

async fn terminate_child(name: &str, child: &mut Child, timeout: Duration) {
    match child.try_wait() {
        Ok(Some(status)) => {
            debug!(service = %name, status = %status, "Process already exited");
            return;
        }
        Ok(None) => {}
        Err(e) => warn!(service = %name, error = %e, "Could not poll process before stopping"),
    }

    send_terminate(name, child);

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => info!(service = %name, status = %status, "Process exited"),
        Ok(Err(e)) => warn!(service = %name, error = %e, "Failed to wait for process"),
        Err(_) => {
            warn!(
                service = %name,
                timeout_secs = timeout.as_secs_f64(),
                "Stop timeout reached, sending SIGKILL"
            );
            if let Err(e) = child.kill().await {
                error!(service = %name, error = %e, "Failed to kill process");
            }
        }
    }
}

#[cfg(unix)]
fn send_terminate(name: &str, child: &mut Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id()
        && let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
    {
        warn!(service = %name, error = %e, "Failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_terminate(name: &str, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!(service = %name, error = %e, "Failed to terminate process");
    }
}
