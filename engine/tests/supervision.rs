mod common;

use async_trait::async_trait;
use common::{
    StatusServer, idle_context, pid_is_alive, shell, sleeper, wait_until, wait_until_async,
};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use supervisor_engine::domain::{
    HealthCheckConfig, HealthEventKind, HealthStatus, RestartHandler, ServiceStatus,
};
use supervisor_engine::infrastructure::SysinfoInspector;
use supervisor_engine::{DomainError, ManagedService, ProcessManager, StatusSnapshot};

// ===========================================================================
// Group 1: ManagedService lifecycle
// ===========================================================================

#[tokio::test]
async fn test_stop_escalates_to_sigkill() {
    let config = shell("stubborn", "trap '' TERM; exec /bin/sleep 300")
        .with_stop_timeout(Duration::from_millis(300));
    let svc = ManagedService::new(config, Arc::new(common::IdleInspector)).unwrap();
    svc.start().await.unwrap();
    let pid = svc.pid().unwrap();

    let started = Instant::now();
    svc.stop(Duration::from_millis(300)).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(svc.status(), ServiceStatus::Stopped);
    assert!(!pid_is_alive(pid), "process should be killed after the timeout");
}

#[tokio::test]
async fn test_crash_restarts_until_limit() {
    let config = shell("crashy", "sleep 0.3; exit 1")
        .with_restart(true, 2, Duration::from_millis(50));
    let svc = ManagedService::new(config, Arc::new(common::IdleInspector)).unwrap();
    svc.start().await.unwrap();

    assert!(
        wait_until(Duration::from_secs(10), || svc.restart_count() == 2).await,
        "service should be restarted twice"
    );
    // Last allowed restart runs and crashes once more
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(svc.restart_count(), 2);
    assert_eq!(svc.status(), ServiceStatus::Failed);
    assert!(svc.pid().is_none());
    assert!(!svc.is_process_alive().await);
    assert!(svc.get_stats().last_restart.is_some());
}

#[tokio::test]
async fn test_restart_disabled_leaves_failed() {
    let config = shell("oneshot", "sleep 0.2; exit 1").with_restart(
        false,
        3,
        Duration::from_millis(50),
    );
    let svc = ManagedService::new(config, Arc::new(common::IdleInspector)).unwrap();
    svc.start().await.unwrap();

    assert!(wait_until(Duration::from_secs(5), || svc.status() == ServiceStatus::Failed).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(svc.status(), ServiceStatus::Failed);
    assert_eq!(svc.restart_count(), 0);
}

#[tokio::test]
async fn test_restart_replaces_process() {
    let config = sleeper("worker").with_restart(true, 3, Duration::from_millis(50));
    let svc = ManagedService::new(config, Arc::new(common::IdleInspector)).unwrap();
    svc.start().await.unwrap();
    let old_pid = svc.pid().unwrap();

    svc.restart().await.unwrap();
    let new_pid = svc.pid().unwrap();

    assert_ne!(old_pid, new_pid);
    assert!(!pid_is_alive(old_pid), "old process must be gone before the new one runs");
    assert!(pid_is_alive(new_pid));
    assert_eq!(svc.status(), ServiceStatus::Running);

    svc.stop(Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn test_running_implies_live_process() {
    let config = sleeper("victim").with_restart(false, 0, Duration::from_millis(50));
    let svc = ManagedService::new(config, Arc::new(common::IdleInspector)).unwrap();
    svc.start().await.unwrap();
    let pid = svc.pid().unwrap();

    signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || svc.status() != ServiceStatus::Running).await,
        "monitor should notice the dead process"
    );
    assert_eq!(svc.status(), ServiceStatus::Failed);
    assert!(!svc.is_process_alive().await);
}

#[tokio::test]
async fn test_env_and_working_dir_are_applied() {
    let dir = tempfile::tempdir().unwrap();
    let config = shell("env", "echo \"$GREETING\" > greeting.txt; exec /bin/sleep 300")
        .with_working_dir(dir.path())
        .with_env("GREETING", "hello from the supervisor");
    let svc = ManagedService::new(config, Arc::new(common::IdleInspector)).unwrap();
    svc.start().await.unwrap();

    let file = dir.path().join("greeting.txt");
    assert!(
        wait_until(Duration::from_secs(5), || {
            std::fs::read_to_string(&file)
                .map(|s| s.trim() == "hello from the supervisor")
                .unwrap_or(false)
        })
        .await
    );

    svc.stop(Duration::from_secs(2)).await.unwrap();
}

// ===========================================================================
// Group 2: ProcessManager
// ===========================================================================

#[tokio::test]
async fn test_dependency_auto_start() {
    let pm = ProcessManager::new(idle_context());
    pm.add_service(sleeper("db")).unwrap();
    pm.add_service(sleeper("api").with_dependency("db")).unwrap();

    pm.start_service("api").await.unwrap();

    assert_eq!(pm.service("db").unwrap().status(), ServiceStatus::Running);
    assert_eq!(pm.service("api").unwrap().status(), ServiceStatus::Running);

    pm.stop_all().await;
}

#[tokio::test]
async fn test_dependency_failure_keeps_dependent_down() {
    let pm = ProcessManager::new(idle_context());
    pm.add_service(shell("db", "exit 1")).unwrap();
    pm.add_service(sleeper("api").with_dependency("db")).unwrap();

    let err = pm.start_service("api").await.unwrap_err();

    assert_eq!(
        err,
        DomainError::DependencyFailed {
            service: "api".into(),
            dependency: "db".into()
        }
    );
    assert_eq!(pm.service("db").unwrap().status(), ServiceStatus::Failed);
    assert_ne!(pm.service("api").unwrap().status(), ServiceStatus::Running);
    assert!(pm.service("api").unwrap().pid().is_none());
}

#[tokio::test]
async fn test_start_all_then_stop_all() {
    let pm = ProcessManager::new(idle_context());
    pm.add_service(sleeper("frontend").with_dependency("api")).unwrap();
    pm.add_service(sleeper("api").with_dependency("db")).unwrap();
    pm.add_service(sleeper("db")).unwrap();

    pm.start_all().await.unwrap();

    let pids: Vec<u32> = pm
        .service_names()
        .iter()
        .map(|name| pm.service(name).unwrap().pid().unwrap())
        .collect();
    assert_eq!(pids.len(), 3);
    assert!(pids.iter().all(|&pid| pid_is_alive(pid)));

    pm.stop_all().await;

    for name in pm.service_names() {
        assert_eq!(pm.service(&name).unwrap().status(), ServiceStatus::Stopped);
    }
    assert!(pids.iter().all(|&pid| !pid_is_alive(pid)));
}

#[tokio::test]
async fn test_start_all_skips_services_with_failed_dependencies() {
    let pm = ProcessManager::new(idle_context());
    pm.add_service(shell("db", "exit 2")).unwrap();
    pm.add_service(sleeper("api").with_dependency("db")).unwrap();
    pm.add_service(sleeper("worker")).unwrap();

    let err = pm.start_all().await.unwrap_err();

    assert_eq!(err, DomainError::PartialStart(vec!["db".into(), "api".into()]));
    assert_eq!(pm.service("worker").unwrap().status(), ServiceStatus::Running);
    assert_eq!(pm.service("api").unwrap().status(), ServiceStatus::Stopped);

    pm.stop_all().await;
}

#[tokio::test]
async fn test_load_config_and_persist_status() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("services.json");
    std::fs::write(
        &config_path,
        r#"{
            "services": {
                "cache": {"command": ["/bin/sleep", "300"], "startup_delay": 0.1},
                "queue": {"command": ["/bin/sleep", "300"], "startup_delay": 0.1, "depends_on": ["cache"]}
            },
            "health_checks": {
                "cache": {"type": "process", "process_name": "sleep", "interval": 0.5}
            }
        }"#,
    )
    .unwrap();
    let status_path = dir.path().join("logs").join("process_status.json");

    let pm = ProcessManager::new(idle_context()).with_status_file(&status_path);
    let checks = pm.load_config(&config_path).unwrap();
    assert_eq!(checks.len(), 1);
    assert_eq!(pm.service_names(), vec!["cache", "queue"]);

    pm.start_all().await.unwrap();
    pm.persist_status().await.unwrap();

    let snapshot = StatusSnapshot::read_from(&status_path).await.unwrap();
    assert_eq!(snapshot.services.len(), 2);
    assert_eq!(snapshot.services["queue"].status, ServiceStatus::Running);
    assert!(snapshot.services["cache"].pid.is_some());
    assert_eq!(snapshot.services["cache"].resource_usage.max_memory_mb, 4096);

    pm.stop_all().await;
}

// ===========================================================================
// Group 3: HealthMonitor
// ===========================================================================

/// Restart handler that "fixes" the HTTP target on the first restart
struct FixingHandler {
    restarts: AtomicU32,
    target_status: Arc<AtomicU16>,
}

#[async_trait]
impl RestartHandler for FixingHandler {
    async fn restart_service(&self, _name: &str) -> supervisor_engine::Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.target_status.store(200, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct CountingHandler(AtomicU32);

#[async_trait]
impl RestartHandler for CountingHandler {
    async fn restart_service(&self, _name: &str) -> supervisor_engine::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_http_500_three_times_triggers_one_restart() {
    let server = StatusServer::start(500).await;
    let ctx = idle_context();
    let monitor = ctx.health_monitor();

    let handler = Arc::new(FixingHandler {
        restarts: AtomicU32::new(0),
        target_status: server.status_handle(),
    });
    monitor.set_restart_handler(handler.clone());

    let restarted = Arc::new(AtomicU32::new(0));
    let seen = restarted.clone();
    monitor.on_service_restarted(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    monitor
        .register_service(
            HealthCheckConfig::http("api", server.url())
                .with_interval(Duration::from_millis(100))
                .with_timeout(Duration::from_secs(1))
                .with_retries(3)
                .with_restart(3, Duration::from_secs(300), Duration::ZERO),
        )
        .unwrap();
    monitor.start();

    assert!(
        wait_until(Duration::from_secs(5), || {
            monitor
                .service_health("api")
                .is_some_and(|h| h.status == HealthStatus::Healthy)
        })
        .await,
        "service should become healthy after the restart"
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    monitor.stop().await;

    assert_eq!(handler.restarts.load(Ordering::SeqCst), 1);
    assert_eq!(restarted.load(Ordering::SeqCst), 1);
    let health = monitor.service_health("api").unwrap();
    assert_eq!(health.restart_history.len(), 1);
    assert_eq!(health.consecutive_failures, 0);

    let last = health.last_result.unwrap();
    assert!(last.healthy);
    assert_eq!(last.metadata["status_code"], 200);
    assert!(last.response_time_ms.is_some());
}

#[tokio::test]
async fn test_restart_attempts_bounded_per_window() {
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = closed.local_addr().unwrap().port();
    drop(closed);

    let monitor = idle_context().health_monitor();
    let handler = Arc::new(CountingHandler::default());
    monitor.set_restart_handler(handler.clone());
    monitor
        .register_service(
            HealthCheckConfig::tcp("db", "127.0.0.1", port)
                .with_interval(Duration::from_millis(50))
                .with_timeout(Duration::from_millis(200))
                .with_retries(1)
                .with_restart(2, Duration::from_secs(60), Duration::ZERO),
        )
        .unwrap();

    monitor.start();
    tokio::time::sleep(Duration::from_millis(800)).await;
    monitor.stop().await;

    assert_eq!(handler.0.load(Ordering::SeqCst), 2);
    assert_eq!(monitor.service_health("db").unwrap().restart_history.len(), 2);
    assert_eq!(monitor.get_overall_status(), HealthStatus::Unhealthy);
}

#[tokio::test]
async fn test_expired_attempts_free_up_the_window() {
    let monitor = idle_context().health_monitor();
    let handler = Arc::new(CountingHandler::default());
    monitor.set_restart_handler(handler.clone());
    monitor
        .register_service(
            HealthCheckConfig::custom("flaky", || Ok((false, "still down".to_string())))
                .with_interval(Duration::from_millis(50))
                .with_retries(1)
                .with_restart(1, Duration::from_millis(250), Duration::ZERO),
        )
        .unwrap();

    monitor.start();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    monitor.stop().await;

    let restarts = handler.0.load(Ordering::SeqCst);
    assert!((3..=5).contains(&restarts), "got {restarts} restarts");
    assert!(monitor.service_health("flaky").unwrap().restart_history.len() <= 1);
}

#[tokio::test]
async fn test_health_monitor_restarts_through_process_manager() {
    let ctx = idle_context();
    let pm = Arc::new(ProcessManager::new(ctx.clone()));
    pm.add_service(sleeper("api").with_restart(true, 3, Duration::from_millis(50)))
        .unwrap();
    pm.start_service("api").await.unwrap();
    let first_pid = pm.service("api").unwrap().pid().unwrap();

    let monitor = ctx.health_monitor();
    monitor.set_restart_handler(pm.clone());
    monitor
        .register_service(
            HealthCheckConfig::custom("api", || Ok((false, "deadlocked".to_string())))
                .with_interval(Duration::from_millis(100))
                .with_retries(2)
                .with_restart(1, Duration::from_secs(300), Duration::ZERO),
        )
        .unwrap();
    monitor.start();

    let svc = pm.service("api").unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || {
            svc.pid().is_some_and(|pid| pid != first_pid)
                && svc.status() == ServiceStatus::Running
        })
        .await,
        "api should be running under a new pid"
    );
    monitor.stop().await;

    assert!(!pid_is_alive(first_pid));
    assert!(
        monitor
            .recent_events(100)
            .iter()
            .any(|e| e.kind == HealthEventKind::Restarted)
    );

    pm.stop_all().await;
}

#[tokio::test]
async fn test_restart_failure_raises_alert() {
    let ctx = idle_context();
    let pm = Arc::new(ProcessManager::new(ctx.clone()));

    let sink = Arc::new(common::RecordingSink::default());
    let monitor = supervisor_engine::HealthMonitor::new(ctx.inspector.clone(), sink.clone());
    // No service named "ghost" is registered with the manager
    monitor.set_restart_handler(pm);
    monitor
        .register_service(
            HealthCheckConfig::custom("ghost", || Ok((false, "gone".to_string())))
                .with_interval(Duration::from_millis(50))
                .with_retries(1)
                .with_restart(1, Duration::from_secs(300), Duration::ZERO),
        )
        .unwrap();
    monitor.start();

    assert!(
        wait_until(Duration::from_secs(3), || {
            monitor
                .recent_events(100)
                .iter()
                .any(|e| e.kind == HealthEventKind::RestartFailed)
        })
        .await
    );
    monitor.stop().await;

    let alerts = sink.0.lock();
    assert!(alerts.iter().any(|a| a.title.contains("unhealthy")));
    assert!(alerts.iter().any(|a| a.title.contains("Restart of ghost failed")));
}

#[tokio::test]
async fn test_process_check_against_real_process_table() {
    let ctx = supervisor_engine::SupervisorContext::new(
        Arc::new(SysinfoInspector::new()),
        Arc::new(common::RecordingSink::default()),
    );
    let pm = ProcessManager::new(ctx.clone());
    pm.add_service(sleeper("napper")).unwrap();
    pm.start_service("napper").await.unwrap();

    let monitor = ctx.health_monitor();
    monitor
        .register_service(HealthCheckConfig::process("napper", "sleep"))
        .unwrap();
    monitor
        .register_service(HealthCheckConfig::process(
            "missing",
            "definitely-not-a-real-process-name",
        ))
        .unwrap();

    let monitor_ref = &monitor;
    assert!(
        wait_until_async(Duration::from_secs(3), move || async move {
            monitor_ref
                .check_now("napper")
                .await
                .is_ok_and(|r| r.healthy)
        })
        .await
    );
    let missing = monitor.check_now("missing").await.unwrap();
    assert!(!missing.healthy);

    pm.stop_all().await;
}

#[tokio::test]
async fn test_tcp_check_passes_against_listener() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accept = tokio::spawn(async move {
        while let Ok((_stream, _)) = listener.accept().await {}
    });

    let monitor = idle_context().health_monitor();
    monitor
        .register_service(
            HealthCheckConfig::tcp("redis", "127.0.0.1", port)
                .with_interval(Duration::from_millis(50)),
        )
        .unwrap();
    monitor.start();

    assert!(
        wait_until(Duration::from_secs(3), || {
            monitor.get_overall_status() == HealthStatus::Healthy
                && monitor
                    .service_health("redis")
                    .is_some_and(|h| h.consecutive_successes >= 2)
        })
        .await
    );
    monitor.stop().await;

    let report = monitor.get_health_report();
    assert_eq!(report.services["redis"].status, HealthStatus::Healthy);
    assert!(report.services["redis"].last_check.is_some());
    accept.abort();
}
