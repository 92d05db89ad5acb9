#![allow(dead_code)]

use nix::sys::signal;
use nix::unistd::Pid;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use supervisor_engine::SupervisorContext;
use supervisor_engine::domain::{
    Alert, AlertSink, ProcessInspector, ProcessSample, ServiceConfig, SystemUsage,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Inspector that never finds anything and reports an idle host
pub struct IdleInspector;

impl ProcessInspector for IdleInspector {
    fn sample(&self, _pid: u32) -> Option<ProcessSample> {
        None
    }
    fn find_by_name(&self, _pattern: &str) -> Option<ProcessSample> {
        None
    }
    fn memory_percent(&self) -> f64 {
        10.0
    }
    fn system_usage(&self) -> SystemUsage {
        SystemUsage::default()
    }
}

#[derive(Default)]
pub struct RecordingSink(pub parking_lot::Mutex<Vec<Alert>>);

impl AlertSink for RecordingSink {
    fn send_alert(&self, alert: Alert) {
        self.0.lock().push(alert);
    }
}

pub fn idle_context() -> SupervisorContext {
    SupervisorContext::new(Arc::new(IdleInspector), Arc::new(RecordingSink::default()))
}

/// `/bin/sleep 300` with test-friendly timings
pub fn sleeper(name: &str) -> ServiceConfig {
    ServiceConfig::new(name, vec!["/bin/sleep".into(), "300".into()])
        .with_startup_delay(Duration::from_millis(100))
        .with_monitor_interval(Duration::from_millis(50))
        .with_stop_timeout(Duration::from_secs(2))
}

/// `/bin/sh -c <script>` with test-friendly timings
pub fn shell(name: &str, script: &str) -> ServiceConfig {
    ServiceConfig::new(name, vec!["/bin/sh".into(), "-c".into(), script.into()])
        .with_startup_delay(Duration::from_millis(100))
        .with_monitor_interval(Duration::from_millis(50))
        .with_stop_timeout(Duration::from_secs(2))
}

/// Minimal HTTP server answering every request with the current status code
pub struct StatusServer {
    pub port: u16,
    status: Arc<AtomicU16>,
    task: JoinHandle<()>,
}

impl StatusServer {
    pub async fn start(initial_status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let status = Arc::new(AtomicU16::new(initial_status));

        let served = Arc::clone(&status);
        let task = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let code = served.load(Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut read = 0;
                    while read < buf.len() {
                        match stream.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => read += n,
                        }
                        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let body = format!("{{\"status\":{code}}}");
                    let response = format!(
                        "HTTP/1.1 {code} Test\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self { port, status, task }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/health", self.port)
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn status_handle(&self) -> Arc<AtomicU16> {
        Arc::clone(&self.status)
    }
}

impl Drop for StatusServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn pid_is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Poll `condition` every 25ms until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Async flavour of [`wait_until`]
pub async fn wait_until_async<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
