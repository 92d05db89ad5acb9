//! Health check probes
//! Performs HTTP, TCP, process-table and custom checks

use crate::domain::ports::ProcessInspector;
use crate::domain::value_objects::CustomCheckFn;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProbeError {
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("{target} timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },

    #[error("connection to {target} failed: {reason}")]
    Connection { target: String, reason: String },

    #[error("no process matching '{0}'")]
    ProcessNotFound(String),

    #[error("{0}")]
    Custom(String),
}

/// A passing probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSuccess {
    pub message: String,
    pub response_time_ms: Option<f64>,
    pub metadata: Value,
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// GET `url`; any status below 400 passes
pub async fn probe_http(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<ProbeSuccess, ProbeError> {
    debug!(url, "Performing HTTP health check");
    let started = Instant::now();

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout {
                    target: url.to_string(),
                    timeout,
                }
            } else {
                ProbeError::Connection {
                    target: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

    let status = response.status();
    let response_time_ms = elapsed_ms(started);
    if status.as_u16() >= 400 {
        return Err(ProbeError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    // Non-JSON bodies are fine, they just carry no metadata
    let body = response.json::<Value>().await.ok();
    let mut metadata = json!({ "status_code": status.as_u16() });
    if let Some(body) = body {
        metadata["body"] = body;
    }

    Ok(ProbeSuccess {
        message: format!("HTTP {}", status.as_u16()),
        response_time_ms: Some(response_time_ms),
        metadata,
    })
}

/// Bare TCP connect
pub async fn probe_tcp(host: &str, port: u16, timeout: Duration) -> Result<ProbeSuccess, ProbeError> {
    let target = format!("{host}:{port}");
    debug!(target = %target, "Performing TCP health check");
    let started = Instant::now();

    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => Ok(ProbeSuccess {
            message: format!("connected to {target}"),
            response_time_ms: Some(elapsed_ms(started)),
            metadata: json!({ "host": host, "port": port }),
        }),
        Ok(Err(e)) => Err(ProbeError::Connection {
            target,
            reason: e.to_string(),
        }),
        Err(_) => Err(ProbeError::Timeout { target, timeout }),
    }
}

/// Process-table lookup by name substring
pub async fn probe_process(
    inspector: Arc<dyn ProcessInspector>,
    process_name: &str,
) -> Result<ProbeSuccess, ProbeError> {
    let pattern = process_name.to_string();
    let found = tokio::task::spawn_blocking(move || inspector.find_by_name(&pattern))
        .await
        .map_err(|e| ProbeError::Custom(format!("process lookup failed: {e}")))?;

    match found {
        Some(sample) => Ok(ProbeSuccess {
            message: format!("process '{}' running (pid={})", sample.name, sample.pid),
            response_time_ms: None,
            metadata: json!({
                "pid": sample.pid,
                "cpu_percent": sample.cpu_percent,
                "memory_mb": sample.memory_mb,
            }),
        }),
        None => Err(ProbeError::ProcessNotFound(process_name.to_string())),
    }
}

/// Run a user predicate off the runtime; errors and panics fail the check
pub async fn probe_custom(check: CustomCheckFn, timeout: Duration) -> Result<ProbeSuccess, ProbeError> {
    let started = Instant::now();
    let task = tokio::task::spawn_blocking(move || check());

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok((true, message)))) => Ok(ProbeSuccess {
            message,
            response_time_ms: Some(elapsed_ms(started)),
            metadata: Value::Null,
        }),
        Ok(Ok(Ok((false, message)))) => Err(ProbeError::Custom(message)),
        Ok(Ok(Err(e))) => Err(ProbeError::Custom(format!("check error: {e:#}"))),
        Ok(Err(join_error)) => Err(ProbeError::Custom(format!("check panicked: {join_error}"))),
        Err(_) => Err(ProbeError::Timeout {
            target: "custom check".to_string(),
            timeout,
        }),
    }
}
