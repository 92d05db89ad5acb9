//! Service configuration files
//!
//! JSON by default; `.yaml`/`.yml` files go through serde_yaml into the same
//! structures. Map keys become service names, so services are registered in
//! key order.

use crate::constants::health_check as defaults;
use crate::domain::DomainError;
use crate::domain::value_objects::{HealthCheckConfig, ServiceConfig, duration_secs};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid entry '{name}': {source}")]
    Invalid {
        name: String,
        #[source]
        source: DomainError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::Yaml,
            _ => Self::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FileCheckType {
    Http,
    Tcp,
    Process,
}

fn default_true() -> bool {
    true
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_interval() -> Duration {
    defaults::DEFAULT_INTERVAL
}
fn default_timeout() -> Duration {
    defaults::DEFAULT_TIMEOUT
}
fn default_retries() -> u32 {
    defaults::DEFAULT_RETRIES
}
fn default_restart_delay() -> Duration {
    defaults::DEFAULT_RESTART_DELAY
}
fn default_max_restarts() -> u32 {
    defaults::DEFAULT_MAX_RESTARTS
}
fn default_restart_window() -> Duration {
    defaults::DEFAULT_RESTART_WINDOW
}

/// A `health_checks` entry; CUSTOM checks only exist in code
#[derive(Debug, Deserialize)]
struct HealthCheckEntry {
    #[serde(rename = "type")]
    check_type: FileCheckType,
    #[serde(default)]
    url: Option<String>,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    process_name: Option<String>,

    #[serde(default = "default_interval", with = "duration_secs")]
    interval: Duration,
    #[serde(default = "default_timeout", with = "duration_secs")]
    timeout: Duration,
    #[serde(default = "default_retries")]
    retries: u32,

    #[serde(default = "default_true")]
    restart_enabled: bool,
    #[serde(default = "default_restart_delay", with = "duration_secs")]
    restart_delay: Duration,
    #[serde(default = "default_max_restarts")]
    max_restarts: u32,
    #[serde(default = "default_restart_window", with = "duration_secs")]
    restart_window: Duration,
}

impl HealthCheckEntry {
    fn into_config(self, name: String) -> Result<HealthCheckConfig, DomainError> {
        let missing = |field: &str| {
            DomainError::InvalidConfiguration(format!(
                "health check '{name}' is missing '{field}'"
            ))
        };
        let mut config = match self.check_type {
            FileCheckType::Http => {
                let url = self.url.ok_or_else(|| missing("url"))?;
                HealthCheckConfig::http(name.clone(), url)
            }
            FileCheckType::Tcp => {
                let port = self.port.ok_or_else(|| missing("port"))?;
                HealthCheckConfig::tcp(name.clone(), self.host, port)
            }
            FileCheckType::Process => {
                let process_name = self.process_name.ok_or_else(|| missing("process_name"))?;
                HealthCheckConfig::process(name.clone(), process_name)
            }
        }
        .with_interval(self.interval)
        .with_timeout(self.timeout)
        .with_retries(self.retries)
        .with_restart(self.max_restarts, self.restart_window, self.restart_delay);

        if !self.restart_enabled {
            config = config.without_restart();
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Default, Deserialize)]
struct SupervisorFile {
    #[serde(default)]
    services: BTreeMap<String, ServiceConfig>,
    #[serde(default)]
    health_checks: BTreeMap<String, HealthCheckEntry>,
}

/// Validated contents of a configuration file
#[derive(Debug, Default)]
pub struct LoadedConfig {
    pub services: Vec<ServiceConfig>,
    pub health_checks: Vec<HealthCheckConfig>,
}

pub fn load_file(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let loaded = parse_str(&contents, ConfigFormat::from_path(path)).map_err(|e| match e {
        ConfigError::Parse { message, .. } => ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    })?;
    debug!(
        path = %path.display(),
        services = loaded.services.len(),
        health_checks = loaded.health_checks.len(),
        "Loaded configuration file"
    );
    Ok(loaded)
}

pub fn parse_str(contents: &str, format: ConfigFormat) -> Result<LoadedConfig, ConfigError> {
    let parse_error = |message: String| ConfigError::Parse {
        path: PathBuf::from("<inline>"),
        message,
    };
    let file: SupervisorFile = match format {
        ConfigFormat::Json => serde_json::from_str(contents).map_err(|e| parse_error(e.to_string()))?,
        ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(|e| parse_error(e.to_string()))?,
    };

    let mut services = Vec::with_capacity(file.services.len());
    for (name, mut service) in file.services {
        service.name = name.clone();
        service
            .validate()
            .map_err(|source| ConfigError::Invalid { name, source })?;
        services.push(service);
    }

    let mut health_checks = Vec::with_capacity(file.health_checks.len());
    for (name, entry) in file.health_checks {
        let check = entry
            .into_config(name.clone())
            .map_err(|source| ConfigError::Invalid { name, source })?;
        health_checks.push(check);
    }

    Ok(LoadedConfig {
        services,
        health_checks,
    })
}
