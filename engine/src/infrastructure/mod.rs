pub mod config;
pub mod health_check_executor;
pub mod log_alert_sink;
pub mod network;
pub mod sysinfo_inspector;

pub use config::{ConfigError, LoadedConfig, load_file};
pub use health_check_executor::{ProbeError, ProbeSuccess};
pub use log_alert_sink::LogAlertSink;
pub use sysinfo_inspector::SysinfoInspector;
