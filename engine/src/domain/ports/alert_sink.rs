use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub title: String,
    pub description: String,
    pub severity: AlertSeverity,
    pub category: String,
    pub service: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        severity: AlertSeverity,
        category: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
            category: category.into(),
            service: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }
}

/// Fire-and-forget alert delivery; implementations must not block for long
pub trait AlertSink: Send + Sync {
    fn send_alert(&self, alert: Alert);
}
