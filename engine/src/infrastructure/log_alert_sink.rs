use crate::domain::ports::{Alert, AlertSeverity, AlertSink};
use tracing::{error, info, warn};

/// Default alert sink: alerts become log lines
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn send_alert(&self, alert: Alert) {
        let service = alert.service.as_deref().unwrap_or("-");
        match alert.severity {
            AlertSeverity::Info => info!(
                category = %alert.category,
                service,
                "ALERT {}: {}",
                alert.title,
                alert.description
            ),
            AlertSeverity::Warning => warn!(
                category = %alert.category,
                service,
                "ALERT {}: {}",
                alert.title,
                alert.description
            ),
            AlertSeverity::Critical => error!(
                category = %alert.category,
                service,
                "ALERT {}: {}",
                alert.title,
                alert.description
            ),
        }
    }
}
