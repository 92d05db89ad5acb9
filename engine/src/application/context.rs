//! Supervisor composition root
//! Shared collaborators handed to every component at construction

use crate::domain::ports::{AlertSink, ProcessInspector};
use crate::domain::services::HealthMonitor;
use crate::infrastructure::{LogAlertSink, SysinfoInspector};
use std::sync::Arc;

#[derive(Clone)]
pub struct SupervisorContext {
    pub inspector: Arc<dyn ProcessInspector>,
    pub alerts: Arc<dyn AlertSink>,
}

impl SupervisorContext {
    pub fn new(inspector: Arc<dyn ProcessInspector>, alerts: Arc<dyn AlertSink>) -> Self {
        Self { inspector, alerts }
    }

    /// Real process table, alerts to the log
    pub fn system() -> Self {
        Self::new(Arc::new(SysinfoInspector::new()), Arc::new(LogAlertSink))
    }

    pub fn health_monitor(&self) -> Arc<HealthMonitor> {
        HealthMonitor::new(Arc::clone(&self.inspector), Arc::clone(&self.alerts))
    }
}

impl std::fmt::Debug for SupervisorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorContext").finish_non_exhaustive()
    }
}
