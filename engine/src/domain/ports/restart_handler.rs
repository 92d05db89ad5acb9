use crate::domain::Result;
use async_trait::async_trait;

/// Restart action invoked by the HealthMonitor on sustained failure
///
/// `ProcessManager` implements it; tests and embedders can plug their own.
#[async_trait]
pub trait RestartHandler: Send + Sync {
    async fn restart_service(&self, name: &str) -> Result<()>;
}
