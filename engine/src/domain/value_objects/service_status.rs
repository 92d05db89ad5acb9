use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
    Restarting,
}

impl ServiceStatus {
    /// Whether `start()` may spawn a process from this state
    pub fn is_startable(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed | Self::Restarting)
    }

    /// Whether `stop()` has anything to tear down
    pub fn is_stoppable(self) -> bool {
        matches!(self, Self::Running | Self::Starting)
    }

    pub fn can_transition_to(self, next: ServiceStatus) -> bool {
        use ServiceStatus::*;
        matches!(
            (self, next),
            (Stopped | Failed | Restarting, Starting)
                | (Starting, Running | Failed | Stopping)
                | (Running, Stopping | Failed | Restarting)
                | (Stopped | Failed, Restarting)
                | (Stopping | Failed, Stopped)
        )
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
            Self::Restarting => "restarting",
        };
        f.write_str(s)
    }
}
