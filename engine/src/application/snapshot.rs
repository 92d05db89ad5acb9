//! Status snapshot persisted by the manager's run loop

use crate::domain::value_objects::{ServiceStats, SystemUsage};
use crate::domain::{DomainError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: DateTime<Utc>,
    pub services: BTreeMap<String, ServiceStats>,
    pub system: SystemUsage,
}

impl StatusSnapshot {
    /// Write as pretty JSON via a temp file and rename
    pub async fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| DomainError::Snapshot(format!("serialize: {e}")))?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DomainError::Snapshot(format!("create {}: {e}", parent.display()))
            })?;
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| DomainError::Snapshot(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| DomainError::Snapshot(format!("rename to {}: {e}", path.display())))?;
        Ok(())
    }

    pub async fn read_from(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DomainError::Snapshot(format!("read {}: {e}", path.display())))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| DomainError::Snapshot(format!("parse {}: {e}", path.display())))
    }
}
