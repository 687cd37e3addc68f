//! Workspace records and their lifecycle.

mod provision;
mod skeleton;
mod store;

pub(crate) use provision::{Provisioner, WorkspaceTarget};
pub(crate) use store::WorkspaceStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backend::{BackendHandle, BackendKind, WorkspaceSpec};
use crate::path::WORKSPACE_ROOT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Provisioning,
    Active,
    /// Backend creation failed; retried on next use.
    Unavailable,
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioning => write!(f, "provisioning"),
            Self::Active => write!(f, "active"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// One owner's isolated environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub owner_id: String,
    pub backend_kind: BackendKind,
    pub backend_handle: Option<BackendHandle>,
    pub root: String,
    pub created_at: DateTime<Utc>,
    pub status: WorkspaceStatus,
}

impl Workspace {
    pub fn new(owner_id: &str, backend_kind: BackendKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            backend_kind,
            backend_handle: None,
            root: WORKSPACE_ROOT.to_string(),
            created_at: Utc::now(),
            status: WorkspaceStatus::Provisioning,
        }
    }

    pub fn spec(&self) -> WorkspaceSpec {
        WorkspaceSpec {
            workspace_id: self.id.clone(),
            owner_id: self.owner_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_workspace_defaults() {
        let ws = Workspace::new("alice", BackendKind::Host);
        assert_eq!(ws.owner_id, "alice");
        assert_eq!(ws.status, WorkspaceStatus::Provisioning);
        assert_eq!(ws.root, "/workspace");
        assert!(ws.backend_handle.is_none());
        assert_eq!(ws.spec().workspace_id, ws.id);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(WorkspaceStatus::Unavailable.to_string(), "unavailable");
        assert_eq!(WorkspaceStatus::Active.to_string(), "active");
    }
}
