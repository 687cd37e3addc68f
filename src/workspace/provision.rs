use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{skeleton, Workspace, WorkspaceStatus, WorkspaceStore};
use crate::backend::{BackendHandle, BackendKind, BackendProvider, ExecutionBackend};
use crate::error::WorkspaceError;
use crate::files::FileGateway;

/// A workspace bound to its live backend.
#[derive(Clone)]
pub struct WorkspaceTarget {
    pub workspace: Workspace,
    pub handle: BackendHandle,
    pub backend: Arc<dyn ExecutionBackend>,
}

/// Creates, resolves and removes workspaces, one per owner.
pub struct Provisioner {
    /// Held across backend calls so one owner is never provisioned twice.
    store: Mutex<WorkspaceStore>,
    backends: Arc<dyn BackendProvider>,
    default_kind: BackendKind,
    gateway: FileGateway,
}

impl Provisioner {
    pub fn new(
        store: WorkspaceStore,
        backends: Arc<dyn BackendProvider>,
        default_kind: BackendKind,
        gateway: FileGateway,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            backends,
            default_kind,
            gateway,
        }
    }

    /// Return the owner's workspace, creating it on first call.
    ///
    /// Backend failure is not an error here: the record is stored as
    /// `unavailable` and healed by the next [`Provisioner::resolve`].
    pub async fn provision(&self, owner_id: &str) -> Result<Workspace> {
        let store = self.store.lock().await;
        if let Some(existing) = store.find(owner_id)? {
            info!("Workspace for {} already exists ({})", owner_id, existing.status);
            return Ok(existing);
        }

        let mut workspace = Workspace::new(owner_id, self.default_kind);
        store.upsert(&workspace)?;
        info!(
            "Provisioning {} workspace {} for {}",
            workspace.backend_kind, workspace.id, owner_id
        );

        self.bring_up(&mut workspace).await;
        store.upsert(&workspace)?;
        Ok(workspace)
    }

    /// Bind the owner's workspace to a running backend.
    pub async fn resolve(&self, owner_id: &str) -> Result<WorkspaceTarget> {
        let store = self.store.lock().await;
        let mut workspace = store
            .find(owner_id)?
            .ok_or_else(|| WorkspaceError::WorkspaceNotFound {
                owner: owner_id.to_string(),
            })?;

        if let Some(handle) = workspace.backend_handle.clone() {
            match self.attach(&workspace, &handle).await {
                Ok(backend) => {
                    if workspace.status != WorkspaceStatus::Active {
                        info!("Workspace {} is reachable again", workspace.id);
                        workspace.status = WorkspaceStatus::Active;
                        store.upsert(&workspace)?;
                    }
                    return Ok(WorkspaceTarget {
                        workspace,
                        handle,
                        backend,
                    });
                }
                Err(e) => warn!("Workspace {} did not start, recreating: {}", workspace.id, e),
            }
        } else {
            info!("Workspace {} is {}, retrying backend", workspace.id, workspace.status);
        }

        let target = self.bring_up(&mut workspace).await;
        store.upsert(&workspace)?;
        target.ok_or_else(|| {
            WorkspaceError::backend_unavailable(format!(
                "{} backend for workspace {} could not be created",
                workspace.backend_kind, workspace.id
            ))
            .into()
        })
    }

    /// Tear down the owner's backend and forget the record.
    pub async fn remove(&self, owner_id: &str) -> Result<bool> {
        let store = self.store.lock().await;
        let Some(workspace) = store.find(owner_id)? else {
            return Ok(false);
        };

        if let Some(handle) = &workspace.backend_handle {
            let backend = self
                .backends
                .get(workspace.backend_kind)
                .await
                .context("Backend unavailable, workspace not removed")?;
            backend
                .remove(handle)
                .await
                .with_context(|| format!("Failed to remove workspace {}", workspace.id))?;
        }

        store.delete(owner_id)?;
        info!("Removed workspace {} of {}", workspace.id, owner_id);
        Ok(true)
    }

    /// Stored record, without touching the backend.
    pub async fn status(&self, owner_id: &str) -> Result<Option<Workspace>> {
        self.store.lock().await.find(owner_id)
    }

    pub async fn list(&self) -> Result<Vec<Workspace>> {
        self.store.lock().await.load()
    }

    async fn attach(
        &self,
        workspace: &Workspace,
        handle: &BackendHandle,
    ) -> Result<Arc<dyn ExecutionBackend>> {
        let backend = self.backends.get(workspace.backend_kind).await?;
        backend.start(handle).await?;
        Ok(backend)
    }

    /// Create the backend, seeding it the first time it ever comes up.
    /// Updates status and handle in place.
    ///
    /// A workspace that already had a handle keeps its files and, when
    /// creation fails again, keeps the handle so a later attach can still
    /// reach it.
    async fn bring_up(&self, workspace: &mut Workspace) -> Option<WorkspaceTarget> {
        let first_time = workspace.backend_handle.is_none();
        let created = match self.backends.get(workspace.backend_kind).await {
            Ok(backend) => {
                debug!("Creating workspace {} on the {} backend", workspace.id, backend.kind());
                backend
                    .create(&workspace.spec())
                    .await
                    .map(|handle| (backend, handle))
            }
            Err(e) => Err(e),
        };

        match created {
            Ok((backend, handle)) => {
                workspace.backend_handle = Some(handle.clone());
                workspace.status = WorkspaceStatus::Active;
                let target = WorkspaceTarget {
                    workspace: workspace.clone(),
                    handle,
                    backend,
                };
                if first_time {
                    let failures = skeleton::seed(&self.gateway, &target).await;
                    if failures > 0 {
                        warn!(
                            "Workspace {} is active but {} skeleton entries failed",
                            workspace.id, failures
                        );
                    }
                }
                info!("Workspace {} is active", workspace.id);
                Some(target)
            }
            Err(e) => {
                warn!(
                    "Backend creation failed for workspace {}, marking unavailable: {}",
                    workspace.id, e
                );
                workspace.status = WorkspaceStatus::Unavailable;
                None
            }
        }
    }
}
