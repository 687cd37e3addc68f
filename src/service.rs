//! Owner-keyed entry point used by the CLI and the `serve` transport.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::backend::{BackendProvider, Backends, EntryKind, TermSize};
use crate::config::Config;
use crate::exec::{CommandService, ExecutionResult};
use crate::files::{FileGateway, FileNode};
use crate::path::PathPolicy;
use crate::terminal::{SessionInfo, SessionManager, TerminalEvent};
use crate::workspace::{Provisioner, Workspace, WorkspaceStore, WorkspaceTarget};

/// Maps an owner onto their workspace and forwards each operation to the
/// component that implements it.
pub struct WorkspaceService {
    provisioner: Provisioner,
    gateway: FileGateway,
    sessions: SessionManager,
    commands: CommandService,
}

impl WorkspaceService {
    pub fn new(config: &Config, home: &Path) -> Self {
        Self::with_backends(config, home, Arc::new(Backends::new(config, home)))
    }

    pub fn with_backends(
        config: &Config,
        home: &Path,
        backends: Arc<dyn BackendProvider>,
    ) -> Self {
        let gateway = FileGateway::new(&config.files);
        let policy = PathPolicy::new(config.files.deny_list.clone());
        Self {
            provisioner: Provisioner::new(
                WorkspaceStore::new(home),
                backends,
                config.backend.kind,
                gateway.clone(),
            ),
            gateway,
            sessions: SessionManager::new(policy.clone()),
            commands: CommandService::new(&config.execution, policy),
        }
    }

    pub async fn provision(&self, owner: &str) -> Result<Workspace> {
        self.provisioner.provision(owner).await
    }

    pub async fn status(&self, owner: &str) -> Result<Option<Workspace>> {
        self.provisioner.status(owner).await
    }

    pub async fn list(&self) -> Result<Vec<Workspace>> {
        self.provisioner.list().await
    }

    pub async fn remove(&self, owner: &str) -> Result<bool> {
        self.provisioner.remove(owner).await
    }

    /// Reject bad paths before the workspace backend is touched at all.
    async fn target(&self, owner: &str, paths: &[&str]) -> Result<WorkspaceTarget> {
        for path in paths {
            self.gateway.validate(path)?;
        }
        self.provisioner.resolve(owner).await
    }

    pub async fn get_tree(
        &self,
        owner: &str,
        path: &str,
        depth: Option<usize>,
    ) -> Result<Vec<FileNode>> {
        let target = self.target(owner, &[path]).await?;
        Ok(self.gateway.get_tree(&target, path, depth).await?)
    }

    pub async fn read_file(&self, owner: &str, path: &str) -> Result<String> {
        let target = self.target(owner, &[path]).await?;
        Ok(self.gateway.read_file(&target, path).await?)
    }

    pub async fn write_file(&self, owner: &str, path: &str, content: &str) -> Result<()> {
        let target = self.target(owner, &[path]).await?;
        Ok(self.gateway.write_file(&target, path, content).await?)
    }

    pub async fn create_entry(
        &self,
        owner: &str,
        path: &str,
        kind: EntryKind,
        content: Option<&str>,
    ) -> Result<()> {
        let target = self.target(owner, &[path]).await?;
        Ok(self.gateway.create_entry(&target, path, kind, content).await?)
    }

    pub async fn delete_entry(&self, owner: &str, path: &str) -> Result<()> {
        let target = self.target(owner, &[path]).await?;
        Ok(self.gateway.delete_entry(&target, path).await?)
    }

    pub async fn rename_entry(&self, owner: &str, from: &str, to: &str) -> Result<()> {
        let target = self.target(owner, &[from, to]).await?;
        Ok(self.gateway.rename_entry(&target, from, to).await?)
    }

    pub async fn move_entry(&self, owner: &str, from: &str, to: &str) -> Result<()> {
        let target = self.target(owner, &[from, to]).await?;
        Ok(self.gateway.move_entry(&target, from, to).await?)
    }

    pub async fn copy_entry(&self, owner: &str, from: &str, to: &str) -> Result<()> {
        let target = self.target(owner, &[from, to]).await?;
        Ok(self.gateway.copy_entry(&target, from, to).await?)
    }

    pub async fn run_file(
        &self,
        owner: &str,
        path: &str,
        cwd: Option<&str>,
    ) -> Result<ExecutionResult> {
        let mut paths = vec![path];
        paths.extend(cwd);
        let target = self.target(owner, &paths).await?;
        Ok(self.commands.run_file(&target, path, cwd).await?)
    }

    pub async fn run_command(
        &self,
        owner: &str,
        line: &str,
        cwd: Option<&str>,
    ) -> Result<ExecutionResult> {
        let paths: Vec<&str> = cwd.into_iter().collect();
        let target = self.target(owner, &paths).await?;
        Ok(self.commands.run_command(&target, line, cwd).await?)
    }

    /// Open a terminal session. Failures are also reported on `events`.
    pub async fn connect(
        &self,
        owner: &str,
        cwd: &str,
        size: TermSize,
        events: mpsc::Sender<TerminalEvent>,
    ) -> Result<String> {
        let target = match self.target(owner, &[cwd]).await {
            Ok(target) => target,
            Err(e) => {
                let _ = events.send(TerminalEvent::Error(e.to_string())).await;
                let _ = events.send(TerminalEvent::Disconnected).await;
                return Err(e);
            }
        };
        Ok(self.sessions.connect(&target, cwd, size, events).await?)
    }

    pub async fn input(&self, session: &str, bytes: Vec<u8>) -> Result<()> {
        Ok(self.sessions.input(session, bytes).await?)
    }

    pub async fn resize(&self, session: &str, size: TermSize) -> Result<()> {
        Ok(self.sessions.resize(session, size).await?)
    }

    pub async fn disconnect(&self, session: &str) -> Result<()> {
        Ok(self.sessions.disconnect(session).await?)
    }

    /// Live terminal sessions opened on the owner's workspace.
    pub async fn sessions(&self, owner: &str) -> Result<Vec<SessionInfo>> {
        let Some(workspace) = self.provisioner.status(owner).await? else {
            return Ok(Vec::new());
        };
        let mut sessions = self.sessions.list().await;
        sessions.retain(|session| session.workspace_id == workspace.id);
        Ok(sessions)
    }

    /// Release every terminal process. Called once on exit.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
    }
}
