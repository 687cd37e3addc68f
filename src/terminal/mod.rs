//! Terminal sessions bridging a transport to an interactive process.
//!
//! Each session owns one task that forwards process output to the
//! transport and transport requests to the process. Input is written from
//! a companion task so a process that stops reading never stalls its
//! output. The session task is the only place a session ends, so the
//! process is closed exactly once whichever side goes away first.

mod session;

pub use session::{SessionInfo, SessionState, TerminalEvent};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::backend::{ProcessControl, TermSize};
use crate::error::WorkspaceError;
use crate::path::PathPolicy;
use crate::workspace::WorkspaceTarget;

use session::{SessionCommand, SessionEntry, DEGRADED_MESSAGE};

type Registry = Arc<RwLock<HashMap<String, SessionEntry>>>;

/// Pending requests per session before `input` waits.
const COMMAND_BUFFER: usize = 256;

/// How long a closing session may take to flush before it is cut off.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SessionManager {
    policy: PathPolicy,
    registry: Registry,
}

impl SessionManager {
    pub fn new(policy: PathPolicy) -> Self {
        Self {
            policy,
            registry: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Open a session in `cwd` and start bridging it to `events`.
    ///
    /// When the backend has no interactive shell the session still opens,
    /// flagged as degraded, and every input is answered with an error
    /// event. On failure an error event and `Disconnected` are sent before
    /// the error is returned.
    pub async fn connect(
        &self,
        target: &WorkspaceTarget,
        cwd: &str,
        size: TermSize,
        events: mpsc::Sender<TerminalEvent>,
    ) -> Result<String, WorkspaceError> {
        let mut info = SessionInfo::new(&target.workspace.id, cwd);

        let cwd = match self.policy.validate(cwd) {
            Ok(cwd) => cwd,
            Err(e) => return Err(fail(&events, &mut info, e).await),
        };
        info.working_dir = cwd.to_string();
        info.transition(SessionState::Provisioning);

        let process = if target.backend.supports_interactive_shell(&target.handle).await {
            match target
                .backend
                .spawn_interactive(&target.handle, &cwd, size)
                .await
            {
                Ok(process) => Some(process),
                Err(e) => return Err(fail(&events, &mut info, e.into()).await),
            }
        } else {
            warn!(
                "Workspace {} has no interactive shell, session {} is degraded",
                target.workspace.id, info.id
            );
            info.degraded = true;
            None
        };

        let (output, control) = match process {
            Some(process) => {
                let control: Arc<dyn ProcessControl> = Arc::from(process.control);
                (Some(process.output), Some(control))
            }
            None => (None, None),
        };

        let connected = TerminalEvent::Connected {
            session_id: info.id.clone(),
            working_dir: info.working_dir.clone(),
            degraded: info.degraded,
        };
        let mut announced = events.send(connected).await.is_ok();
        if announced && info.degraded {
            announced = events
                .send(TerminalEvent::Error(DEGRADED_MESSAGE.to_string()))
                .await
                .is_ok();
        }
        if !announced {
            if let Some(control) = &control {
                control.close().await;
            }
            info.transition(SessionState::Closed);
            return Err(WorkspaceError::ConnectionLost {
                message: format!("transport closed before session {} started", info.id),
            });
        }

        info.transition(SessionState::Active);
        let id = info.id.clone();
        let (commands, commands_rx) = mpsc::channel(COMMAND_BUFFER);

        // The task deregisters itself, so it must not run before the
        // entry exists.
        let mut registry = self.registry.write().await;
        let task = tokio::spawn(session::run(
            id.clone(),
            output,
            control.clone(),
            commands_rx,
            events,
            Arc::clone(&self.registry),
        ));
        registry.insert(
            id.clone(),
            SessionEntry {
                info,
                commands,
                control,
                task,
            },
        );
        info!("Opened terminal session {} in {}", id, cwd);
        Ok(id)
    }

    /// Forward raw input bytes, in order, to the session's process.
    pub async fn input(&self, id: &str, bytes: Vec<u8>) -> Result<(), WorkspaceError> {
        let commands = {
            let mut registry = self.registry.write().await;
            let entry = registry.get_mut(id).ok_or_else(|| not_found(id))?;
            entry.info.last_active_at = Utc::now();
            entry.commands.clone()
        };
        commands
            .send(SessionCommand::Input(bytes))
            .await
            .map_err(|_| not_found(id))
    }

    pub async fn resize(&self, id: &str, size: TermSize) -> Result<(), WorkspaceError> {
        let commands = self.commands(id).await?;
        commands
            .send(SessionCommand::Resize(size))
            .await
            .map_err(|_| not_found(id))
    }

    /// Close a session. Returns once its process has been released.
    pub async fn disconnect(&self, id: &str) -> Result<(), WorkspaceError> {
        let entry = self
            .registry
            .write()
            .await
            .remove(id)
            .ok_or_else(|| not_found(id))?;
        finish(id, entry).await;
        Ok(())
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        let registry = self.registry.read().await;
        let mut sessions: Vec<_> = registry.values().map(|entry| entry.info.clone()).collect();
        sessions.sort_by_key(|info| info.created_at);
        sessions
    }

    /// Close every live session.
    pub async fn shutdown(&self) {
        let entries: Vec<_> = self.registry.write().await.drain().collect();
        if !entries.is_empty() {
            info!("Closing {} terminal sessions", entries.len());
        }
        for (id, entry) in entries {
            finish(&id, entry).await;
        }
    }

    async fn commands(&self, id: &str) -> Result<mpsc::Sender<SessionCommand>, WorkspaceError> {
        let registry = self.registry.read().await;
        registry
            .get(id)
            .map(|entry| entry.commands.clone())
            .ok_or_else(|| not_found(id))
    }
}

fn not_found(id: &str) -> WorkspaceError {
    WorkspaceError::SessionNotFound { id: id.to_string() }
}

/// Report a failed connect on the transport and close the session.
async fn fail(
    events: &mpsc::Sender<TerminalEvent>,
    info: &mut SessionInfo,
    error: WorkspaceError,
) -> WorkspaceError {
    warn!("Terminal session {} failed to open: {}", info.id, error);
    info.transition(SessionState::Closed);
    let _ = events.send(TerminalEvent::Error(error.to_string())).await;
    let _ = events.send(TerminalEvent::Disconnected).await;
    error
}

/// Ask a session task to stop and wait for it. A task stuck on a slow
/// transport is aborted and its process closed here instead.
async fn finish(id: &str, entry: SessionEntry) {
    let SessionEntry {
        commands,
        control,
        mut task,
        ..
    } = entry;
    let _ = commands.send(SessionCommand::Disconnect).await;

    if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
        warn!("Session {} did not close in time, aborting", id);
        task.abort();
        if let Some(control) = control {
            control.close().await;
        }
    }
}
