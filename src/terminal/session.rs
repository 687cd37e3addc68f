//! Per-session types and the bridging task.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{ProcessControl, TermSize};

use super::Registry;

/// Events sent back over the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    Connected {
        session_id: String,
        working_dir: String,
        degraded: bool,
    },
    Output(Vec<u8>),
    Error(String),
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Requested,
    Provisioning,
    Active,
    Closed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub workspace_id: String,
    pub working_dir: String,
    pub state: SessionState,
    /// No real shell behind this session.
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl SessionInfo {
    pub(super) fn new(workspace_id: &str, working_dir: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.to_string(),
            working_dir: working_dir.to_string(),
            state: SessionState::Requested,
            degraded: false,
            created_at: now,
            last_active_at: now,
        }
    }

    pub(super) fn transition(&mut self, state: SessionState) {
        debug!("Session {}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
    }
}

/// Requests from the transport side, applied in arrival order.
#[derive(Debug)]
pub(super) enum SessionCommand {
    Input(Vec<u8>),
    Resize(TermSize),
    Disconnect,
}

/// Registry entry for a live session.
pub(super) struct SessionEntry {
    pub info: SessionInfo,
    pub commands: mpsc::Sender<SessionCommand>,
    pub control: Option<Arc<dyn ProcessControl>>,
    pub task: tokio::task::JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Requested,
    ProcessExited,
    TransportLost,
}

pub(super) const DEGRADED_MESSAGE: &str =
    "interactive shell unavailable in this workspace; file operations still work";

/// Next output chunk, or never when there is no process.
async fn next_output(output: &mut Option<mpsc::Receiver<Vec<u8>>>) -> Option<Vec<u8>> {
    match output {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Feed input to the process in order from its own task. A process that
/// stops reading input must not stop its output from being forwarded.
fn spawn_writer(
    id: String,
    control: Arc<dyn ProcessControl>,
    events: mpsc::Sender<TerminalEvent>,
) -> (mpsc::UnboundedSender<Vec<u8>>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let task = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Err(e) = control.write(&bytes).await {
                debug!("Write to session {} failed: {}", id, e);
                let message = format!("failed to write to shell: {e}");
                if events.send(TerminalEvent::Error(message)).await.is_err() {
                    break;
                }
            }
        }
    });
    (tx, task)
}

/// Bridge one session until disconnect, process exit or transport loss,
/// then close the process and deregister.
pub(super) async fn run(
    id: String,
    mut output: Option<mpsc::Receiver<Vec<u8>>>,
    control: Option<Arc<dyn ProcessControl>>,
    mut commands: mpsc::Receiver<SessionCommand>,
    events: mpsc::Sender<TerminalEvent>,
    registry: Registry,
) {
    let mut writer = control
        .clone()
        .map(|control| spawn_writer(id.clone(), control, events.clone()));

    let reason = loop {
        tokio::select! {
            chunk = next_output(&mut output) => match chunk {
                Some(bytes) => {
                    if events.send(TerminalEvent::Output(bytes)).await.is_err() {
                        break CloseReason::TransportLost;
                    }
                }
                None => break CloseReason::ProcessExited,
            },
            command = commands.recv() => match command {
                Some(SessionCommand::Input(bytes)) => {
                    let queued = writer.as_ref().is_some_and(|(input, _)| input.send(bytes).is_ok());
                    if !queued {
                        let message = if writer.is_some() {
                            "failed to write to shell: input closed".to_string()
                        } else {
                            DEGRADED_MESSAGE.to_string()
                        };
                        if events.send(TerminalEvent::Error(message)).await.is_err() {
                            break CloseReason::TransportLost;
                        }
                    }
                }
                Some(SessionCommand::Resize(size)) => {
                    if let Some(control) = &control {
                        if let Err(e) = control.resize(size).await {
                            debug!("Resize of session {} failed: {}", id, e);
                        }
                    }
                }
                Some(SessionCommand::Disconnect) | None => break CloseReason::Requested,
            },
            () = events.closed() => break CloseReason::TransportLost,
        }
    };

    if let Some(control) = &control {
        control.close().await;
    }
    // Anything still queued is for a process that is gone.
    if let Some((input, task)) = writer.take() {
        drop(input);
        task.abort();
    }
    registry.write().await.remove(&id);

    match reason {
        CloseReason::TransportLost => {
            error!("Session {} lost its transport, process released", id);
        }
        CloseReason::ProcessExited => {
            info!("Session {} ended: shell exited", id);
            if events.send(TerminalEvent::Disconnected).await.is_err() {
                warn!("Session {} closed after its transport", id);
            }
        }
        CloseReason::Requested => {
            info!("Session {} disconnected", id);
            let _ = events.send(TerminalEvent::Disconnected).await;
        }
    }
}
