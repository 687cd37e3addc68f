//! Execution backends for workspaces.
//!
//! A backend provides process execution and filesystem access for a
//! workspace. Two implementations exist: [`ContainerBackend`] drives a
//! Docker daemon, and [`HostBackend`] confines a workspace to a directory
//! on the local machine. Callers only ever see [`ExecutionBackend`].

mod container;
mod error;
mod host;
#[cfg(test)]
pub(crate) mod mock;
mod pty;

pub(crate) use container::ContainerBackend;
pub use error::BackendError;
pub(crate) use host::HostBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell};

use crate::config::Config;
use crate::path::LogicalPath;

/// Which isolation mechanism a workspace uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Docker container per workspace.
    Container,
    /// Directory on the local filesystem.
    #[default]
    Host,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => write!(f, "container"),
            Self::Host => write!(f, "host"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "container" | "containerized" | "docker" => Ok(Self::Container),
            "host" | "host-sandboxed" => Ok(Self::Host),
            _ => anyhow::bail!("Unknown backend kind: '{s}'. Supported: container, host"),
        }
    }
}

/// Opaque backend reference: a container id or a sandbox root directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendHandle(String);

impl BackendHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a backend needs to allocate a new environment.
#[derive(Debug, Clone)]
pub struct WorkspaceSpec {
    pub workspace_id: String,
    pub owner_id: String,
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    File,
}

/// One typed entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    /// Octal permission bits, e.g. `644`.
    pub permissions: String,
    pub modified: Option<DateTime<Utc>>,
}

/// Argument of a one-shot command.
///
/// `Path` arguments are translated by each backend onto its own view of
/// the workspace filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecArg {
    Literal(String),
    Path(LogicalPath),
}

impl ExecArg {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }
}

/// A bounded, non-interactive command.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub argv: Vec<ExecArg>,
    pub cwd: LogicalPath,
    pub timeout: Duration,
}

impl ExecRequest {
    /// Helper for plain commands made of literal arguments.
    pub fn literal<I, S>(argv: I, cwd: LogicalPath, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(ExecArg::literal).collect(),
            cwd,
            timeout,
        }
    }

    /// Program name (first argument), for messages.
    pub fn program(&self) -> String {
        match self.argv.first() {
            Some(ExecArg::Literal(s)) => s.clone(),
            Some(ExecArg::Path(p)) => p.to_string(),
            None => String::new(),
        }
    }
}

/// Outcome of a one-shot command. A timeout is a value, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// stdout and stderr interleaved in arrival order.
    pub output: String,
    pub exit_code: Option<i64>,
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Terminal dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for TermSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Control side of a live interactive process.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Forward raw bytes to the process input, unmodified.
    async fn write(&self, bytes: &[u8]) -> Result<(), BackendError>;

    /// Resize the pseudo-terminal.
    async fn resize(&self, size: TermSize) -> Result<(), BackendError>;

    /// Terminate the process and release its handles. Safe to call twice.
    async fn close(&self);
}

/// Duplex handle to an interactive process.
///
/// `output` yields chunks in the order the process produced them and is
/// closed once the process exits.
pub struct InteractiveProcess {
    pub output: mpsc::Receiver<Vec<u8>>,
    pub control: Box<dyn ProcessControl>,
}

/// Contract shared by every backend implementation.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Allocate the isolated environment and return its handle.
    async fn create(&self, spec: &WorkspaceSpec) -> Result<BackendHandle, BackendError>;

    /// Make sure the environment is running. Already running is success.
    async fn start(&self, handle: &BackendHandle) -> Result<(), BackendError>;

    async fn stop(&self, handle: &BackendHandle) -> Result<(), BackendError>;

    /// Tear the environment down for good.
    async fn remove(&self, handle: &BackendHandle) -> Result<(), BackendError>;

    /// Run a bounded command, killing it once `request.timeout` elapses.
    async fn exec(
        &self,
        handle: &BackendHandle,
        request: &ExecRequest,
    ) -> Result<ExecOutput, BackendError>;

    /// Whether `spawn_interactive` can provide a real shell right now.
    async fn supports_interactive_shell(&self, handle: &BackendHandle) -> bool;

    async fn spawn_interactive(
        &self,
        handle: &BackendHandle,
        cwd: &LogicalPath,
        size: TermSize,
    ) -> Result<InteractiveProcess, BackendError>;

    async fn read_path(
        &self,
        handle: &BackendHandle,
        path: &LogicalPath,
    ) -> Result<Vec<u8>, BackendError>;

    /// Write a file, creating missing parent directories.
    async fn write_path(
        &self,
        handle: &BackendHandle,
        path: &LogicalPath,
        contents: &[u8],
    ) -> Result<(), BackendError>;

    /// Create a directory and its parents. Existing directories are fine.
    async fn create_dir(&self, handle: &BackendHandle, path: &LogicalPath)
        -> Result<(), BackendError>;

    /// Immediate children of a directory.
    async fn list_path(
        &self,
        handle: &BackendHandle,
        path: &LogicalPath,
    ) -> Result<Vec<DirEntry>, BackendError>;

    /// Delete a file or a directory tree.
    async fn remove_path(
        &self,
        handle: &BackendHandle,
        path: &LogicalPath,
    ) -> Result<(), BackendError>;

    async fn move_path(
        &self,
        handle: &BackendHandle,
        from: &LogicalPath,
        to: &LogicalPath,
    ) -> Result<(), BackendError>;

    /// Copy a file or a directory tree.
    async fn copy_path(
        &self,
        handle: &BackendHandle,
        from: &LogicalPath,
        to: &LogicalPath,
    ) -> Result<(), BackendError>;
}

/// Source of backend instances by kind.
#[async_trait]
pub trait BackendProvider: Send + Sync {
    async fn get(&self, kind: BackendKind) -> Result<Arc<dyn ExecutionBackend>, BackendError>;
}

/// Lazily constructed backends, one instance per kind.
///
/// The Docker connection is only attempted when a container workspace
/// needs it, so host-only setups never touch the daemon.
pub struct Backends {
    config: Config,
    host: Arc<HostBackend>,
    container: OnceCell<Arc<ContainerBackend>>,
}

impl Backends {
    pub fn new(config: &Config, home: &std::path::Path) -> Self {
        Self {
            config: config.clone(),
            host: Arc::new(HostBackend::new(
                home.join("workspaces"),
                config.host.shells.clone(),
            )),
            container: OnceCell::new(),
        }
    }
}

#[async_trait]
impl BackendProvider for Backends {
    /// Backend instance for `kind`, connecting to Docker on first use.
    async fn get(&self, kind: BackendKind) -> Result<Arc<dyn ExecutionBackend>, BackendError> {
        match kind {
            BackendKind::Host => Ok(self.host.clone()),
            BackendKind::Container => {
                let backend = self
                    .container
                    .get_or_try_init(|| async {
                        ContainerBackend::connect(self.config.container.clone())
                            .await
                            .map(Arc::new)
                    })
                    .await?;
                Ok(backend.clone())
            }
        }
    }
}
