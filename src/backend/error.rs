//! Domain-specific error types for execution backends.
//!
//! Typed errors enable callers to match on specific failure modes
//! rather than parsing error message strings.

/// Errors that can occur during backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Docker daemon is not running or not accessible.
    #[error("Docker is not available: {message}")]
    DockerUnavailable { message: String },

    /// Container image was not found and could not be pulled.
    #[error("Container image not found: {image}")]
    ImageNotFound { image: String },

    /// Container operation failed (create, start, exec, etc.).
    #[error("Container operation failed: {message}")]
    ContainerFailed { message: String },

    /// The isolated environment could not be allocated.
    #[error("Failed to provision workspace backend: {message}")]
    Provisioning { message: String },

    /// A process could not be started at all (missing binary, bad cwd).
    #[error("Failed to spawn '{program}': {message}")]
    SpawnFailed { program: String, message: String },

    /// The requested path does not exist inside the workspace.
    #[error("No such file or directory: {path}")]
    NotFound { path: String },

    /// The destination of a move or copy is already taken.
    #[error("Destination already exists: {path}")]
    AlreadyExists { path: String },

    /// A helper command inside the workspace exited unsuccessfully.
    #[error("Command '{command}' failed with exit code {exit_code:?}: {output}")]
    CommandFailed {
        command: String,
        exit_code: Option<i64>,
        output: String,
    },

    /// A path resolved outside of the workspace root.
    #[error("Path escapes the workspace root: {path}")]
    Confinement { path: String },

    /// The backend cannot provide an interactive shell.
    #[error("Interactive shell unavailable: {message}")]
    ShellUnavailable { message: String },

    /// Local filesystem or pipe failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Creates a `DockerUnavailable` error.
    pub fn docker_unavailable(message: impl Into<String>) -> Self {
        Self::DockerUnavailable {
            message: message.into(),
        }
    }

    /// Creates an `ImageNotFound` error.
    pub fn image_not_found(image: impl Into<String>) -> Self {
        Self::ImageNotFound {
            image: image.into(),
        }
    }

    /// Creates a `ContainerFailed` error.
    pub fn container_failed(message: impl Into<String>) -> Self {
        Self::ContainerFailed {
            message: message.into(),
        }
    }

    /// Creates a `Provisioning` error.
    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::Provisioning {
            message: message.into(),
        }
    }

    /// Creates a `SpawnFailed` error.
    pub fn spawn_failed(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Creates an `AlreadyExists` error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    /// Creates a `Confinement` error.
    pub fn confinement(path: impl Into<String>) -> Self {
        Self::Confinement { path: path.into() }
    }

    /// Creates a `ShellUnavailable` error.
    pub fn shell_unavailable(message: impl Into<String>) -> Self {
        Self::ShellUnavailable {
            message: message.into(),
        }
    }

    /// Returns true if the failure happened before any process started.
    #[cfg(test)]
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, Self::SpawnFailed { .. })
    }

    /// Returns true if this is a Docker unavailability error.
    #[cfg(test)]
    pub fn is_docker_unavailable(&self) -> bool {
        matches!(self, Self::DockerUnavailable { .. })
    }

    /// Returns true if the target path is missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
