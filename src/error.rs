//! Errors surfaced to callers of the workspace layer.
//!
//! Validation failures are raised before any backend call. Backend
//! failures are wrapped so callers can still tell them apart.

use crate::backend::BackendError;

/// Errors returned by gateway, session and execution operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// The logical path was rejected before reaching the backend.
    #[error("Invalid path '{path}': {reason}")]
    PathValidation { path: String, reason: String },

    /// Content exceeds the configured write ceiling.
    #[error("Content too large: {size} bytes (max {limit} bytes)")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The operation is not supported for this input.
    #[error("Unsupported operation: {message}")]
    UnsupportedOperation { message: String },

    /// No workspace has been provisioned for this owner.
    #[error("No workspace found for owner '{owner}'")]
    WorkspaceNotFound { owner: String },

    /// The backend could not be brought up, even after a retry.
    #[error("Workspace backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// The terminal session id is not registered.
    #[error("Terminal session not found: {id}")]
    SessionNotFound { id: String },

    /// The transport went away while a session was live.
    #[error("Connection lost: {message}")]
    ConnectionLost { message: String },

    /// Backend failure.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl WorkspaceError {
    /// Creates a `PathValidation` error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PathValidation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `UnsupportedOperation` error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            message: message.into(),
        }
    }

    /// Creates a `BackendUnavailable` error.
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }

    /// Returns true if this is a path validation error.
    pub fn is_path_validation(&self) -> bool {
        matches!(self, Self::PathValidation { .. })
    }

    /// Returns true if the operation was refused as unsupported.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedOperation { .. })
    }

    /// Stable machine-readable name, used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PathValidation { .. } => "path_validation",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::UnsupportedOperation { .. } => "unsupported_operation",
            Self::WorkspaceNotFound { .. } => "workspace_not_found",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::SessionNotFound { .. } => "session_not_found",
            Self::ConnectionLost { .. } => "connection_lost",
            Self::Backend(BackendError::NotFound { .. }) => "not_found",
            Self::Backend(_) => "backend",
        }
    }
}
