//! File operation gateway.
//!
//! Every inbound path is validated before the backend sees it, and every
//! operation goes through the workspace's [`ExecutionBackend`], so the
//! gateway never knows which backend it is talking to.
//!
//! [`ExecutionBackend`]: crate::backend::ExecutionBackend

mod tree;

pub use tree::FileNode;

use tracing::{debug, info};

use crate::backend::EntryKind;
use crate::config::FilesConfig;
use crate::error::WorkspaceError;
use crate::path::{LogicalPath, PathPolicy};
use crate::workspace::WorkspaceTarget;

#[derive(Debug, Clone)]
pub struct FileGateway {
    policy: PathPolicy,
    max_write_bytes: usize,
    tree_depth: usize,
}

impl FileGateway {
    pub fn new(config: &FilesConfig) -> Self {
        Self {
            policy: PathPolicy::new(config.deny_list.clone()),
            max_write_bytes: config.max_write_bytes,
            tree_depth: config.tree_depth,
        }
    }

    pub fn validate(&self, raw: &str) -> Result<LogicalPath, WorkspaceError> {
        self.policy.validate(raw)
    }

    fn check_size(&self, content: &str) -> Result<(), WorkspaceError> {
        if content.len() > self.max_write_bytes {
            return Err(WorkspaceError::PayloadTooLarge {
                size: content.len(),
                limit: self.max_write_bytes,
            });
        }
        Ok(())
    }

    /// Paths that may be removed or relocated: anything but the root.
    fn validate_movable(&self, raw: &str, action: &str) -> Result<LogicalPath, WorkspaceError> {
        let path = self.validate(raw)?;
        if path.is_root() {
            return Err(WorkspaceError::unsupported(format!(
                "cannot {action} the workspace root"
            )));
        }
        Ok(path)
    }

    /// Validate both ends of a move or copy.
    fn validate_pair(
        &self,
        from: &str,
        to: &str,
        action: &str,
    ) -> Result<(LogicalPath, LogicalPath), WorkspaceError> {
        let source = self.validate_movable(from, action)?;
        let target = self.validate_movable(to, action)?;
        if target.starts_with(&source) {
            return Err(WorkspaceError::unsupported(format!(
                "cannot {action} {source} into itself"
            )));
        }
        Ok((source, target))
    }

    /// Tree below `raw`, `depth` levels deep (configured default if unset).
    pub async fn get_tree(
        &self,
        target: &WorkspaceTarget,
        raw: &str,
        depth: Option<usize>,
    ) -> Result<Vec<FileNode>, WorkspaceError> {
        let root = self.validate(raw)?;
        let depth = depth.unwrap_or(self.tree_depth).max(1);
        debug!("Building tree of {} ({} levels)", root, depth);
        Ok(tree::build(
            target.backend.as_ref(),
            &target.handle,
            &self.policy,
            root,
            depth,
        )
        .await)
    }

    /// File contents as text. Invalid UTF-8 is replaced, not rejected.
    pub async fn read_file(
        &self,
        target: &WorkspaceTarget,
        raw: &str,
    ) -> Result<String, WorkspaceError> {
        let path = self.validate(raw)?;
        let bytes = target.backend.read_path(&target.handle, &path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write a file, creating parent directories as needed.
    pub async fn write_file(
        &self,
        target: &WorkspaceTarget,
        raw: &str,
        content: &str,
    ) -> Result<(), WorkspaceError> {
        self.check_size(content)?;
        let path = self.validate(raw)?;
        if path.is_root() {
            return Err(WorkspaceError::unsupported("the workspace root is a directory"));
        }
        target
            .backend
            .write_path(&target.handle, &path, content.as_bytes())
            .await?;
        debug!("Wrote {} bytes to {}", content.len(), path);
        Ok(())
    }

    /// Create a file (with optional content) or a directory. Creating an
    /// existing directory is not an error.
    pub async fn create_entry(
        &self,
        target: &WorkspaceTarget,
        raw: &str,
        kind: EntryKind,
        content: Option<&str>,
    ) -> Result<(), WorkspaceError> {
        match kind {
            EntryKind::Directory => {
                let path = self.validate(raw)?;
                target.backend.create_dir(&target.handle, &path).await?;
                Ok(())
            }
            EntryKind::File => {
                self.write_file(target, raw, content.unwrap_or_default())
                    .await
            }
        }
    }

    /// Delete a file, or a directory and everything below it.
    pub async fn delete_entry(
        &self,
        target: &WorkspaceTarget,
        raw: &str,
    ) -> Result<(), WorkspaceError> {
        let path = self.validate_movable(raw, "delete")?;
        target.backend.remove_path(&target.handle, &path).await?;
        info!("Deleted {}", path);
        Ok(())
    }

    /// Rename in place: the new path must share the old path's directory.
    pub async fn rename_entry(
        &self,
        target: &WorkspaceTarget,
        from: &str,
        to: &str,
    ) -> Result<(), WorkspaceError> {
        let (source, dest) = self.validate_pair(from, to, "rename")?;
        if source.parent() != dest.parent() {
            return Err(WorkspaceError::unsupported(format!(
                "rename keeps the directory; use move for {source} -> {dest}"
            )));
        }
        target
            .backend
            .move_path(&target.handle, &source, &dest)
            .await?;
        info!("Renamed {} to {}", source, dest);
        Ok(())
    }

    pub async fn move_entry(
        &self,
        target: &WorkspaceTarget,
        from: &str,
        to: &str,
    ) -> Result<(), WorkspaceError> {
        let (source, dest) = self.validate_pair(from, to, "move")?;
        target
            .backend
            .move_path(&target.handle, &source, &dest)
            .await?;
        info!("Moved {} to {}", source, dest);
        Ok(())
    }

    /// Copy a file or a directory tree.
    pub async fn copy_entry(
        &self,
        target: &WorkspaceTarget,
        from: &str,
        to: &str,
    ) -> Result<(), WorkspaceError> {
        let (source, dest) = self.validate_pair(from, to, "copy")?;
        target
            .backend
            .copy_path(&target.handle, &source, &dest)
            .await?;
        info!("Copied {} to {}", source, dest);
        Ok(())
    }
}
