use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::Workspace;

const STORE_FILE: &str = "workspaces.toml";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default, rename = "workspace")]
    workspaces: Vec<Workspace>,
}

/// Durable workspace records, one TOML file under the nook home.
#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    path: PathBuf,
}

impl WorkspaceStore {
    pub fn new(home: &Path) -> Self {
        Self {
            path: home.join(STORE_FILE),
        }
    }

    /// Load all records, empty if the file does not exist yet
    pub fn load(&self) -> Result<Vec<Workspace>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read store file: {}", self.path.display()))?;

        let file: StoreFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse store file: {}", self.path.display()))?;

        Ok(file.workspaces)
    }

    pub fn find(&self, owner_id: &str) -> Result<Option<Workspace>> {
        Ok(self
            .load()?
            .into_iter()
            .find(|ws| ws.owner_id == owner_id))
    }

    /// Insert or replace the record for the workspace's owner
    pub fn upsert(&self, workspace: &Workspace) -> Result<()> {
        let mut all = self.load()?;
        match all.iter_mut().find(|ws| ws.owner_id == workspace.owner_id) {
            Some(existing) => *existing = workspace.clone(),
            None => all.push(workspace.clone()),
        }
        self.save(all)
    }

    /// Delete the owner's record. Returns false if there was none.
    pub fn delete(&self, owner_id: &str) -> Result<bool> {
        let mut all = self.load()?;
        let before = all.len();
        all.retain(|ws| ws.owner_id != owner_id);
        if all.len() == before {
            return Ok(false);
        }
        self.save(all)?;
        Ok(true)
    }

    fn save(&self, workspaces: Vec<Workspace>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(&StoreFile { workspaces })
            .context("Failed to serialize workspace records")?;

        // Write then rename so a crash never leaves a truncated store.
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content)
            .with_context(|| format!("Failed to write store file: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace store file: {}", self.path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendHandle, BackendKind};
    use crate::workspace::WorkspaceStatus;
    use tempfile::tempdir;

    #[test]
    fn test_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(dir.path());

        let mut ws = Workspace::new("alice", BackendKind::Container);
        ws.backend_handle = Some(BackendHandle::new("abc123"));
        ws.status = WorkspaceStatus::Active;
        store.upsert(&ws).unwrap();

        let loaded = store.find("alice").unwrap().unwrap();
        assert_eq!(loaded, ws);
    }

    #[test]
    fn test_unavailable_record_has_no_handle() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(dir.path());

        let mut ws = Workspace::new("bob", BackendKind::Host);
        ws.status = WorkspaceStatus::Unavailable;
        store.upsert(&ws).unwrap();

        let loaded = store.find("bob").unwrap().unwrap();
        assert_eq!(loaded.status, WorkspaceStatus::Unavailable);
        assert!(loaded.backend_handle.is_none());
    }

    #[test]
    fn test_upsert_replaces_by_owner() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(dir.path());

        let mut ws = Workspace::new("alice", BackendKind::Host);
        store.upsert(&ws).unwrap();
        ws.status = WorkspaceStatus::Active;
        store.upsert(&ws).unwrap();
        store.upsert(&Workspace::new("bob", BackendKind::Host)).unwrap();

        let all = store.load().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].status, WorkspaceStatus::Active);
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(dir.path());
        store.upsert(&Workspace::new("alice", BackendKind::Host)).unwrap();

        assert!(store.delete("alice").unwrap());
        assert!(!store.delete("alice").unwrap());
        assert!(store.find("alice").unwrap().is_none());
    }

    #[test]
    fn test_load_nonexistent() {
        let dir = tempdir().unwrap();
        let store = WorkspaceStore::new(&dir.path().join("missing"));
        assert!(store.load().unwrap().is_empty());
    }
}
