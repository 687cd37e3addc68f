//! Hierarchical listings built from typed backend entries.

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::{BackendHandle, DirEntry, EntryKind, ExecutionBackend};
use crate::path::{LogicalPath, PathPolicy};

/// Extensions the execution service knows how to run.
const EXECUTABLE_EXTENSIONS: &[&str] = &[".py", ".js", ".java", ".sh", ".bat"];

/// One node of a file tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// `None` for directories.
    pub size: Option<u64>,
    pub permissions: String,
    pub modified: Option<DateTime<Utc>>,
    /// Editor language hint, `folder` for directories.
    pub language: &'static str,
    pub executable: bool,
    pub children: Vec<FileNode>,
}

impl FileNode {
    fn from_entry(entry: DirEntry, path: &LogicalPath, children: Vec<FileNode>) -> Self {
        let is_dir = entry.kind == EntryKind::Directory;
        let extension = path.extension();
        Self {
            language: if is_dir {
                "folder"
            } else {
                language_for(extension.as_deref())
            },
            executable: !is_dir && is_executable(extension.as_deref()),
            size: (!is_dir).then_some(entry.size),
            name: entry.name,
            path: path.to_string(),
            kind: entry.kind,
            permissions: entry.permissions,
            modified: entry.modified,
            children,
        }
    }
}

/// Editor language for a lowercased extension (with the dot).
pub fn language_for(extension: Option<&str>) -> &'static str {
    match extension.unwrap_or_default() {
        ".js" | ".jsx" => "javascript",
        ".ts" | ".tsx" => "typescript",
        ".py" => "python",
        ".java" => "java",
        ".html" => "html",
        ".css" => "css",
        ".json" => "json",
        ".md" => "markdown",
        ".yml" | ".yaml" => "yaml",
        ".xml" => "xml",
        ".sh" => "shell",
        ".bat" => "batch",
        ".dockerfile" => "dockerfile",
        ".sql" => "sql",
        ".php" => "php",
        ".rb" => "ruby",
        ".go" => "go",
        ".rs" => "rust",
        ".cpp" => "cpp",
        ".c" | ".h" => "c",
        _ => "text",
    }
}

pub fn is_executable(extension: Option<&str>) -> bool {
    extension.is_some_and(|ext| EXECUTABLE_EXTENSIONS.contains(&ext))
}

/// Directories first, then byte-wise by name.
fn sort_nodes(nodes: &mut [FileNode]) {
    nodes.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
}

/// Names a listing may legitimately contain.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

/// List `dir` and descend into subdirectories until `depth` levels have
/// been listed. A failed listing contributes no children.
pub(super) fn build<'a>(
    backend: &'a dyn ExecutionBackend,
    handle: &'a BackendHandle,
    policy: &'a PathPolicy,
    dir: LogicalPath,
    depth: usize,
) -> BoxFuture<'a, Vec<FileNode>> {
    async move {
        let entries = match backend.list_path(handle, &dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Listing {} failed, returning no children: {}", dir, e);
                return Vec::new();
            }
        };

        let mut nodes = Vec::with_capacity(entries.len());
        for entry in entries {
            if !is_plain_name(&entry.name) {
                debug!("Skipping odd entry name {:?} in {}", entry.name, dir);
                continue;
            }
            let path = dir.child(&entry.name);
            if policy.validate(path.as_str()).is_err() {
                continue;
            }
            let children = if entry.kind == EntryKind::Directory && depth > 1 {
                build(backend, handle, policy, path.clone(), depth - 1).await
            } else {
                Vec::new()
            };
            nodes.push(FileNode::from_entry(entry, &path, children));
        }

        sort_nodes(&mut nodes);
        nodes
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;

    fn path(raw: &str) -> LogicalPath {
        PathPolicy::default().validate(raw).unwrap()
    }

    async fn seed(mock: &MockBackend, files: &[&str]) {
        let handle = BackendHandle::new("h");
        for file in files {
            mock.write_path(&handle, &path(file), b"x").await.unwrap();
        }
    }

    #[test]
    fn test_language_table() {
        assert_eq!(language_for(Some(".py")), "python");
        assert_eq!(language_for(Some(".tsx")), "typescript");
        assert_eq!(language_for(Some(".unknown")), "text");
        assert_eq!(language_for(None), "text");
        assert!(is_executable(Some(".java")));
        assert!(!is_executable(Some(".md")));
        assert!(!is_executable(None));
    }

    #[tokio::test]
    async fn test_tree_orders_directories_first_then_names() {
        let mock = MockBackend::new();
        seed(&mock, &["/workspace/b.txt", "/workspace/c.txt", "/workspace/a/x.md"]).await;

        let policy = PathPolicy::default();
        let handle = BackendHandle::new("h");
        let tree = build(&mock, &handle, &policy, LogicalPath::root(), 4).await;

        let names: Vec<_> = tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["a", "b.txt", "c.txt"]);
        assert_eq!(tree[0].size, None);
        assert_eq!(tree[0].language, "folder");
        assert_eq!(tree[0].children[0].path, "/workspace/a/x.md");
        assert_eq!(tree[1].size, Some(1));
    }

    #[tokio::test]
    async fn test_tree_ordering_is_case_sensitive() {
        let mock = MockBackend::new();
        seed(&mock, &["/workspace/b.txt", "/workspace/B.txt", "/workspace/a.txt"]).await;

        let policy = PathPolicy::default();
        let handle = BackendHandle::new("h");
        let tree = build(&mock, &handle, &policy, LogicalPath::root(), 1).await;
        let names: Vec<_> = tree.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["B.txt", "a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn test_tree_respects_depth() {
        let mock = MockBackend::new();
        seed(&mock, &["/workspace/a/b/c/d/e.txt"]).await;

        let policy = PathPolicy::default();
        let handle = BackendHandle::new("h");
        let tree = build(&mock, &handle, &policy, LogicalPath::root(), 2).await;
        assert_eq!(tree[0].name, "a");
        assert_eq!(tree[0].children[0].name, "b");
        assert!(tree[0].children[0].children.is_empty());
    }

    #[tokio::test]
    async fn test_failed_subtree_yields_empty_children() {
        let mock = MockBackend::new();
        seed(&mock, &["/workspace/ok/a.txt", "/workspace/locked/b.txt"]).await;
        mock.break_listing("/workspace/locked");

        let policy = PathPolicy::default();
        let handle = BackendHandle::new("h");
        let tree = build(&mock, &handle, &policy, LogicalPath::root(), 4).await;
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].name, "locked");
        assert!(tree[0].children.is_empty());
        assert_eq!(tree[1].children.len(), 1);
    }

    #[tokio::test]
    async fn test_denied_children_are_hidden() {
        let mock = MockBackend::new();
        seed(&mock, &["/workspace/.secrets/key", "/workspace/app.js"]).await;

        let policy = PathPolicy::new(vec!["/workspace/.secrets".to_string()]);
        let handle = BackendHandle::new("h");
        let tree = build(&mock, &handle, &policy, LogicalPath::root(), 4).await;
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].name, "app.js");
        assert!(tree[0].executable);
        assert_eq!(tree[0].language, "javascript");
    }
}
