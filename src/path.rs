//! Logical workspace paths.
//!
//! Every path a caller hands us is a *logical* path rooted at
//! [`WORKSPACE_ROOT`]. A [`LogicalPath`] can only be obtained through
//! [`PathPolicy::validate`], so holding one means the path already passed
//! traversal, root and deny-list checks.

use std::fmt;

use crate::error::WorkspaceError;

/// Root marker every logical path must start with.
pub const WORKSPACE_ROOT: &str = "/workspace";

/// System locations that are never reachable, even if a root alias maps
/// onto them.
pub fn default_deny_list() -> Vec<String> {
    ["/etc/passwd", "/etc/shadow", "/root", "/proc", "/sys"]
        .iter()
        .map(|p| (*p).to_string())
        .collect()
}

/// A validated, normalized, workspace-rooted path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalPath(String);

impl LogicalPath {
    /// The workspace root itself.
    pub fn root() -> Self {
        Self(WORKSPACE_ROOT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == WORKSPACE_ROOT
    }

    /// Path relative to the root, without a leading slash. Empty for the root.
    pub fn relative(&self) -> &str {
        self.0
            .strip_prefix(WORKSPACE_ROOT)
            .unwrap_or_default()
            .trim_start_matches('/')
    }

    /// Final path segment (`workspace` for the root).
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Parent directory, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let idx = self.0.rfind('/')?;
        Some(Self(self.0[..idx].to_string()))
    }

    /// Child entry by name. Names come from directory listings, which never
    /// contain separators.
    pub fn child(&self, name: &str) -> Self {
        Self(format!("{}/{}", self.0, name.trim_matches('/')))
    }

    /// Lowercased extension including the dot (e.g. `.py`).
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        let idx = name.rfind('.')?;
        if idx == 0 {
            return None;
        }
        Some(name[idx..].to_lowercase())
    }

    /// True if `self` equals `other` or lives underneath it.
    pub fn starts_with(&self, other: &LogicalPath) -> bool {
        self.0 == other.0 || self.0.starts_with(&format!("{}/", other.0))
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LogicalPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validation rules for inbound logical paths.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    deny_list: Vec<String>,
}

impl Default for PathPolicy {
    fn default() -> Self {
        Self::new(default_deny_list())
    }
}

impl PathPolicy {
    pub fn new(deny_list: Vec<String>) -> Self {
        Self { deny_list }
    }

    /// Validate and normalize a raw logical path.
    ///
    /// Rejects empty input, any `..` or `~`, NUL bytes, paths outside the
    /// workspace root and anything under a deny-listed prefix.
    pub fn validate(&self, raw: &str) -> Result<LogicalPath, WorkspaceError> {
        if raw.trim().is_empty() {
            return Err(WorkspaceError::invalid_path(raw, "path is empty"));
        }
        if raw.contains("..") || raw.contains('~') {
            return Err(WorkspaceError::invalid_path(
                raw,
                "directory traversal not allowed",
            ));
        }
        if raw.contains('\0') {
            return Err(WorkspaceError::invalid_path(raw, "path contains a NUL byte"));
        }
        if !raw.starts_with('/') {
            return Err(WorkspaceError::invalid_path(
                raw,
                "path must be absolute (start with /)",
            ));
        }

        let normalized = normalize(raw);

        if self
            .deny_list
            .iter()
            .any(|denied| normalized == *denied || normalized.starts_with(&format!("{denied}/")))
        {
            return Err(WorkspaceError::invalid_path(
                raw,
                "access to this path is forbidden",
            ));
        }

        if normalized != WORKSPACE_ROOT && !normalized.starts_with(&format!("{WORKSPACE_ROOT}/")) {
            return Err(WorkspaceError::invalid_path(
                raw,
                format!("path must be inside {WORKSPACE_ROOT}"),
            ));
        }

        Ok(LogicalPath(normalized))
    }
}

/// Collapse repeated separators, drop `.` segments and trailing slashes.
fn normalize(raw: &str) -> String {
    let segments: Vec<&str> = raw
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(raw: &str) -> Result<LogicalPath, WorkspaceError> {
        PathPolicy::default().validate(raw)
    }

    #[test]
    fn test_accepts_root_and_children() {
        assert!(validate("/workspace").unwrap().is_root());
        assert_eq!(
            validate("/workspace/src/index.js").unwrap().as_str(),
            "/workspace/src/index.js"
        );
    }

    #[test]
    fn test_normalizes_separators_and_dots() {
        assert_eq!(
            validate("/workspace//src/./lib/").unwrap().as_str(),
            "/workspace/src/lib"
        );
        assert!(validate("/workspace/").unwrap().is_root());
    }

    #[test]
    fn test_rejects_traversal_and_home() {
        for raw in [
            "/workspace/../etc/passwd",
            "/workspace/a/..",
            "/workspace/a..b",
            "~/secrets",
            "/workspace/~user",
        ] {
            let err = validate(raw).unwrap_err();
            assert!(err.is_path_validation(), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_rejects_relative_and_empty() {
        assert!(validate("").unwrap_err().is_path_validation());
        assert!(validate("   ").unwrap_err().is_path_validation());
        assert!(validate("workspace/a.txt").unwrap_err().is_path_validation());
        assert!(validate("src/a.txt").unwrap_err().is_path_validation());
    }

    #[test]
    fn test_rejects_outside_root() {
        assert!(validate("/tmp/a.txt").unwrap_err().is_path_validation());
        assert!(validate("/workspacefoo").unwrap_err().is_path_validation());
        assert!(validate("/").unwrap_err().is_path_validation());
    }

    #[test]
    fn test_rejects_deny_list() {
        let err = validate("/proc/self/environ").unwrap_err();
        assert!(err.to_string().contains("forbidden"));
        assert!(validate("/etc/shadow").unwrap_err().is_path_validation());
        assert!(validate("/root/.ssh").unwrap_err().is_path_validation());
    }

    #[test]
    fn test_custom_deny_list_inside_root() {
        let policy = PathPolicy::new(vec!["/workspace/.secrets".to_string()]);
        assert!(policy.validate("/workspace/.secrets/key").is_err());
        assert!(policy.validate("/workspace/.secrets-public").is_ok());
    }

    #[test]
    fn test_rejects_nul_byte() {
        assert!(validate("/workspace/a\0b").unwrap_err().is_path_validation());
    }

    #[test]
    fn test_relative_parent_and_name() {
        let path = validate("/workspace/src/app/main.py").unwrap();
        assert_eq!(path.relative(), "src/app/main.py");
        assert_eq!(path.file_name(), "main.py");
        assert_eq!(path.parent().unwrap().as_str(), "/workspace/src/app");
        assert_eq!(path.extension().as_deref(), Some(".py"));

        let root = LogicalPath::root();
        assert_eq!(root.relative(), "");
        assert!(root.parent().is_none());
        assert_eq!(validate("/workspace/src").unwrap().parent(), Some(root));
    }

    #[test]
    fn test_extension_edge_cases() {
        assert_eq!(validate("/workspace/.bashrc").unwrap().extension(), None);
        assert_eq!(validate("/workspace/Makefile").unwrap().extension(), None);
        assert_eq!(
            validate("/workspace/Main.JAVA").unwrap().extension().as_deref(),
            Some(".java")
        );
    }

    #[test]
    fn test_starts_with_is_segment_aware() {
        let a = validate("/workspace/a").unwrap();
        assert!(validate("/workspace/a/b").unwrap().starts_with(&a));
        assert!(a.starts_with(&a));
        assert!(!validate("/workspace/ab").unwrap().starts_with(&a));
    }
}
