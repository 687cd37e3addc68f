//! Host-sandboxed backend.
//!
//! Each workspace is a directory under `<home>/workspaces/<id>`. Logical
//! paths are mapped onto that directory and every mapped path is checked
//! against the canonical root, so symlinks cannot lead outside of it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::pty;
use super::{
    BackendError, BackendHandle, BackendKind, DirEntry, EntryKind, ExecArg, ExecOutput,
    ExecRequest, ExecutionBackend, InteractiveProcess, TermSize, WorkspaceSpec,
};
use crate::path::LogicalPath;

const READ_CHUNK: usize = 4096;

/// Confines workspaces to directories on the local machine.
pub(crate) struct HostBackend {
    base: PathBuf,
    shells: Vec<String>,
}

impl HostBackend {
    pub fn new(base: PathBuf, shells: Vec<String>) -> Self {
        Self { base, shells }
    }

    fn root(handle: &BackendHandle) -> PathBuf {
        PathBuf::from(handle.as_str())
    }

    /// Map a logical path onto the sandbox root, refusing anything that
    /// resolves outside of it.
    async fn resolve(handle: &BackendHandle, path: &LogicalPath) -> Result<PathBuf, BackendError> {
        let root = Self::root(handle);
        let real = if path.is_root() {
            root.clone()
        } else {
            root.join(path.relative())
        };
        confine(&root, &real, path).await?;
        Ok(real)
    }

    /// First configured shell that exists on this machine.
    fn shell(&self) -> Option<&str> {
        self.shells
            .iter()
            .map(String::as_str)
            .find(|shell| Path::new(shell).is_file())
    }
}

/// Check that the nearest existing ancestor of `real` lives under `root`.
async fn confine(root: &Path, real: &Path, logical: &LogicalPath) -> Result<(), BackendError> {
    let canonical_root = tokio::fs::canonicalize(root)
        .await
        .map_err(|_| BackendError::not_found(LogicalPath::root().to_string()))?;

    let mut ancestor = real.to_path_buf();
    loop {
        match tokio::fs::canonicalize(&ancestor).await {
            Ok(resolved) if resolved.starts_with(&canonical_root) => return Ok(()),
            Ok(_) => return Err(BackendError::confinement(logical.to_string())),
            Err(_) => {
                // A dangling symlink would be followed on write.
                if tokio::fs::symlink_metadata(&ancestor).await.is_ok() {
                    return Err(BackendError::confinement(logical.to_string()));
                }
                if !ancestor.pop() {
                    return Err(BackendError::confinement(logical.to_string()));
                }
            }
        }
    }
}

fn map_io(err: std::io::Error, path: &LogicalPath) -> BackendError {
    match err.kind() {
        ErrorKind::NotFound => BackendError::not_found(path.to_string()),
        ErrorKind::AlreadyExists => BackendError::already_exists(path.to_string()),
        _ => BackendError::Io(err),
    }
}

/// Forward everything a pipe produces into the shared output channel.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Kill the whole process group, then the direct child.
async fn kill_tree(child: &mut Child) {
    if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            debug!("killpg({}) failed: {}", pid, e);
        }
    }
    if let Err(e) = child.kill().await {
        debug!("Failed to kill child: {}", e);
    }
}

fn exit_code(status: std::process::ExitStatus) -> Option<i64> {
    status
        .code()
        .map(i64::from)
        .or_else(|| status.signal().map(|sig| 128 + i64::from(sig)))
}

fn entry_from_metadata(name: String, metadata: &std::fs::Metadata) -> DirEntry {
    let kind = if metadata.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    DirEntry {
        name,
        kind,
        size: metadata.len(),
        permissions: format!("{:o}", metadata.permissions().mode() & 0o777),
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
    }
}

/// Recursive copy. Symlinks are recreated as links, never followed.
fn copy_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    let metadata = std::fs::symlink_metadata(from)?;
    if metadata.file_type().is_symlink() {
        let target = std::fs::read_link(from)?;
        std::os::unix::fs::symlink(target, to)
    } else if metadata.is_dir() {
        std::fs::create_dir(to)?;
        for entry in std::fs::read_dir(from)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        std::fs::copy(from, to).map(|_| ())
    }
}

#[async_trait]
impl ExecutionBackend for HostBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Host
    }

    async fn create(&self, spec: &WorkspaceSpec) -> Result<BackendHandle, BackendError> {
        let root = self.base.join(&spec.workspace_id);
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            BackendError::provisioning(format!("Failed to create {}: {}", root.display(), e))
        })?;
        let root = tokio::fs::canonicalize(&root).await?;

        info!(
            "Created host workspace {} for owner {} at {}",
            spec.workspace_id,
            spec.owner_id,
            root.display()
        );
        Ok(BackendHandle::new(root.to_string_lossy()))
    }

    async fn start(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        // Nothing runs between commands; recreating a wiped root is enough.
        tokio::fs::create_dir_all(Self::root(handle))
            .await
            .map_err(|e| BackendError::provisioning(e.to_string()))
    }

    async fn stop(&self, _handle: &BackendHandle) -> Result<(), BackendError> {
        Ok(())
    }

    async fn remove(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        match tokio::fs::remove_dir_all(Self::root(handle)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exec(
        &self,
        handle: &BackendHandle,
        request: &ExecRequest,
    ) -> Result<ExecOutput, BackendError> {
        let root = Self::root(handle);
        let cwd = Self::resolve(handle, &request.cwd).await?;

        let mut argv: Vec<OsString> = Vec::with_capacity(request.argv.len());
        for arg in &request.argv {
            match arg {
                ExecArg::Literal(s) => argv.push(s.into()),
                ExecArg::Path(p) => argv.push(Self::resolve(handle, p).await?.into_os_string()),
            }
        }
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| BackendError::spawn_failed("", "empty command"))?;

        debug!("Host exec in {}: {:?}", cwd.display(), argv);

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&cwd)
            .env("HOME", &root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| BackendError::spawn_failed(request.program(), e.to_string()))?;

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx.clone()));
        }
        drop(tx);

        let deadline = Instant::now() + request.timeout;
        let mut output = Vec::new();
        let mut timed_out = false;

        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(chunk)) => output.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        let status = if timed_out {
            None
        } else {
            match tokio::time::timeout_at(deadline, child.wait()).await {
                Ok(status) => Some(status?),
                Err(_) => {
                    timed_out = true;
                    None
                }
            }
        };

        let exit_code = match status {
            Some(status) => exit_code(status),
            None => {
                warn!(
                    "Command '{}' exceeded {:?}, killing process group",
                    request.program(),
                    request.timeout
                );
                kill_tree(&mut child).await;
                child.wait().await.ok().and_then(exit_code)
            }
        };

        while let Ok(chunk) = rx.try_recv() {
            output.extend_from_slice(&chunk);
        }

        Ok(ExecOutput {
            output: String::from_utf8_lossy(&output).into_owned(),
            exit_code,
            timed_out,
        })
    }

    async fn supports_interactive_shell(&self, handle: &BackendHandle) -> bool {
        self.shell().is_some() && Self::root(handle).is_dir()
    }

    async fn spawn_interactive(
        &self,
        handle: &BackendHandle,
        cwd: &LogicalPath,
        size: TermSize,
    ) -> Result<InteractiveProcess, BackendError> {
        let shell = self.shell().ok_or_else(|| {
            BackendError::shell_unavailable(format!(
                "none of the configured shells exist: {}",
                self.shells.join(", ")
            ))
        })?;
        let cwd = Self::resolve(handle, cwd).await?;
        pty::spawn_shell(shell, &cwd, &Self::root(handle), size)
    }

    async fn read_path(
        &self,
        handle: &BackendHandle,
        path: &LogicalPath,
    ) -> Result<Vec<u8>, BackendError> {
        let real = Self::resolve(handle, path).await?;
        let metadata = tokio::fs::metadata(&real)
            .await
            .map_err(|e| map_io(e, path))?;
        if metadata.is_dir() {
            return Err(BackendError::Io(std::io::Error::other(format!(
                "{path} is a directory"
            ))));
        }
        tokio::fs::read(&real).await.map_err(|e| map_io(e, path))
    }

    async fn write_path(
        &self,
        handle: &BackendHandle,
        path: &LogicalPath,
        contents: &[u8],
    ) -> Result<(), BackendError> {
        let real = Self::resolve(handle, path).await?;
        if let Some(parent) = real.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&real, contents)
            .await
            .map_err(|e| map_io(e, path))
    }

    async fn create_dir(
        &self,
        handle: &BackendHandle,
        path: &LogicalPath,
    ) -> Result<(), BackendError> {
        let real = Self::resolve(handle, path).await?;
        tokio::fs::create_dir_all(&real)
            .await
            .map_err(|e| map_io(e, path))
    }

    async fn list_path(
        &self,
        handle: &BackendHandle,
        path: &LogicalPath,
    ) -> Result<Vec<DirEntry>, BackendError> {
        let real = Self::resolve(handle, path).await?;
        let mut reader = tokio::fs::read_dir(&real)
            .await
            .map_err(|e| map_io(e, path))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = match tokio::fs::metadata(entry.path()).await {
                Ok(m) => m,
                Err(_) => tokio::fs::symlink_metadata(entry.path()).await?,
            };
            entries.push(entry_from_metadata(name, &metadata));
        }
        Ok(entries)
    }

    async fn remove_path(
        &self,
        handle: &BackendHandle,
        path: &LogicalPath,
    ) -> Result<(), BackendError> {
        let real = Self::resolve(handle, path).await?;
        let metadata = tokio::fs::symlink_metadata(&real)
            .await
            .map_err(|e| map_io(e, path))?;
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(&real).await?;
        } else {
            tokio::fs::remove_file(&real).await?;
        }
        Ok(())
    }

    async fn move_path(
        &self,
        handle: &BackendHandle,
        from: &LogicalPath,
        to: &LogicalPath,
    ) -> Result<(), BackendError> {
        let source = Self::resolve(handle, from).await?;
        let target = Self::resolve(handle, to).await?;
        tokio::fs::symlink_metadata(&source)
            .await
            .map_err(|e| map_io(e, from))?;
        if tokio::fs::try_exists(&target).await? {
            return Err(BackendError::already_exists(to.to_string()));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&source, &target)
            .await
            .map_err(|e| map_io(e, from))
    }

    async fn copy_path(
        &self,
        handle: &BackendHandle,
        from: &LogicalPath,
        to: &LogicalPath,
    ) -> Result<(), BackendError> {
        let source = Self::resolve(handle, from).await?;
        let target = Self::resolve(handle, to).await?;
        tokio::fs::symlink_metadata(&source)
            .await
            .map_err(|e| map_io(e, from))?;
        if tokio::fs::try_exists(&target).await? {
            return Err(BackendError::already_exists(to.to_string()));
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::task::spawn_blocking(move || copy_recursive(&source, &target))
            .await
            .map_err(|e| BackendError::Io(std::io::Error::other(e)))?
            .map_err(BackendError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathPolicy;
    use std::time::Duration;

    fn path(raw: &str) -> LogicalPath {
        PathPolicy::default().validate(raw).unwrap()
    }

    async fn setup() -> (tempfile::TempDir, HostBackend, BackendHandle) {
        let dir = tempfile::tempdir().unwrap();
        let backend = HostBackend::new(
            dir.path().join("workspaces"),
            vec!["/bin/sh".to_string()],
        );
        let handle = backend
            .create(&WorkspaceSpec {
                workspace_id: "ws-1".to_string(),
                owner_id: "alice".to_string(),
            })
            .await
            .unwrap();
        (dir, backend, handle)
    }

    #[tokio::test]
    async fn test_create_makes_root_directory() {
        let (dir, _backend, handle) = setup().await;
        let root = PathBuf::from(handle.as_str());
        assert!(root.is_dir());
        assert!(root.ends_with("ws-1"));
        assert!(root.starts_with(std::fs::canonicalize(dir.path()).unwrap()));
    }

    #[tokio::test]
    async fn test_write_read_and_list() {
        let (_dir, backend, handle) = setup().await;
        backend
            .write_path(&handle, &path("/workspace/src/a.txt"), b"hello")
            .await
            .unwrap();

        let data = backend
            .read_path(&handle, &path("/workspace/src/a.txt"))
            .await
            .unwrap();
        assert_eq!(data, b"hello");

        let entries = backend.list_path(&handle, &path("/workspace")).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "src");
        assert_eq!(entries[0].kind, EntryKind::Directory);

        let entries = backend
            .list_path(&handle, &path("/workspace/src"))
            .await
            .unwrap();
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[0].size, 5);
    }

    #[tokio::test]
    async fn test_read_missing_file_is_not_found() {
        let (_dir, backend, handle) = setup().await;
        let err = backend
            .read_path(&handle, &path("/workspace/missing.txt"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_symlink_escape_is_rejected() {
        let (dir, backend, handle) = setup().await;
        let outside = dir.path().join("outside");
        std::fs::create_dir(&outside).unwrap();
        std::fs::write(outside.join("secret"), "s3cret").unwrap();
        std::os::unix::fs::symlink(&outside, PathBuf::from(handle.as_str()).join("link"))
            .unwrap();

        let err = backend
            .read_path(&handle, &path("/workspace/link/secret"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Confinement { .. }));

        let err = backend
            .write_path(&handle, &path("/workspace/link/new"), b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Confinement { .. }));
        assert!(!outside.join("new").exists());
    }

    #[tokio::test]
    async fn test_dangling_symlink_is_rejected() {
        let (dir, backend, handle) = setup().await;
        let target = dir.path().join("not-yet");
        std::os::unix::fs::symlink(&target, PathBuf::from(handle.as_str()).join("dangling"))
            .unwrap();

        let err = backend
            .write_path(&handle, &path("/workspace/dangling"), b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Confinement { .. }));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_exec_captures_interleaved_output() {
        let (_dir, backend, handle) = setup().await;
        let request = ExecRequest::literal(
            ["sh", "-c", "echo out; echo err 1>&2; exit 3"],
            LogicalPath::root(),
            Duration::from_secs(5),
        );
        let result = backend.exec(&handle, &request).await.unwrap();
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_exec_runs_in_cwd_with_mapped_paths() {
        let (_dir, backend, handle) = setup().await;
        backend
            .write_path(&handle, &path("/workspace/scripts/hi.sh"), b"pwd\n")
            .await
            .unwrap();
        let request = ExecRequest {
            argv: vec![
                ExecArg::literal("sh"),
                ExecArg::Path(path("/workspace/scripts/hi.sh")),
            ],
            cwd: path("/workspace/scripts"),
            timeout: Duration::from_secs(5),
        };
        let result = backend.exec(&handle, &request).await.unwrap();
        assert!(result.success());
        assert!(result.output.trim_end().ends_with("scripts"));
    }

    #[tokio::test]
    async fn test_exec_timeout_kills_process_group() {
        let (_dir, backend, handle) = setup().await;
        let request = ExecRequest::literal(
            ["sh", "-c", "sleep 30 & echo $! > bg.pid; echo started; sleep 30"],
            LogicalPath::root(),
            Duration::from_millis(500),
        );
        let started = std::time::Instant::now();
        let result = backend.exec(&handle, &request).await.unwrap();
        assert!(result.timed_out);
        assert!(result.output.contains("started"));
        assert!(started.elapsed() < Duration::from_secs(10));

        // The background sleep went down with the group.
        let pid = std::fs::read_to_string(PathBuf::from(handle.as_str()).join("bg.pid")).unwrap();
        let stat = PathBuf::from(format!("/proc/{}/stat", pid.trim()));
        if !Path::new("/proc/self/stat").exists() {
            return;
        }
        let mut alive = true;
        for _ in 0..50 {
            alive = match std::fs::read_to_string(&stat) {
                Ok(line) => !line.rsplit(')').next().unwrap_or("").trim_start().starts_with('Z'),
                Err(_) => false,
            };
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive, "background process {} survived the timeout", pid.trim());
    }

    #[tokio::test]
    async fn test_exec_missing_program_is_spawn_failure() {
        let (_dir, backend, handle) = setup().await;
        let request = ExecRequest::literal(
            ["definitely-not-installed-xyz"],
            LogicalPath::root(),
            Duration::from_secs(1),
        );
        let err = backend.exec(&handle, &request).await.unwrap_err();
        assert!(err.is_spawn_failure());
    }

    #[tokio::test]
    async fn test_move_and_copy_refuse_existing_destination() {
        let (_dir, backend, handle) = setup().await;
        backend
            .write_path(&handle, &path("/workspace/a.txt"), b"a")
            .await
            .unwrap();
        backend
            .write_path(&handle, &path("/workspace/b.txt"), b"b")
            .await
            .unwrap();

        let err = backend
            .move_path(&handle, &path("/workspace/a.txt"), &path("/workspace/b.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists { .. }));

        backend
            .copy_path(&handle, &path("/workspace/a.txt"), &path("/workspace/c/a.txt"))
            .await
            .unwrap();
        backend
            .move_path(&handle, &path("/workspace/b.txt"), &path("/workspace/d.txt"))
            .await
            .unwrap();

        let root = PathBuf::from(handle.as_str());
        assert_eq!(std::fs::read_to_string(root.join("c/a.txt")).unwrap(), "a");
        assert!(root.join("a.txt").exists());
        assert!(!root.join("b.txt").exists());
        assert!(root.join("d.txt").exists());
    }

    #[tokio::test]
    async fn test_copy_directory_tree() {
        let (_dir, backend, handle) = setup().await;
        backend
            .write_path(&handle, &path("/workspace/src/lib/x.js"), b"x")
            .await
            .unwrap();
        backend
            .copy_path(&handle, &path("/workspace/src"), &path("/workspace/backup"))
            .await
            .unwrap();
        let data = backend
            .read_path(&handle, &path("/workspace/backup/lib/x.js"))
            .await
            .unwrap();
        assert_eq!(data, b"x");
    }

    #[tokio::test]
    async fn test_remove_path_and_workspace() {
        let (_dir, backend, handle) = setup().await;
        backend
            .write_path(&handle, &path("/workspace/tmp/a"), b"a")
            .await
            .unwrap();
        backend
            .remove_path(&handle, &path("/workspace/tmp"))
            .await
            .unwrap();
        assert!(backend
            .list_path(&handle, &path("/workspace"))
            .await
            .unwrap()
            .is_empty());

        backend.remove(&handle).await.unwrap();
        assert!(!PathBuf::from(handle.as_str()).exists());
        // Removing twice is fine.
        backend.remove(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_interactive_shell_support() {
        let (_dir, backend, handle) = setup().await;
        assert!(backend.supports_interactive_shell(&handle).await);

        let no_shell = HostBackend::new(PathBuf::from("/nonexistent"), vec![
            "/nonexistent/shell".to_string(),
        ]);
        assert!(!no_shell.supports_interactive_shell(&handle).await);
        let err = no_shell
            .spawn_interactive(&handle, &LogicalPath::root(), TermSize::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::ShellUnavailable { .. }));
    }
}
