//! In-memory backend for testing.
//!
//! Keeps the workspace filesystem in maps, records every call, and hands
//! out loopback terminals that echo their input back as output.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::{
    BackendError, BackendHandle, BackendKind, BackendProvider, DirEntry, EntryKind, ExecArg,
    ExecOutput, ExecRequest, ExecutionBackend, InteractiveProcess, ProcessControl, TermSize,
    WorkspaceSpec,
};
use crate::path::{LogicalPath, WORKSPACE_ROOT};

/// How `exec` answers.
#[derive(Debug, Clone)]
pub(crate) enum MockExec {
    /// Return this output.
    Output(ExecOutput),
    /// Fail as if the program were missing.
    SpawnFailure,
}

/// A mock backend with an in-memory filesystem.
pub(crate) struct MockBackend {
    /// Number of backend calls of any kind.
    calls: AtomicUsize,
    creates: AtomicUsize,
    fail_create: AtomicBool,
    fail_start: AtomicBool,
    interactive: AtomicBool,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    broken_listings: Mutex<HashSet<String>>,
    exec_response: Mutex<MockExec>,
    exec_requests: Mutex<Vec<ExecRequest>>,
    /// Closes observed across all spawned terminals.
    terminal_closes: Arc<AtomicUsize>,
    terminal_input: Arc<Mutex<Vec<u8>>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            interactive: AtomicBool::new(true),
            files: Mutex::new(BTreeMap::new()),
            dirs: Mutex::new(BTreeSet::from([WORKSPACE_ROOT.to_string()])),
            broken_listings: Mutex::new(HashSet::new()),
            exec_response: Mutex::new(MockExec::Output(ExecOutput {
                output: String::new(),
                exit_code: Some(0),
                timed_out: false,
            })),
            exec_requests: Mutex::new(Vec::new()),
            terminal_closes: Arc::new(AtomicUsize::new(0)),
            terminal_input: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of backend calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_interactive(&self, supported: bool) {
        self.interactive.store(supported, Ordering::SeqCst);
    }

    pub fn set_exec(&self, response: MockExec) {
        *self.exec_response.lock().unwrap() = response;
    }

    /// Make listing `path` fail.
    pub fn break_listing(&self, path: &str) {
        self.broken_listings.lock().unwrap().insert(path.to_string());
    }

    pub fn exec_requests(&self) -> Vec<ExecRequest> {
        self.exec_requests.lock().unwrap().clone()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.dirs.lock().unwrap().contains(path)
    }

    pub fn terminal_closes(&self) -> usize {
        self.terminal_closes.load(Ordering::SeqCst)
    }

    /// Everything written to any terminal so far.
    pub fn terminal_input(&self) -> Vec<u8> {
        self.terminal_input.lock().unwrap().clone()
    }

    fn record(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn exists(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path) || self.dirs.lock().unwrap().contains(path)
    }

    fn add_ancestors(&self, path: &LogicalPath) {
        let mut dirs = self.dirs.lock().unwrap();
        let mut current = path.parent();
        while let Some(dir) = current {
            dirs.insert(dir.to_string());
            current = dir.parent();
        }
    }

    /// Every stored path equal to or under `path`, with its suffix.
    fn subtree(&self, path: &str) -> (Vec<(String, Vec<u8>)>, Vec<String>) {
        let prefix = format!("{path}/");
        let under = |p: &str| p == path || p.starts_with(&prefix);
        let files = self
            .files
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| under(p))
            .map(|(p, data)| (p[path.len()..].to_string(), data.clone()))
            .collect();
        let dirs = self
            .dirs
            .lock()
            .unwrap()
            .iter()
            .filter(|p| under(p))
            .map(|p| p[path.len()..].to_string())
            .collect();
        (files, dirs)
    }

    fn drop_subtree(&self, path: &str) {
        let prefix = format!("{path}/");
        self.files
            .lock()
            .unwrap()
            .retain(|p, _| p != path && !p.starts_with(&prefix));
        self.dirs
            .lock()
            .unwrap()
            .retain(|p| p != path && !p.starts_with(&prefix));
    }

    fn duplicate(&self, from: &LogicalPath, to: &LogicalPath) -> Result<(), BackendError> {
        if !self.exists(from.as_str()) {
            return Err(BackendError::not_found(from.to_string()));
        }
        if self.exists(to.as_str()) {
            return Err(BackendError::already_exists(to.to_string()));
        }
        self.add_ancestors(to);
        let (files, dirs) = self.subtree(from.as_str());
        for (suffix, data) in files {
            self.files
                .lock()
                .unwrap()
                .insert(format!("{to}{suffix}"), data);
        }
        for suffix in dirs {
            self.dirs.lock().unwrap().insert(format!("{to}{suffix}"));
        }
        Ok(())
    }
}

/// Loopback terminal: input is echoed back, `exit\n` ends the process.
struct LoopbackControl {
    tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    input: Arc<Mutex<Vec<u8>>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ProcessControl for LoopbackControl {
    async fn write(&self, bytes: &[u8]) -> Result<(), BackendError> {
        self.input.lock().unwrap().extend_from_slice(bytes);
        let tx = self.tx.lock().unwrap().clone();
        let Some(tx) = tx else {
            return Err(BackendError::Io(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )));
        };
        if bytes == b"exit\n" {
            self.tx.lock().unwrap().take();
            return Ok(());
        }
        let _ = tx.send(bytes.to_vec()).await;
        Ok(())
    }

    async fn resize(&self, _size: TermSize) -> Result<(), BackendError> {
        Ok(())
    }

    async fn close(&self) {
        self.tx.lock().unwrap().take();
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExecutionBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Host
    }

    async fn create(&self, spec: &WorkspaceSpec) -> Result<BackendHandle, BackendError> {
        self.record();
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(BackendError::provisioning("mock create failure"));
        }
        Ok(BackendHandle::new(format!("mock-{}", spec.workspace_id)))
    }

    async fn start(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        self.record();
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(BackendError::container_failed(format!("{handle} will not start")));
        }
        Ok(())
    }

    async fn stop(&self, _handle: &BackendHandle) -> Result<(), BackendError> {
        self.record();
        Ok(())
    }

    async fn remove(&self, _handle: &BackendHandle) -> Result<(), BackendError> {
        self.record();
        Ok(())
    }

    async fn exec(
        &self,
        _handle: &BackendHandle,
        request: &ExecRequest,
    ) -> Result<ExecOutput, BackendError> {
        self.record();
        self.exec_requests.lock().unwrap().push(request.clone());
        let response = self.exec_response.lock().unwrap().clone();
        match response {
            MockExec::Output(output) => Ok(output),
            MockExec::SpawnFailure => Err(BackendError::spawn_failed(
                request.program(),
                "No such file or directory",
            )),
        }
    }

    async fn supports_interactive_shell(&self, _handle: &BackendHandle) -> bool {
        self.record();
        self.interactive.load(Ordering::SeqCst)
    }

    async fn spawn_interactive(
        &self,
        _handle: &BackendHandle,
        _cwd: &LogicalPath,
        _size: TermSize,
    ) -> Result<InteractiveProcess, BackendError> {
        self.record();
        if !self.interactive.load(Ordering::SeqCst) {
            return Err(BackendError::shell_unavailable("mock has no shell"));
        }
        let (tx, rx) = mpsc::channel(16);
        Ok(InteractiveProcess {
            output: rx,
            control: Box::new(LoopbackControl {
                tx: Mutex::new(Some(tx)),
                input: Arc::clone(&self.terminal_input),
                closes: Arc::clone(&self.terminal_closes),
            }),
        })
    }

    async fn read_path(
        &self,
        _handle: &BackendHandle,
        path: &LogicalPath,
    ) -> Result<Vec<u8>, BackendError> {
        self.record();
        self.file(path.as_str())
            .ok_or_else(|| BackendError::not_found(path.to_string()))
    }

    async fn write_path(
        &self,
        _handle: &BackendHandle,
        path: &LogicalPath,
        contents: &[u8],
    ) -> Result<(), BackendError> {
        self.record();
        self.add_ancestors(path);
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_vec());
        Ok(())
    }

    async fn create_dir(
        &self,
        _handle: &BackendHandle,
        path: &LogicalPath,
    ) -> Result<(), BackendError> {
        self.record();
        self.add_ancestors(path);
        self.dirs.lock().unwrap().insert(path.to_string());
        Ok(())
    }

    async fn list_path(
        &self,
        _handle: &BackendHandle,
        path: &LogicalPath,
    ) -> Result<Vec<DirEntry>, BackendError> {
        self.record();
        if self.broken_listings.lock().unwrap().contains(path.as_str()) {
            return Err(BackendError::Io(std::io::Error::from(
                std::io::ErrorKind::PermissionDenied,
            )));
        }
        if !self.has_dir(path.as_str()) {
            return Err(BackendError::not_found(path.to_string()));
        }

        let is_child = |p: &str| {
            p.rsplit_once('/')
                .is_some_and(|(parent, _)| parent == path.as_str())
        };
        let name = |p: &str| p.rsplit('/').next().unwrap_or_default().to_string();

        let mut entries: Vec<DirEntry> = self
            .dirs
            .lock()
            .unwrap()
            .iter()
            .filter(|p| is_child(p))
            .map(|p| DirEntry {
                name: name(p),
                kind: EntryKind::Directory,
                size: 4096,
                permissions: "755".to_string(),
                modified: None,
            })
            .collect();
        entries.extend(
            self.files
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| is_child(p))
                .map(|(p, data)| DirEntry {
                    name: name(p),
                    kind: EntryKind::File,
                    size: data.len() as u64,
                    permissions: "644".to_string(),
                    modified: None,
                }),
        );
        // Listings arrive unordered from real backends.
        entries.reverse();
        Ok(entries)
    }

    async fn remove_path(
        &self,
        _handle: &BackendHandle,
        path: &LogicalPath,
    ) -> Result<(), BackendError> {
        self.record();
        if !self.exists(path.as_str()) {
            return Err(BackendError::not_found(path.to_string()));
        }
        self.drop_subtree(path.as_str());
        Ok(())
    }

    async fn move_path(
        &self,
        _handle: &BackendHandle,
        from: &LogicalPath,
        to: &LogicalPath,
    ) -> Result<(), BackendError> {
        self.record();
        self.duplicate(from, to)?;
        self.drop_subtree(from.as_str());
        Ok(())
    }

    async fn copy_path(
        &self,
        _handle: &BackendHandle,
        from: &LogicalPath,
        to: &LogicalPath,
    ) -> Result<(), BackendError> {
        self.record();
        self.duplicate(from, to)
    }
}

/// Hands out the same mock for every backend kind.
#[async_trait]
impl BackendProvider for Arc<MockBackend> {
    async fn get(&self, _kind: BackendKind) -> Result<Arc<dyn ExecutionBackend>, BackendError> {
        Ok(Arc::clone(self) as Arc<dyn ExecutionBackend>)
    }
}

impl MockExec {
    /// Successful run printing `output`.
    pub fn ok(output: &str) -> Self {
        Self::Output(ExecOutput {
            output: output.to_string(),
            exit_code: Some(0),
            timed_out: false,
        })
    }
}

/// Literal text of an argv, paths rendered logically.
pub(crate) fn render_argv(request: &ExecRequest) -> Vec<String> {
    request
        .argv
        .iter()
        .map(|arg| match arg {
            ExecArg::Literal(s) => s.clone(),
            ExecArg::Path(p) => p.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathPolicy;

    fn path(raw: &str) -> LogicalPath {
        PathPolicy::default().validate(raw).unwrap()
    }

    #[tokio::test]
    async fn test_mock_filesystem_roundtrip() {
        let mock = MockBackend::new();
        let handle = BackendHandle::new("h");
        mock.write_path(&handle, &path("/workspace/a/b.txt"), b"hi")
            .await
            .unwrap();
        assert!(mock.has_dir("/workspace/a"));

        let entries = mock.list_path(&handle, &path("/workspace")).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "a");

        mock.move_path(&handle, &path("/workspace/a"), &path("/workspace/c"))
            .await
            .unwrap();
        assert_eq!(mock.file("/workspace/c/b.txt"), Some(b"hi".to_vec()));
        assert!(!mock.has_dir("/workspace/a"));
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_create_failure() {
        let mock = MockBackend::new();
        mock.set_fail_create(true);
        let spec = WorkspaceSpec {
            workspace_id: "w".to_string(),
            owner_id: "o".to_string(),
        };
        assert!(mock.create(&spec).await.is_err());
        mock.set_fail_create(false);
        assert!(mock.create(&spec).await.is_ok());
        assert_eq!(mock.creates(), 2);
    }

    #[tokio::test]
    async fn test_loopback_terminal_echoes() {
        let mock = MockBackend::new();
        let mut process = mock
            .spawn_interactive(&BackendHandle::new("h"), &LogicalPath::root(), TermSize::default())
            .await
            .unwrap();
        process.control.write(b"ls\n").await.unwrap();
        assert_eq!(process.output.recv().await, Some(b"ls\n".to_vec()));

        process.control.write(b"exit\n").await.unwrap();
        assert_eq!(process.output.recv().await, None);
        assert_eq!(mock.terminal_input(), b"ls\nexit\n");
    }
}
