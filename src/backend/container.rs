//! Docker-backed workspaces.
//!
//! One long-lived container per workspace, kept alive by an idle command.
//! Files move in and out as tar archives; everything else is a bounded
//! `exec` inside the container.

use async_trait::async_trait;
use bollard::container::{
    Config as CreateConfig, CreateContainerOptions, DownloadFromContainerOptions, LogOutput,
    RemoveContainerOptions, StopContainerOptions, UploadToContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::service::{HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::pty::PROMPT;
use super::{
    BackendError, BackendHandle, BackendKind, DirEntry, EntryKind, ExecArg, ExecOutput,
    ExecRequest, ExecutionBackend, InteractiveProcess, ProcessControl, TermSize, WorkspaceSpec,
};
use crate::config::ContainerConfig;
use crate::path::{LogicalPath, WORKSPACE_ROOT};

/// Limit for internal helper commands (mkdir, find, mv, ...).
const HELPER_TIMEOUT: Duration = Duration::from_secs(60);

/// Extra time allowed for the daemon to report a killed exec.
const EXEC_GRACE: Duration = Duration::from_secs(2);

/// Exit status of a process killed with SIGKILL.
const KILLED: i64 = 137;

const SHELL_COMMAND: &str =
    "if command -v bash >/dev/null 2>&1; then exec bash; else exec sh; fi";

/// Moves or copies `$1` to `$2` unless `$2` is taken. `$0` holds the
/// tool and is left unquoted so `cp -r` splits into two words.
const GUARDED_TRANSFER: &str = r#"if [ -e "$2" ] || [ -L "$2" ]; then exit 17; fi; mkdir -p "$(dirname "$2")" && $0 "$1" "$2""#;
const EXISTS_EXIT: i64 = 17;

/// Runs workspaces as Docker containers.
pub(crate) struct ContainerBackend {
    docker: Docker,
    config: ContainerConfig,
}

impl ContainerBackend {
    /// Connect to the local Docker daemon and make sure it answers.
    pub async fn connect(config: ContainerConfig) -> Result<Self, BackendError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| BackendError::docker_unavailable(e.to_string()))?;

        docker
            .ping()
            .await
            .map_err(|e| BackendError::docker_unavailable(format!("cannot ping daemon: {e}")))?;

        debug!("Connected to Docker daemon");
        Ok(Self { docker, config })
    }

    /// Pull the configured image if the daemon does not have it yet.
    async fn ensure_image(&self) -> Result<(), BackendError> {
        let image = &self.config.image;
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!("Pulling image {}", image);
        let (from_image, tag) = split_image_ref(image);
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image,
                tag,
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            if let Err(e) = progress {
                warn!("Failed to pull {}: {}", image, e);
                return Err(BackendError::image_not_found(image.clone()));
            }
        }
        Ok(())
    }

    fn build_container_config(
        &self,
        spec: &WorkspaceSpec,
    ) -> Result<CreateConfig<String>, BackendError> {
        let memory = parse_memory_limit(&self.config.memory)?;
        let restart = parse_restart_policy(&self.config.restart_policy)?;

        let labels = HashMap::from([
            ("nook.workspace".to_string(), spec.workspace_id.clone()),
            ("nook.owner".to_string(), spec.owner_id.clone()),
            ("nook.type".to_string(), "user-workspace".to_string()),
        ]);

        Ok(CreateConfig {
            image: Some(self.config.image.clone()),
            cmd: Some(vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ]),
            working_dir: Some(WORKSPACE_ROOT.to_string()),
            env: Some(vec![
                "TERM=xterm-256color".to_string(),
                format!("HOME={WORKSPACE_ROOT}"),
            ]),
            labels: Some(labels),
            host_config: Some(HostConfig {
                memory: Some(memory),
                cpu_shares: Some(self.config.cpu_shares),
                restart_policy: Some(RestartPolicy {
                    name: Some(restart),
                    maximum_retry_count: None,
                }),
                network_mode: Some(self.config.network_mode.clone()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Create the container, or reuse one left behind under the same name.
    async fn create_container(&self, spec: &WorkspaceSpec) -> Result<String, BackendError> {
        let name = container_name(&spec.workspace_id);
        let config = self.build_container_config(spec)?;

        match self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
        {
            Ok(response) => Ok(response.id),
            Err(DockerError::DockerResponseServerError {
                status_code: 409, ..
            }) => {
                warn!("Container {} already exists, reusing it", name);
                let existing = self
                    .docker
                    .inspect_container(&name, None)
                    .await
                    .map_err(|e| BackendError::provisioning(e.to_string()))?;
                existing
                    .id
                    .ok_or_else(|| BackendError::provisioning(format!("{name} has no id")))
            }
            Err(e) => Err(BackendError::provisioning(format!(
                "failed to create container {name}: {e}"
            ))),
        }
    }

    /// Run a helper command and fail unless it exits 0.
    async fn run_helper(
        &self,
        handle: &BackendHandle,
        argv: Vec<ExecArg>,
        subject: &LogicalPath,
    ) -> Result<ExecOutput, BackendError> {
        let request = ExecRequest {
            argv,
            cwd: LogicalPath::root(),
            timeout: HELPER_TIMEOUT,
        };
        let result = self.exec(handle, &request).await?;
        if result.success() {
            return Ok(result);
        }
        if result.output.contains("No such file or directory") {
            return Err(BackendError::not_found(subject.to_string()));
        }
        Err(BackendError::CommandFailed {
            command: request.program(),
            exit_code: result.exit_code,
            output: result.output.trim().to_string(),
        })
    }

    /// Move or copy with `tool` (`mv` or `cp -r`), refusing to overwrite.
    async fn transfer(
        &self,
        handle: &BackendHandle,
        tool: &str,
        from: &LogicalPath,
        to: &LogicalPath,
    ) -> Result<(), BackendError> {
        let request = ExecRequest {
            argv: vec![
                ExecArg::literal("sh"),
                ExecArg::literal("-c"),
                ExecArg::literal(GUARDED_TRANSFER),
                ExecArg::literal(tool),
                ExecArg::Path(from.clone()),
                ExecArg::Path(to.clone()),
            ],
            cwd: LogicalPath::root(),
            timeout: HELPER_TIMEOUT,
        };
        let result = self.exec(handle, &request).await?;
        match result.exit_code {
            Some(0) if !result.timed_out => Ok(()),
            Some(EXISTS_EXIT) => Err(BackendError::already_exists(to.to_string())),
            _ if result.output.contains("No such file or directory") => {
                Err(BackendError::not_found(from.to_string()))
            }
            code => Err(BackendError::CommandFailed {
                command: format!("{tool} {from} {to}"),
                exit_code: code,
                output: result.output.trim().to_string(),
            }),
        }
    }
}

fn container_name(workspace_id: &str) -> String {
    format!("nook-{workspace_id}")
}

/// Split `repo:tag` into its parts. A colon inside a registry host
/// (`localhost:5000/img`) is not a tag separator.
fn split_image_ref(image: &str) -> (String, String) {
    match image.rfind(':') {
        Some(idx) if !image[idx..].contains('/') => {
            (image[..idx].to_string(), image[idx + 1..].to_string())
        }
        _ => (image.to_string(), "latest".to_string()),
    }
}

/// Parse memory limit string (e.g., "8g", "512m") to bytes
fn parse_memory_limit(limit: &str) -> Result<i64, BackendError> {
    let limit = limit.trim().to_lowercase();
    let invalid = |_| BackendError::provisioning(format!("Invalid memory limit: {limit}"));

    if let Some(num) = limit.strip_suffix('g') {
        let gigs: i64 = num.parse().map_err(invalid)?;
        Ok(gigs * 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        let megs: i64 = num.parse().map_err(invalid)?;
        Ok(megs * 1024 * 1024)
    } else {
        limit.parse().map_err(invalid)
    }
}

fn parse_restart_policy(name: &str) -> Result<RestartPolicyNameEnum, BackendError> {
    match name {
        "no" | "" => Ok(RestartPolicyNameEnum::NO),
        "always" => Ok(RestartPolicyNameEnum::ALWAYS),
        "unless-stopped" => Ok(RestartPolicyNameEnum::UNLESS_STOPPED),
        "on-failure" => Ok(RestartPolicyNameEnum::ON_FAILURE),
        other => Err(BackendError::provisioning(format!(
            "Unknown restart policy: {other}"
        ))),
    }
}

fn log_bytes(chunk: LogOutput) -> Bytes {
    match chunk {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::StdIn { message }
        | LogOutput::Console { message } => message,
    }
}

fn render_arg(arg: &ExecArg) -> String {
    match arg {
        ExecArg::Literal(s) => s.clone(),
        ExecArg::Path(p) => p.to_string(),
    }
}

/// Status codes the daemon uses for "already in the requested state".
fn is_not_modified(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

fn is_missing(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Parse `stat -c '%F\t%s\t%a\t%Y\t%n'` lines into entries.
fn parse_listing(output: &str) -> Vec<DirEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(5, '\t');
            let kind = fields.next()?;
            let size = fields.next()?.parse().unwrap_or(0);
            let permissions = fields.next()?.to_string();
            let modified = fields
                .next()?
                .parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
            let full = fields.next()?;
            let name = full.rsplit('/').next().unwrap_or(full).to_string();
            if name.is_empty() {
                return None;
            }
            Some(DirEntry {
                name,
                kind: if kind == "directory" {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
                size,
                permissions,
                modified,
            })
        })
        .collect()
}

/// Tar archive holding a single regular file.
fn build_archive(name: &str, contents: &[u8]) -> Result<Vec<u8>, BackendError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(u64::try_from(Utc::now().timestamp()).unwrap_or(0));

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, contents)?;
    Ok(builder.into_inner()?)
}

/// Contents of the first entry of a downloaded archive.
fn extract_first_file(archive: &[u8], path: &LogicalPath) -> Result<Vec<u8>, BackendError> {
    use std::io::Read;

    let mut archive = tar::Archive::new(archive);
    let mut entry = archive
        .entries()?
        .next()
        .ok_or_else(|| BackendError::not_found(path.to_string()))??;

    if entry.header().entry_type().is_dir() {
        return Err(BackendError::Io(std::io::Error::other(format!(
            "{path} is a directory"
        ))));
    }

    let mut data = Vec::new();
    entry.read_to_end(&mut data)?;
    Ok(data)
}

/// Control half of a container shell.
struct ExecControl {
    docker: Docker,
    container: String,
    exec_id: String,
    pid_file: String,
    input: Mutex<Option<Pin<Box<dyn AsyncWrite + Send>>>>,
    closed: AtomicBool,
}

#[async_trait]
impl ProcessControl for ExecControl {
    async fn write(&self, bytes: &[u8]) -> Result<(), BackendError> {
        let mut input = self.input.lock().await;
        let writer = input.as_mut().ok_or_else(|| {
            BackendError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "terminal is closed",
            ))
        })?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn resize(&self, size: TermSize) -> Result<(), BackendError> {
        self.docker
            .resize_exec(
                &self.exec_id,
                ResizeExecOptions {
                    height: size.rows,
                    width: size.cols,
                },
            )
            .await
            .map_err(|e| BackendError::container_failed(e.to_string()))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the attach stream does not end the exec, so kill the
        // shell through the pid it recorded.
        let script = format!(
            "kill -9 $(cat {0}) 2>/dev/null; rm -f {0}",
            self.pid_file
        );
        let killed = async {
            let exec = self
                .docker
                .create_exec(
                    &self.container,
                    CreateExecOptions {
                        cmd: Some(vec!["sh".to_string(), "-c".to_string(), script]),
                        ..Default::default()
                    },
                )
                .await?;
            self.docker
                .start_exec(
                    &exec.id,
                    Some(StartExecOptions {
                        detach: true,
                        ..Default::default()
                    }),
                )
                .await
                .map(|_| ())
        };
        if let Err(e) = killed.await {
            debug!("Failed to kill shell in {}: {}", self.container, e);
        }

        // A write still in flight owns the input and fails once the exec ends.
        if let Ok(mut input) = self.input.try_lock() {
            if let Some(mut input) = input.take() {
                let _ = input.shutdown().await;
            }
        }
    }
}

#[async_trait]
impl ExecutionBackend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    async fn create(&self, spec: &WorkspaceSpec) -> Result<BackendHandle, BackendError> {
        self.ensure_image().await?;

        let id = self.create_container(spec).await?;
        let handle = BackendHandle::new(id);
        self.start(&handle).await?;

        self.run_helper(
            &handle,
            vec![
                ExecArg::literal("mkdir"),
                ExecArg::literal("-p"),
                ExecArg::Path(LogicalPath::root()),
            ],
            &LogicalPath::root(),
        )
        .await?;

        info!(
            "Created container {} for workspace {}",
            container_name(&spec.workspace_id),
            spec.workspace_id
        );
        Ok(handle)
    }

    async fn start(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        match self
            .docker
            .start_container::<String>(handle.as_str(), None)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) if is_missing(&e) => Err(BackendError::container_failed(format!(
                "container {handle} no longer exists"
            ))),
            Err(e) => Err(BackendError::container_failed(e.to_string())),
        }
    }

    async fn stop(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        match self
            .docker
            .stop_container(handle.as_str(), Some(StopContainerOptions { t: 10 }))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) || is_missing(&e) => Ok(()),
            Err(e) => Err(BackendError::container_failed(e.to_string())),
        }
    }

    async fn remove(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        self.stop(handle).await?;
        match self
            .docker
            .remove_container(
                handle.as_str(),
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_missing(&e) => Ok(()),
            Err(e) => Err(BackendError::container_failed(e.to_string())),
        }
    }

    async fn exec(
        &self,
        handle: &BackendHandle,
        request: &ExecRequest,
    ) -> Result<ExecOutput, BackendError> {
        // The in-container `timeout` does the killing; the read deadline
        // only guards against a daemon that never closes the stream.
        let mut cmd = vec![
            "timeout".to_string(),
            "-s".to_string(),
            "KILL".to_string(),
            request.timeout.as_secs().max(1).to_string(),
        ];
        cmd.extend(request.argv.iter().map(render_arg));

        debug!("Container exec in {}: {:?}", handle, cmd);

        let exec = self
            .docker
            .create_exec(
                handle.as_str(),
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(request.cwd.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BackendError::container_failed(format!("failed to create exec: {e}")))?;

        let started = Instant::now();
        let deadline = started + request.timeout + EXEC_GRACE;
        let mut output = Vec::new();
        let mut timed_out = false;

        if let StartExecResults::Attached {
            output: mut stream, ..
        } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| BackendError::container_failed(format!("failed to start exec: {e}")))?
        {
            loop {
                match tokio::time::timeout_at(deadline, stream.next()).await {
                    Ok(Some(Ok(chunk))) => output.extend_from_slice(&log_bytes(chunk)),
                    Ok(Some(Err(e))) => {
                        warn!("Error reading exec output: {}", e);
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| BackendError::container_failed(e.to_string()))?;
        let exit_code = inspect.exit_code;

        if exit_code == Some(KILLED) && started.elapsed() >= request.timeout {
            timed_out = true;
        }
        let output = String::from_utf8_lossy(&output).into_owned();
        // `timeout` itself reports a program it could not exec.
        if exit_code == Some(127) && output.starts_with("timeout:") {
            return Err(BackendError::spawn_failed(
                request.program(),
                output.trim().to_string(),
            ));
        }

        Ok(ExecOutput {
            output,
            exit_code,
            timed_out,
        })
    }

    async fn supports_interactive_shell(&self, handle: &BackendHandle) -> bool {
        match self.docker.inspect_container(handle.as_str(), None).await {
            Ok(info) => info
                .state
                .and_then(|state| state.running)
                .unwrap_or(false),
            Err(e) => {
                debug!("Cannot inspect {}: {}", handle, e);
                false
            }
        }
    }

    async fn spawn_interactive(
        &self,
        handle: &BackendHandle,
        cwd: &LogicalPath,
        size: TermSize,
    ) -> Result<InteractiveProcess, BackendError> {
        let pid_file = format!("/tmp/.nook-shell-{}.pid", uuid::Uuid::new_v4().simple());
        let script = format!("echo $$ > {pid_file}; {SHELL_COMMAND}");

        let exec = self
            .docker
            .create_exec(
                handle.as_str(),
                CreateExecOptions {
                    cmd: Some(vec!["/bin/sh".to_string(), "-c".to_string(), script]),
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    working_dir: Some(cwd.to_string()),
                    env: Some(vec![
                        "TERM=xterm-256color".to_string(),
                        format!("PS1={PROMPT}"),
                    ]),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BackendError::shell_unavailable(e.to_string()))?;

        let started = self
            .docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    tty: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| BackendError::shell_unavailable(e.to_string()))?;

        let StartExecResults::Attached {
            output: mut stream,
            input,
        } = started
        else {
            return Err(BackendError::shell_unavailable("exec started detached"));
        };

        let control = ExecControl {
            docker: self.docker.clone(),
            container: handle.to_string(),
            exec_id: exec.id,
            pid_file,
            input: Mutex::new(Some(input)),
            closed: AtomicBool::new(false),
        };
        if let Err(e) = control.resize(size).await {
            debug!("Initial resize failed: {}", e);
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(chunk) => {
                        if tx.send(log_bytes(chunk).to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("Shell stream ended: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(InteractiveProcess {
            output: rx,
            control: Box::new(control),
        })
    }

    async fn read_path(
        &self,
        handle: &BackendHandle,
        path: &LogicalPath,
    ) -> Result<Vec<u8>, BackendError> {
        let mut stream = self.docker.download_from_container(
            handle.as_str(),
            Some(DownloadFromContainerOptions {
                path: path.to_string(),
            }),
        );

        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => archive.extend_from_slice(&bytes),
                Err(e) if is_missing(&e) => return Err(BackendError::not_found(path.to_string())),
                Err(e) => return Err(BackendError::container_failed(e.to_string())),
            }
        }
        extract_first_file(&archive, path)
    }

    async fn write_path(
        &self,
        handle: &BackendHandle,
        path: &LogicalPath,
        contents: &[u8],
    ) -> Result<(), BackendError> {
        let parent = path.parent().unwrap_or_else(LogicalPath::root);
        self.create_dir(handle, &parent).await?;

        let archive = build_archive(path.file_name(), contents)?;
        self.docker
            .upload_to_container(
                handle.as_str(),
                Some(UploadToContainerOptions {
                    path: parent.to_string(),
                    ..Default::default()
                }),
                Bytes::from(archive),
            )
            .await
            .map_err(|e| BackendError::container_failed(format!("failed to upload {path}: {e}")))
    }

    async fn create_dir(
        &self,
        handle: &BackendHandle,
        path: &LogicalPath,
    ) -> Result<(), BackendError> {
        self.run_helper(
            handle,
            vec![
                ExecArg::literal("mkdir"),
                ExecArg::literal("-p"),
                ExecArg::Path(path.clone()),
            ],
            path,
        )
        .await
        .map(|_| ())
    }

    async fn list_path(
        &self,
        handle: &BackendHandle,
        path: &LogicalPath,
    ) -> Result<Vec<DirEntry>, BackendError> {
        let result = self
            .run_helper(
                handle,
                vec![
                    ExecArg::literal("find"),
                    ExecArg::Path(path.clone()),
                    ExecArg::literal("-mindepth"),
                    ExecArg::literal("1"),
                    ExecArg::literal("-maxdepth"),
                    ExecArg::literal("1"),
                    ExecArg::literal("-exec"),
                    ExecArg::literal("stat"),
                    ExecArg::literal("-c"),
                    ExecArg::literal("%F\t%s\t%a\t%Y\t%n"),
                    ExecArg::literal("{}"),
                    ExecArg::literal("+"),
                ],
                path,
            )
            .await?;
        Ok(parse_listing(&result.output))
    }

    async fn remove_path(
        &self,
        handle: &BackendHandle,
        path: &LogicalPath,
    ) -> Result<(), BackendError> {
        self.run_helper(
            handle,
            vec![
                ExecArg::literal("rm"),
                ExecArg::literal("-rf"),
                ExecArg::Path(path.clone()),
            ],
            path,
        )
        .await
        .map(|_| ())
    }

    async fn move_path(
        &self,
        handle: &BackendHandle,
        from: &LogicalPath,
        to: &LogicalPath,
    ) -> Result<(), BackendError> {
        self.transfer(handle, "mv", from, to).await
    }

    async fn copy_path(
        &self,
        handle: &BackendHandle,
        from: &LogicalPath,
        to: &LogicalPath,
    ) -> Result<(), BackendError> {
        self.transfer(handle, "cp -r", from, to).await
    }
}
