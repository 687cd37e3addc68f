//! One-shot execution of workspace files and command lines.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, ExecArg, ExecOutput, ExecRequest};
use crate::config::ExecutionConfig;
use crate::error::WorkspaceError;
use crate::path::{LogicalPath, PathPolicy};
use crate::workspace::WorkspaceTarget;

/// Placeholder for the file in configured interpreter templates.
const FILE_PLACEHOLDER: &str = "{file}";

/// Compile into the file's directory, then run the class named after it.
const JAVA_SCRIPT: &str = r#"javac -d "$2" "$1" && java -cp "$2" "$3""#;

/// Exit status of a shell that could not find a program.
const EXIT_NOT_FOUND: i64 = 127;

/// Programs that are never run through `run_command`.
const FORBIDDEN_PROGRAMS: &[&str] = &["fdisk", "format", "shutdown", "reboot", "halt", "poweroff"];

/// Outcome of a one-shot run, ready to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub command: String,
    /// stdout and stderr, interleaved.
    pub output: String,
    pub exit_code: Option<i64>,
    pub timed_out: bool,
    /// The program (or interpreter) could not be started.
    pub spawn_failed: bool,
}

impl ExecutionResult {
    fn from_output(command: String, output: ExecOutput) -> Self {
        Self {
            command,
            output: output.output,
            exit_code: output.exit_code,
            timed_out: output.timed_out,
            spawn_failed: false,
        }
    }

    fn not_installed(command: String, program: &str) -> Self {
        Self {
            command,
            output: format!("Error: {program} is not installed in this environment."),
            exit_code: Some(EXIT_NOT_FOUND),
            timed_out: false,
            spawn_failed: true,
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && !self.spawn_failed && self.exit_code == Some(0)
    }
}

/// One slot of an interpreter command line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Text(String),
    File,
    FileDir,
    FileStem,
}

/// How files of one extension are run.
#[derive(Debug, Clone)]
struct Interpreter {
    slots: Vec<Slot>,
    /// Named in the not-installed message when a wrapper shell cannot
    /// find it.
    requires: String,
    /// Runs through `sh -c`, so a missing program shows up as exit 127.
    wrapped: bool,
}

impl Interpreter {
    fn direct(program: &str) -> Self {
        Self {
            slots: vec![Slot::Text(program.to_string()), Slot::File],
            requires: program.to_string(),
            wrapped: false,
        }
    }

    fn java() -> Self {
        Self {
            slots: vec![
                Slot::Text("sh".to_string()),
                Slot::Text("-c".to_string()),
                Slot::Text(JAVA_SCRIPT.to_string()),
                Slot::Text("sh".to_string()),
                Slot::File,
                Slot::FileDir,
                Slot::FileStem,
            ],
            requires: "javac".to_string(),
            wrapped: true,
        }
    }

    /// From a configured template such as `["ruby", "{file}"]`. The file
    /// is appended when the template does not mention it.
    fn from_template(template: &[String]) -> Option<Self> {
        let program = template.first()?.clone();
        let mut slots: Vec<Slot> = template
            .iter()
            .map(|part| {
                if part == FILE_PLACEHOLDER {
                    Slot::File
                } else {
                    Slot::Text(part.clone())
                }
            })
            .collect();
        if !slots.contains(&Slot::File) {
            slots.push(Slot::File);
        }
        Some(Self {
            slots,
            requires: program,
            wrapped: false,
        })
    }

    fn argv(&self, file: &LogicalPath) -> Vec<ExecArg> {
        let dir = file.parent().unwrap_or_else(LogicalPath::root);
        let name = file.file_name();
        let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
        self.slots
            .iter()
            .map(|slot| match slot {
                Slot::Text(text) => ExecArg::literal(text.as_str()),
                Slot::File => ExecArg::Path(file.clone()),
                Slot::FileDir => ExecArg::Path(dir.clone()),
                Slot::FileStem => ExecArg::literal(stem),
            })
            .collect()
    }
}

fn builtin_interpreters() -> BTreeMap<String, Interpreter> {
    BTreeMap::from([
        (".py".to_string(), Interpreter::direct("python3")),
        (".js".to_string(), Interpreter::direct("node")),
        (".sh".to_string(), Interpreter::direct("sh")),
        (".bat".to_string(), Interpreter::direct("sh")),
        (".java".to_string(), Interpreter::java()),
    ])
}

/// Human-readable command line, with paths shown logically.
fn describe(argv: &[ExecArg]) -> String {
    shell_words::join(argv.iter().map(|arg| match arg {
        ExecArg::Literal(s) => s.clone(),
        ExecArg::Path(p) => p.to_string(),
    }))
}

/// Whether a command line is on the destructive deny-list.
fn is_dangerous(argv: &[String]) -> bool {
    let mut args = argv.iter().map(String::as_str);
    let mut program = args.next().unwrap_or_default();
    if program == "sudo" {
        program = args.next().unwrap_or_default();
    }
    let program = program.rsplit('/').next().unwrap_or(program);
    let rest: Vec<&str> = args.collect();

    if FORBIDDEN_PROGRAMS.contains(&program) || program.starts_with("mkfs") {
        return true;
    }
    match program {
        "dd" => rest.iter().any(|arg| arg.starts_with("if=")),
        "rm" => {
            let recursive = rest.iter().any(|arg| {
                *arg == "--recursive"
                    || (arg.starts_with('-')
                        && !arg.starts_with("--")
                        && arg.contains(['r', 'R']))
            });
            recursive && rest.iter().any(|arg| matches!(*arg, "/" | "/*"))
        }
        _ => false,
    }
}

/// Runs files and command lines to completion under a hard timeout.
#[derive(Debug, Clone)]
pub struct CommandService {
    policy: PathPolicy,
    interpreters: BTreeMap<String, Interpreter>,
    timeout: Duration,
}

impl CommandService {
    /// Configured interpreters override built-in ones for the same
    /// extension.
    pub fn new(config: &ExecutionConfig, policy: PathPolicy) -> Self {
        let mut interpreters = builtin_interpreters();
        for (extension, template) in &config.interpreters {
            let extension = if extension.starts_with('.') {
                extension.to_lowercase()
            } else {
                format!(".{}", extension.to_lowercase())
            };
            match Interpreter::from_template(template) {
                Some(interpreter) => {
                    interpreters.insert(extension, interpreter);
                }
                None => warn!("Ignoring empty interpreter template for {}", extension),
            }
        }
        Self {
            policy,
            interpreters,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Run a workspace file with the interpreter for its extension.
    ///
    /// `cwd` defaults to the file's directory. Unknown extensions are
    /// refused before anything is spawned.
    pub async fn run_file(
        &self,
        target: &WorkspaceTarget,
        raw: &str,
        cwd: Option<&str>,
    ) -> Result<ExecutionResult, WorkspaceError> {
        let file = self.policy.validate(raw)?;
        let cwd = self.working_dir(cwd, &file)?;

        let extension = file.extension();
        let interpreter = extension
            .as_deref()
            .and_then(|ext| self.interpreters.get(ext))
            .ok_or_else(|| {
                WorkspaceError::unsupported(match &extension {
                    Some(ext) => format!("no interpreter for {ext} files"),
                    None => format!("{file} has no extension to run it by"),
                })
            })?;

        let request = ExecRequest {
            argv: interpreter.argv(&file),
            cwd,
            timeout: self.timeout,
        };
        let result = self.execute(target, request).await?;

        if interpreter.wrapped && result.exit_code == Some(EXIT_NOT_FOUND) && !result.timed_out {
            debug!("Wrapper shell exited 127 running {}", file);
            return Ok(ExecutionResult::not_installed(
                result.command,
                &interpreter.requires,
            ));
        }
        Ok(result)
    }

    /// Run a command line, split into words without a shell.
    pub async fn run_command(
        &self,
        target: &WorkspaceTarget,
        line: &str,
        cwd: Option<&str>,
    ) -> Result<ExecutionResult, WorkspaceError> {
        let argv = shell_words::split(line)
            .map_err(|e| WorkspaceError::unsupported(format!("cannot parse command: {e}")))?;
        if argv.is_empty() {
            return Err(WorkspaceError::unsupported("empty command"));
        }
        if is_dangerous(&argv) {
            warn!("Refused dangerous command: {}", line);
            return Err(WorkspaceError::unsupported(format!(
                "command not allowed: {line}"
            )));
        }

        let cwd = match cwd {
            Some(raw) => self.policy.validate(raw)?,
            None => LogicalPath::root(),
        };
        self.execute(target, ExecRequest::literal(argv, cwd, self.timeout))
            .await
    }

    fn working_dir(
        &self,
        cwd: Option<&str>,
        file: &LogicalPath,
    ) -> Result<LogicalPath, WorkspaceError> {
        match cwd {
            Some(raw) => self.policy.validate(raw),
            None => Ok(file.parent().unwrap_or_else(LogicalPath::root)),
        }
    }

    async fn execute(
        &self,
        target: &WorkspaceTarget,
        request: ExecRequest,
    ) -> Result<ExecutionResult, WorkspaceError> {
        let command = describe(&request.argv);
        info!("Running `{}` in {}", command, request.cwd);

        match target.backend.exec(&target.handle, &request).await {
            Ok(output) => {
                if output.timed_out {
                    warn!(
                        "`{}` timed out after {}s and was killed",
                        command,
                        request.timeout.as_secs()
                    );
                } else {
                    debug!("`{}` exited with {:?}", command, output.exit_code);
                }
                Ok(ExecutionResult::from_output(command, output))
            }
            Err(BackendError::SpawnFailed { program, message }) => {
                warn!("Could not start {}: {}", program, message);
                Ok(ExecutionResult::not_installed(command, &program))
            }
            Err(e) => Err(e.into()),
        }
    }
}
