//! Terraform process invocation.
//!
//! [`TerraformInvoker`] turns one tool request into one `terraform` child
//! process: it assembles the argument vector for the requested operation,
//! runs the binary inside the caller's working directory, and normalizes the
//! captured output into an [`InvocationResult`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// The Terraform subcommands exposed as tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Init,
    Plan,
    Apply,
    Destroy,
    Validate,
    Show,
    WorkspaceList,
    WorkspaceSelect,
}

impl Operation {
    /// Subcommand words placed before any flags, e.g. `["workspace", "select"]`.
    pub fn base_segments(&self) -> &'static [&'static str] {
        match self {
            Operation::Init => &["init"],
            Operation::Plan => &["plan"],
            Operation::Apply => &["apply"],
            Operation::Destroy => &["destroy"],
            Operation::Validate => &["validate"],
            Operation::Show => &["show"],
            Operation::WorkspaceList => &["workspace", "list"],
            Operation::WorkspaceSelect => &["workspace", "select"],
        }
    }

    /// True for operations that can change real infrastructure.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Operation::Apply | Operation::Destroy)
    }

    /// Assembles the full argument vector, base subcommand included.
    ///
    /// Parameter fields irrelevant to the operation are ignored. A missing or
    /// empty workspace name for `workspace select` is rejected here, before
    /// anything is launched.
    pub fn build_args(&self, params: &Parameters) -> Result<Vec<String>, InvokeError> {
        let mut args: Vec<String> = self
            .base_segments()
            .iter()
            .map(|s| s.to_string())
            .collect();

        match self {
            Operation::Init => {
                for (key, value) in &params.backend_config {
                    args.push("-backend-config".to_string());
                    args.push(format!("{}={}", key, value));
                }
            }
            Operation::Plan => push_var_args(&mut args, params),
            Operation::Apply | Operation::Destroy => {
                if params.auto_approve {
                    args.push("-auto-approve".to_string());
                }
                push_var_args(&mut args, params);
            }
            Operation::Validate | Operation::WorkspaceList => {}
            Operation::Show => {
                if let Some(plan_file) = params.plan_file.as_deref().filter(|p| !p.is_empty()) {
                    args.push(plan_file.to_string());
                }
            }
            Operation::WorkspaceSelect => match params.workspace.as_deref() {
                Some(name) if !name.is_empty() => args.push(name.to_string()),
                _ => {
                    return Err(InvokeError::InvalidParameters(
                        "workspace select requires a workspace name".to_string(),
                    ))
                }
            },
        }

        Ok(args)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_segments().join(" "))
    }
}

/// Optional arguments accepted by the operations.
///
/// `vars` and `backend_config` are ordered pairs: their flags are emitted in
/// the order the pairs were supplied, so identical inputs always assemble an
/// identical command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    /// Skip the interactive approval prompt (`apply` and `destroy`).
    pub auto_approve: bool,
    /// Variable definitions file passed as `-var-file` (`plan`, `apply`, `destroy`).
    pub var_file: Option<String>,
    /// Input variables passed as `-var key=value` (`plan`, `apply`, `destroy`).
    pub vars: Vec<(String, String)>,
    /// Backend settings passed as `-backend-config key=value` (`init`).
    pub backend_config: Vec<(String, String)>,
    /// Saved plan file shown instead of the current state (`show`).
    pub plan_file: Option<String>,
    /// Workspace to switch to (`workspace select`).
    pub workspace: Option<String>,
}

fn push_var_args(args: &mut Vec<String>, params: &Parameters) {
    if let Some(var_file) = params.var_file.as_deref().filter(|p| !p.is_empty()) {
        args.push("-var-file".to_string());
        args.push(var_file.to_string());
    }
    for (key, value) in &params.vars {
        args.push("-var".to_string());
        args.push(format!("{}={}", key, value));
    }
}

/// Captured output of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 if the process was killed by a signal).
    pub exit_code: i32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external commands. The production implementation spawns real child
/// processes; tests substitute scripted runners.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` inside `working_dir`, capturing stdout and
    /// stderr separately until the process exits.
    ///
    /// An `Err` means the process never started (missing binary, permission
    /// denied). A process that started and exited non-zero is an `Ok` output;
    /// check [`CommandOutput::success`] for that.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        working_dir: &Path,
    ) -> std::io::Result<CommandOutput>;
}

/// Runner backed by `tokio::process::Command`.
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        working_dir: &Path,
    ) -> std::io::Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            // stdin carries the MCP channel; the child must never read it
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(CommandOutput {
            // None here means the child was killed by a signal
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Normalized outcome of a completed invocation.
///
/// `succeeded` mirrors the exit code. On success `stderr` comes back empty
/// even if the process wrote warnings there; on failure both streams are
/// preserved, including any partial stdout produced before the process died.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationResult {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl From<CommandOutput> for InvocationResult {
    fn from(output: CommandOutput) -> Self {
        if output.success() {
            Self {
                succeeded: true,
                stdout: output.stdout,
                stderr: String::new(),
                exit_code: 0,
            }
        } else {
            Self {
                succeeded: false,
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.exit_code,
            }
        }
    }
}

/// Faults that prevent an operation from producing an [`InvocationResult`].
///
/// A non-zero exit from Terraform is not a fault; it comes back as a result
/// with `succeeded` false so the caller can relay Terraform's own diagnostic
/// text.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The requested tool does not map to a supported operation.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The working directory does not exist or is not a directory.
    #[error("working directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    /// A required per-operation parameter is missing or malformed.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The Terraform binary could not be launched at all.
    #[error("failed to launch {program}: {source}")]
    SpawnFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Executes Terraform operations as child processes.
///
/// The invoker keeps no state between calls; repeating an invocation with
/// identical inputs assembles an identical command line.
pub struct TerraformInvoker {
    binary: String,
    runner: Arc<dyn CommandRunner>,
}

impl TerraformInvoker {
    /// Invoker that runs `binary` through [`SystemCommandRunner`].
    pub fn new(binary: impl Into<String>) -> Self {
        Self::with_runner(binary, Arc::new(SystemCommandRunner))
    }

    /// Invoker with a custom runner, used by tests.
    pub fn with_runner(binary: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }

    /// The configured Terraform binary.
    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Runs one operation inside `working_dir` and waits for it to exit.
    ///
    /// Fails before any process is spawned if the directory is missing or the
    /// parameters are invalid for the operation, and with
    /// [`InvokeError::SpawnFailure`] if the binary cannot be started.
    /// Anything the process itself reports, including a non-zero exit, is a
    /// normal [`InvocationResult`].
    pub async fn invoke(
        &self,
        operation: Operation,
        params: &Parameters,
        working_dir: &Path,
    ) -> Result<InvocationResult, InvokeError> {
        if !working_dir.is_dir() {
            return Err(InvokeError::DirectoryNotFound(working_dir.to_path_buf()));
        }

        let args = operation.build_args(params)?;
        log::debug!(
            "Running {} {} in {:?}",
            self.binary,
            args.join(" "),
            working_dir
        );

        let output = self
            .runner
            .run(&self.binary, &args, working_dir)
            .await
            .map_err(|source| InvokeError::SpawnFailure {
                program: self.binary.clone(),
                source,
            })?;

        log::debug!("{} {} exited with code {}", self.binary, operation, output.exit_code);

        Ok(InvocationResult::from(output))
    }
}

/// Scripted runner for tests: records every call and replays queued
/// responses in order.
#[cfg(test)]
pub struct StubRunner {
    responses: std::sync::Mutex<Vec<std::io::Result<CommandOutput>>>,
    calls: std::sync::Mutex<Vec<(String, Vec<String>, PathBuf)>>,
}

#[cfg(test)]
impl StubRunner {
    pub fn new(responses: Vec<std::io::Result<CommandOutput>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Stub that returns the given output once.
    pub fn with_output(exit_code: i32, stdout: &str, stderr: &str) -> Self {
        Self::new(vec![Ok(CommandOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        })])
    }

    /// Every `(program, args, working_dir)` triple seen so far.
    pub fn calls(&self) -> Vec<(String, Vec<String>, PathBuf)> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl CommandRunner for StubRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        working_dir: &Path,
    ) -> std::io::Result<CommandOutput> {
        self.calls.lock().unwrap().push((
            program.to_string(),
            args.to_vec(),
            working_dir.to_path_buf(),
        ));
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(std::io::Error::other("no more scripted responses"));
        }
        responses.remove(0)
    }
}
