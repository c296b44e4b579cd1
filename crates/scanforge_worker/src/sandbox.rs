//! Sandbox Executor: one external binary invocation, behind a trait so the
//! in-process and sandboxed runtimes are interchangeable from the
//! analyzer invoker's point of view.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("spawning sandboxed process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("analyzer exited with status {status}: {stderr}")]
    NonZeroExit { status: i32, stderr: String },
}

/// How the invoked process's environment is built from the caller's map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvMode {
    /// Replace the process environment entirely with the given map.
    Replace,
    /// Append the given map on top of the current process's environment.
    Append,
}

#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub env_mode: EnvMode,
    pub working_dir: PathBuf,
    /// When set, written to stdin as a single JSON blob before stdin is
    /// closed. The in-process runtime ignores this; only the sandboxed
    /// runtime's bundle entrypoint reads a command descriptor off stdin.
    pub stdin_command: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InvocationOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[async_trait::async_trait]
pub trait SandboxRuntime: Send + Sync {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationOutput, SandboxError>;
}

/// Fork/exec the binary directly on the host, no isolation beyond the OS
/// process boundary. Used when a request opts into `insecure` mode.
pub struct InProcessRuntime;

#[async_trait::async_trait]
impl SandboxRuntime for InProcessRuntime {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationOutput, SandboxError> {
        run_command(&request.binary, &request).await
    }
}

/// Launch a hardened container runtime which executes the binary from
/// inside a pre-baked bundle filesystem. The bundle launcher binary itself
/// is what gets exec'd; it is told which binary to run and with what
/// arguments via `request`.
pub struct SandboxedRuntime {
    pub launcher: PathBuf,
    pub bundle_root: PathBuf,
}

#[async_trait::async_trait]
impl SandboxRuntime for SandboxedRuntime {
    async fn invoke(&self, request: InvocationRequest) -> Result<InvocationOutput, SandboxError> {
        let mut launcher_request = request.clone();
        let mut launcher_args = vec![
            "--bundle".to_string(),
            self.bundle_root.display().to_string(),
            "--".to_string(),
            request.binary.display().to_string(),
        ];
        launcher_args.extend(request.args.clone());
        launcher_request.args = launcher_args;
        run_command(&self.launcher, &launcher_request).await
    }
}

async fn run_command(
    program: &Path,
    request: &InvocationRequest,
) -> Result<InvocationOutput, SandboxError> {
    let mut command = Command::new(program);
    command
        .args(&request.args)
        .current_dir(&request.working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    match request.env_mode {
        EnvMode::Replace => {
            command.env_clear();
            command.envs(&request.env);
        }
        EnvMode::Append => {
            command.envs(&request.env);
        }
    }

    let mut child = command.spawn()?;

    if let Some(stdin_payload) = &request.stdin_command {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(stdin_payload.as_bytes()).await?;
        }
    }
    drop(child.stdin.take());

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(SandboxError::NonZeroExit {
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(InvocationOutput {
        stdout: output.stdout,
        stderr: output.stderr,
    })
}
