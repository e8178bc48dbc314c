//! Running the external tools cibox drives (`lxc-*`, `ssh`, `rsync`).

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};

use cibox_shared::errors::{CiboxError, CiboxResult};
use tokio::process::Command;

/// Captured result of a finished tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// stderr, trimmed, or the exit status when the tool printed nothing.
    pub fn failure_reason(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exited with {}", self.status)
        } else {
            stderr.to_string()
        }
    }
}

/// Run `program` with `args`, capturing stdout and stderr.
///
/// A non-zero exit is not an error here; only failing to spawn is.
pub async fn run_tool<I, S>(program: &str, args: I) -> CiboxResult<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::trace!(command = ?cmd.as_std(), "running tool");

    let output = cmd
        .output()
        .await
        .map_err(|e| spawn_error(program, e))?;

    Ok(ToolOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run `program` attached to this process's terminal and return its exit code.
///
/// Used where the user watches the output live (ssh into a job).
pub async fn run_attached<I, S>(program: &str, args: I) -> CiboxResult<i32>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    tracing::trace!(command = ?cmd.as_std(), "running attached");

    let status = cmd.status().await.map_err(|e| spawn_error(program, e))?;
    Ok(exit_code(status))
}

/// Shell-style exit code: the process code, or 128 + signal number.
pub fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> CiboxError {
    if e.kind() == std::io::ErrorKind::NotFound {
        CiboxError::Operation(format!("{program} not found in PATH, is it installed?"))
    } else {
        CiboxError::Operation(format!("failed to run {program}: {e}"))
    }
}
