//! Running host tools (`ip`, `iptables`, `lxc`, ...).

use std::process::{Output, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{VnetError, VnetResult};

/// Run `program` with `args` and return its raw output.
///
/// A non-zero exit status is not an error here; callers that probe
/// (e.g. `iptables -C`) inspect the status themselves.
///
/// # Errors
///
/// Returns [`VnetError::Command`] if the program cannot be spawned.
pub async fn run(program: &str, args: &[&str]) -> VnetResult<Output> {
    tracing::trace!(program, ?args, "Running command");
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| spawn_error(program, &e))
}

/// Run `program` and return its stdout, failing on a non-zero exit status.
///
/// # Errors
///
/// Returns [`VnetError::Command`] with the program's stderr on failure.
pub async fn run_checked(program: &str, args: &[&str]) -> VnetResult<String> {
    let output = run(program, args).await?;
    check(program, args, output)
}

/// Like [`run_checked`], feeding `input` to the program's stdin.
///
/// # Errors
///
/// Returns [`VnetError::Command`] with the program's stderr on failure.
pub async fn run_with_input(program: &str, args: &[&str], input: &[u8]) -> VnetResult<String> {
    tracing::trace!(program, ?args, bytes = input.len(), "Running command with input");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(program, &e))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input).await?;
    }

    let output = child.wait_with_output().await?;
    check(program, args, output)
}

fn check(program: &str, args: &[&str], output: Output) -> VnetResult<String> {
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(VnetError::Command {
        program: format!("{program} {}", args.join(" ")),
        message: if stderr.is_empty() {
            format!("exited with {}", output.status)
        } else {
            stderr
        },
    })
}

fn spawn_error(program: &str, err: &std::io::Error) -> VnetError {
    VnetError::Command {
        program: program.to_string(),
        message: format!("unable to execute: {err}"),
    }
}
