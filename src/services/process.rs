//! External command execution for the process-backed collaborators
//!
//! Capture, recording and speech backends all shell out to a configured
//! program. Commands run with piped stdio and are killed when the stop token
//! fires or when the calling future is dropped.

use std::process::{ExitStatus, Stdio};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::task::CancelToken;

/// A program plus its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Errors from running an external command
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error talking to `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// What a finished (or stopped) command produced
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// The command was killed because the stop token fired
    pub stopped: bool,
}

impl ProcessOutput {
    /// Exited normally with status zero
    pub fn succeeded(&self) -> bool {
        !self.stopped && self.status.success()
    }

    /// Trimmed stderr for log and error messages
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Run `spec`, feeding `input` on stdin, until it exits or `stop` fires.
///
/// When stopped, the child is killed and whatever it wrote to stdout so far
/// is still returned.
pub async fn run_command(
    spec: &CommandSpec,
    input: Option<Vec<u8>>,
    stop: &CancelToken,
) -> Result<ProcessOutput, ProcessError> {
    let io_error = |source| ProcessError::Io {
        program: spec.program.clone(),
        source,
    };

    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

    debug!(command = %spec, "command started");

    if let (Some(data), Some(mut stdin)) = (input, child.stdin.take()) {
        // A program that exits without reading its input is not an error here
        if let Err(e) = stdin.write_all(&data).await {
            debug!(?e, command = %spec, "stdin closed early");
        }
        drop(stdin);
    }

    let stdout_task = tokio::spawn(read_all(child.stdout.take()));
    let stderr_task = tokio::spawn(read_all(child.stderr.take()));

    let (status, stopped) = tokio::select! {
        status = child.wait() => (status.map_err(io_error)?, false),
        _ = stop.cancelled() => {
            if let Err(e) = child.start_kill() {
                warn!(?e, command = %spec, "failed to kill command");
            }
            (child.wait().await.map_err(io_error)?, true)
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    debug!(command = %spec, ?status, stopped, bytes = stdout.len(), "command finished");

    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        stopped,
    })
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}
