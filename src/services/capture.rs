//! Screen capture through an external screenshot command

use async_trait::async_trait;
use tracing::debug;

use super::process::{run_command, CommandSpec};
use super::{ImageBytes, ScreenCapture};
use crate::task::{CancelToken, TaskError};

/// Runs a command that writes a PNG screenshot to stdout
pub struct CommandCapture {
    command: CommandSpec,
}

impl CommandCapture {
    pub fn new(command: CommandSpec) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ScreenCapture for CommandCapture {
    async fn capture(&self) -> Result<ImageBytes, TaskError> {
        // Dropping this future kills the command, so no stop token is needed
        let output = run_command(&self.command, None, &CancelToken::new())
            .await
            .map_err(|e| TaskError::CaptureFailed(e.to_string()))?;

        if !output.succeeded() {
            return Err(TaskError::CaptureFailed(format!(
                "{} exited with {}: {}",
                self.command.program,
                output.status,
                output.stderr_text()
            )));
        }
        if output.stdout.is_empty() {
            return Err(TaskError::CaptureFailed("screenshot was empty".to_string()));
        }

        debug!(bytes = output.stdout.len(), "screen captured");
        Ok(ImageBytes(output.stdout))
    }
}
