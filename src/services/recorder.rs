//! Microphone recording through an external audio command

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::process::{run_command, CommandSpec};
use super::{AudioBytes, Recorder};
use crate::task::{CancelToken, TaskError};

/// Extra time the command may run past the requested limit before it is
/// stopped from here
const LIMIT_GRACE: Duration = Duration::from_secs(2);

/// Runs a command that streams WAV audio to stdout until killed
pub struct CommandRecorder {
    command: CommandSpec,
}

impl CommandRecorder {
    pub fn new(command: CommandSpec) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Recorder for CommandRecorder {
    async fn record(
        &self,
        max_duration: Duration,
        stop: CancelToken,
    ) -> Result<AudioBytes, TaskError> {
        let limit = stop.child();
        let timer = {
            let limit = limit.clone();
            tokio::spawn(async move {
                tokio::time::sleep(max_duration + LIMIT_GRACE).await;
                limit.cancel();
            })
        };

        info!(command = %self.command, "microphone recording started");
        let output = run_command(&self.command, None, &limit).await;
        timer.abort();
        let output = output.map_err(|e| TaskError::RecordingFailed(e.to_string()))?;

        if !output.stopped && !output.status.success() {
            return Err(TaskError::RecordingFailed(format!(
                "{} exited with {}: {}",
                self.command.program,
                output.status,
                output.stderr_text()
            )));
        }

        debug!(bytes = output.stdout.len(), stopped = output.stopped, "microphone recording finished");
        Ok(AudioBytes(output.stdout))
    }
}
