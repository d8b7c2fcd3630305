//! Narration requests

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::SpeechError;

/// Priority class of a narration request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Disposable liveness signal while a task runs
    Tick,
    /// Task results and informational narration
    Summary,
    /// One detail chunk
    Detail,
    /// Failure narration, jumps ahead of queued ticks
    Error,
    /// Application-level narration such as the exit farewell
    System,
}

/// A unit of narration
#[derive(Debug)]
pub struct SpeechRequest {
    pub text: String,
    pub priority: Priority,
    /// Whether `interrupt_all` may stop or discard this request
    pub interruptible: bool,
    pub(super) done: Option<oneshot::Sender<Result<(), SpeechError>>>,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>, priority: Priority, interruptible: bool) -> Self {
        Self {
            text: text.into(),
            priority,
            interruptible,
            done: None,
        }
    }

    pub fn tick(text: impl Into<String>) -> Self {
        Self::new(text, Priority::Tick, true)
    }

    pub fn summary(text: impl Into<String>) -> Self {
        Self::new(text, Priority::Summary, true)
    }

    pub fn detail(text: impl Into<String>) -> Self {
        Self::new(text, Priority::Detail, true)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(text, Priority::Error, true)
    }

    /// Non-interruptible application narration
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(text, Priority::System, false)
    }

    /// Report the rendering outcome to whoever is waiting on this request
    pub(super) fn complete(mut self, outcome: Result<(), SpeechError>) {
        if let Some(done) = self.done.take() {
            let _ = done.send(outcome);
        }
    }
}
