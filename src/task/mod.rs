//! Primary task supervision
//!
//! At most one primary task (a screen description or a spoken follow-up
//! question) runs at a time. The supervisor owns the single active-task
//! slot, hands each task a fresh [`CancelToken`], emits liveness ticks while
//! it runs and converts every collaborator failure into a narrated,
//! terminal `Failed` state.

mod cancel;
mod followup;
mod supervisor;

use serde::{Deserialize, Serialize};

pub use cancel::CancelToken;
pub use followup::{FollowUpPhase, PressOutcome};
pub use supervisor::{CancelOutcome, FollowUpPress, TaskHandle, TaskSettings, TaskSupervisor};

/// Identifier assigned to each started task
pub type TaskId = u64;

/// The kinds of primary work the supervisor can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Capture the screen and describe it
    Capture,
    /// Record a spoken question and answer it against the screen
    FollowUp,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Capture => write!(f, "capture"),
            TaskKind::FollowUp => write!(f, "follow-up"),
        }
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Running => write!(f, "RUNNING"),
            TaskState::Completed => write!(f, "COMPLETED"),
            TaskState::Cancelled => write!(f, "CANCELLED"),
            TaskState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Errors raised by task bodies and the collaborators they call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("screen capture failed: {0}")]
    CaptureFailed(String),

    #[error("describe request failed: {0}")]
    DescribeFailed(String),

    #[error("recording failed: {0}")]
    RecordingFailed(String),

    #[error("no question was recorded")]
    NothingRecorded,

    #[error("a task is already running")]
    AlreadyRunning,

    #[error("task was cancelled")]
    Cancelled,
}

impl TaskError {
    /// Text narrated to the user when a task ends with this error
    pub fn user_message(&self) -> String {
        match self {
            TaskError::CaptureFailed(reason) => format!("Failed to take screenshot: {}", reason),
            TaskError::DescribeFailed(reason) => format!("Error describing the screen: {}", reason),
            TaskError::RecordingFailed(reason) => format!("Recording failed: {}", reason),
            TaskError::NothingRecorded => {
                "I could not understand the question. Please press control plus N and try again."
                    .to_string()
            }
            TaskError::AlreadyRunning => {
                "Capture already in progress. Press control shift X to cancel it.".to_string()
            }
            TaskError::Cancelled => "Task canceled.".to_string(),
        }
    }
}
