//! Lifecycle notifications
//!
//! Components publish [`LifecycleEvent`]s on a broadcast channel. Sending is
//! fire-and-forget: a missing or lagging receiver never blocks the sender.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::task::{FollowUpPhase, TaskId, TaskKind, TaskState};

/// Events emitted while tasks run, narration happens and details change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A primary task was accepted and started
    TaskStarted { task_id: TaskId, kind: TaskKind },

    /// A start was dropped because another task is running
    TaskRejected { kind: TaskKind },

    /// Cancellation was requested for the active task
    CancelRequested { task_id: TaskId, kind: TaskKind },

    /// A task reached a terminal state
    TaskFinished {
        task_id: TaskId,
        kind: TaskKind,
        state: TaskState,
        /// Milliseconds between start and the terminal state
        duration_ms: u64,
        /// Failure description, for failed tasks only
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// The follow-up recorder changed phase
    FollowUpPhaseChanged { from: FollowUpPhase, to: FollowUpPhase },

    /// A new set of detail chunks replaced the previous one
    DetailsLoaded { total: usize },

    /// Every narration backend failed for one utterance
    SpeechFailed { reason: String },

    /// The API key was re-read
    ApiKeyUpdated { present: bool },
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleEvent::TaskStarted { task_id, kind } => {
                write!(f, "TASK_STARTED #{} ({})", task_id, kind)
            }
            LifecycleEvent::TaskRejected { kind } => write!(f, "TASK_REJECTED ({})", kind),
            LifecycleEvent::CancelRequested { task_id, kind } => {
                write!(f, "CANCEL_REQUESTED #{} ({})", task_id, kind)
            }
            LifecycleEvent::TaskFinished {
                task_id,
                kind,
                state,
                duration_ms,
                ..
            } => write!(f, "TASK_{} #{} ({}, {}ms)", state, task_id, kind, duration_ms),
            LifecycleEvent::FollowUpPhaseChanged { from, to } => {
                write!(f, "FOLLOW_UP {} -> {}", from, to)
            }
            LifecycleEvent::DetailsLoaded { total } => write!(f, "DETAILS_LOADED ({})", total),
            LifecycleEvent::SpeechFailed { reason } => write!(f, "SPEECH_FAILED ({})", reason),
            LifecycleEvent::ApiKeyUpdated { present } => {
                write!(f, "API_KEY_UPDATED (present: {})", present)
            }
        }
    }
}

/// Publish an event without waiting for anyone to receive it
pub fn notify(events: &broadcast::Sender<LifecycleEvent>, event: LifecycleEvent) {
    trace!(%event, "lifecycle event");
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = LifecycleEvent::TaskFinished {
            task_id: 3,
            kind: TaskKind::Capture,
            state: TaskState::Cancelled,
            duration_ms: 1500,
            error: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("task_finished"));
        assert!(json.contains("cancelled"));
        assert!(json.contains("1500"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"follow_up_phase_changed","from":"recording","to":"submitting"}"#;
        let event: LifecycleEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            LifecycleEvent::FollowUpPhaseChanged {
                from: FollowUpPhase::Recording,
                to: FollowUpPhase::Submitting,
            }
        );
    }

    #[test]
    fn test_notify_without_receivers_is_silent() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        notify(&tx, LifecycleEvent::DetailsLoaded { total: 2 });
    }

    #[test]
    fn test_display() {
        let event = LifecycleEvent::TaskStarted {
            task_id: 1,
            kind: TaskKind::FollowUp,
        };
        assert_eq!(event.to_string(), "TASK_STARTED #1 (follow-up)");
    }
}
