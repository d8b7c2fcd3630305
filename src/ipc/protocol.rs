//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::dispatch::Command;
use crate::events::LifecycleEvent;
use crate::task::{FollowUpPhase, TaskId, TaskKind};

/// Largest frame accepted from a client
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Requests from a client to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Ping to check connectivity
    Ping,

    /// Subscribe to lifecycle notifications
    Subscribe,

    /// Inject a key chord, as if pressed on the keyboard
    KeyPress { chord: String },
}

/// Responses from the daemon to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Key press handed to the dispatcher. `command` is absent for chords
    /// with no binding.
    Accepted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command: Option<Command>,
    },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from the daemon to subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Lifecycle { event: LifecycleEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// The running task, if any
    pub active_task: Option<ActiveTaskStatus>,

    /// Phase of the follow-up recorder
    pub follow_up_phase: FollowUpPhase,

    /// Number of detail chunks available for navigation
    pub details_total: usize,

    /// Most recent task or speech failure
    pub last_error: Option<String>,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTaskStatus {
    pub id: TaskId,
    pub kind: TaskKind,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            active_task: None,
            follow_up_phase: FollowUpPhase::default(),
            details_total: 0,
            last_error: None,
            uptime_secs: 0,
        }
    }
}

impl DaemonStatus {
    /// Fold a lifecycle event into the snapshot
    pub fn apply(&mut self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::TaskStarted { task_id, kind } => {
                self.active_task = Some(ActiveTaskStatus {
                    id: *task_id,
                    kind: *kind,
                });
            }
            LifecycleEvent::TaskFinished { task_id, error, .. } => {
                if self.active_task.map(|t| t.id) == Some(*task_id) {
                    self.active_task = None;
                }
                self.follow_up_phase = FollowUpPhase::Idle;
                if let Some(error) = error {
                    self.last_error = Some(error.clone());
                }
            }
            LifecycleEvent::FollowUpPhaseChanged { to, .. } => self.follow_up_phase = *to,
            LifecycleEvent::DetailsLoaded { total } => self.details_total = *total,
            LifecycleEvent::SpeechFailed { reason } => self.last_error = Some(reason.clone()),
            LifecycleEvent::TaskRejected { .. }
            | LifecycleEvent::CancelRequested { .. }
            | LifecycleEvent::ApiKeyUpdated { .. } => {}
        }
    }
}
