//! Follow-up recorder state machine
//!
//! Phases run Idle -> Prompting -> Recording -> Submitting -> Idle. Any
//! phase other than Idle can drop to Cancelled, which returns to Idle once
//! the owning task unwinds. Repeated presses of the follow-up command are
//! routed here while a session is active.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::{self, LifecycleEvent};

/// Phase of the follow-up session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpPhase {
    /// No session in progress
    #[default]
    Idle,
    /// Narrating the recording cue
    Prompting,
    /// Microphone is capturing the question
    Recording,
    /// Recording stopped, question is being answered
    Submitting,
    /// Session was cancelled and is unwinding
    Cancelled,
}

impl std::fmt::Display for FollowUpPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FollowUpPhase::Idle => write!(f, "Idle"),
            FollowUpPhase::Prompting => write!(f, "Prompting"),
            FollowUpPhase::Recording => write!(f, "Recording"),
            FollowUpPhase::Submitting => write!(f, "Submitting"),
            FollowUpPhase::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// What ended the recording phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitCause {
    /// The follow-up command was pressed again
    Pressed,
    /// The maximum recording duration elapsed
    Timeout,
    /// The recorder stopped on its own
    RecorderEnded,
}

/// Result of routing a follow-up press into an active session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressOutcome {
    /// The cue was skipped and recording starts now
    SkippedPrompt,
    /// Recording will stop and the question is submitted
    Submitted,
    /// The press had no effect in the current phase
    Ignored,
}

/// One follow-up session, shared between the supervisor and the task body
pub struct FollowUpSession {
    phase: Mutex<FollowUpPhase>,
    skip_prompt: CancellationToken,
    submit: CancellationToken,
    event_tx: broadcast::Sender<LifecycleEvent>,
}

impl FollowUpSession {
    /// Create a session in the Idle phase
    pub fn new(event_tx: broadcast::Sender<LifecycleEvent>) -> Self {
        Self {
            phase: Mutex::new(FollowUpPhase::Idle),
            skip_prompt: CancellationToken::new(),
            submit: CancellationToken::new(),
            event_tx,
        }
    }

    /// Get the current phase
    pub fn phase(&self) -> FollowUpPhase {
        *self.lock()
    }

    /// Whether liveness ticks may be narrated without being recorded
    pub fn allows_ticks(&self) -> bool {
        !matches!(
            self.phase(),
            FollowUpPhase::Prompting | FollowUpPhase::Recording
        )
    }

    /// Idle -> Prompting
    pub fn begin_prompting(&self) -> bool {
        self.advance(|phase| matches!(phase, FollowUpPhase::Idle), FollowUpPhase::Prompting)
    }

    /// Prompting -> Recording. Also true when a press already moved the
    /// session into Recording.
    pub fn begin_recording(&self) -> bool {
        let mut phase = self.lock();
        match *phase {
            FollowUpPhase::Prompting => {
                self.transition(&mut phase, FollowUpPhase::Recording);
                true
            }
            FollowUpPhase::Recording => true,
            _ => false,
        }
    }

    /// Recording -> Submitting. Only the first caller wins; any later
    /// submit trigger finds the session already Submitting and is ignored.
    pub fn begin_submitting(&self, cause: SubmitCause) -> bool {
        let entered = self.advance(
            |phase| matches!(phase, FollowUpPhase::Recording),
            FollowUpPhase::Submitting,
        );
        if entered {
            info!(?cause, "follow-up submitted");
        } else {
            debug!(?cause, "submit trigger ignored");
        }
        entered
    }

    /// Route a repeated press of the follow-up command
    pub fn press(&self) -> PressOutcome {
        let mut phase = self.lock();
        match *phase {
            FollowUpPhase::Prompting => {
                self.transition(&mut phase, FollowUpPhase::Recording);
                self.skip_prompt.cancel();
                PressOutcome::SkippedPrompt
            }
            FollowUpPhase::Recording if !self.submit.is_cancelled() => {
                self.submit.cancel();
                PressOutcome::Submitted
            }
            _ => PressOutcome::Ignored,
        }
    }

    /// Any active phase -> Cancelled
    pub fn cancel(&self) -> bool {
        self.advance(
            |phase| !matches!(phase, FollowUpPhase::Idle | FollowUpPhase::Cancelled),
            FollowUpPhase::Cancelled,
        )
    }

    /// Return to Idle once the task has ended
    pub fn finish(&self) {
        let mut phase = self.lock();
        if *phase != FollowUpPhase::Idle {
            self.transition(&mut phase, FollowUpPhase::Idle);
        }
    }

    /// Resolves once a press skipped the cue
    pub async fn prompt_skipped(&self) {
        self.skip_prompt.cancelled().await
    }

    /// Resolves once a press asked to submit
    pub async fn submit_requested(&self) {
        self.submit.cancelled().await
    }

    fn advance(&self, allowed: impl Fn(FollowUpPhase) -> bool, to: FollowUpPhase) -> bool {
        let mut phase = self.lock();
        if !allowed(*phase) {
            return false;
        }
        self.transition(&mut phase, to);
        true
    }

    fn transition(&self, phase: &mut FollowUpPhase, to: FollowUpPhase) {
        let from = *phase;
        *phase = to;
        info!(from = %from, to = %to, "follow-up transition");
        events::notify(&self.event_tx, LifecycleEvent::FollowUpPhaseChanged { from, to });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FollowUpPhase> {
        self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
