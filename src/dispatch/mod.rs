//! Command dispatch
//!
//! Routes key chords to [`Command`]s and acts on them. Handling a command
//! never waits on a task or on narration: tasks are spawned by the
//! supervisor, narration is enqueued, and the only slow command
//! (re-reading the API key) runs on its own tokio task.

mod command;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::events::{self, LifecycleEvent};
use crate::hotkey::HotkeyEvent;
use crate::navigator::DetailNavigator;
use crate::services::CredentialSource;
use crate::speech::{Cue, SpeechCoordinator, SpeechRequest};
use crate::task::{
    CancelOutcome, FollowUpPhase, FollowUpPress, PressOutcome, TaskError, TaskHandle, TaskKind,
    TaskSupervisor,
};

pub use command::{route, Command};

/// Narrated once at startup
pub const INSTRUCTIONS: &str = "Welcome to the Vision Assistance App. \
    Press control M to capture the screen and hear a summary. \
    Press control N to ask a follow-up question, and control N again to send it. \
    Press control shift S to stop speech. \
    Press control shift X to cancel the current task. \
    Press control right or control down for the next detail, \
    and control left or control up for the previous detail. \
    Press control alt K to reload the Gemini API key. \
    Press control shift Q to exit.";

pub const GOODBYE: &str = "Exiting Vision Assistance App. Goodbye.";

const NO_TASK_MESSAGE: &str = "No task was running. Speech was stopped.";
const KEY_UPDATED_MESSAGE: &str = "API key updated successfully.";
const KEY_UNCHANGED_MESSAGE: &str = "API key update canceled. Existing value unchanged.";

/// Whether the dispatch loop keeps going after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Acts on commands by handing work to the supervisor, the navigator and
/// the speech coordinator
#[derive(Clone)]
pub struct Dispatcher {
    supervisor: TaskSupervisor,
    speech: SpeechCoordinator,
    navigator: DetailNavigator,
    credentials: Arc<dyn CredentialSource>,
    event_tx: broadcast::Sender<LifecycleEvent>,
    /// Most recently started task, awaited on shutdown
    last_task: Arc<Mutex<Option<TaskHandle>>>,
}

impl Dispatcher {
    pub fn new(
        supervisor: TaskSupervisor,
        speech: SpeechCoordinator,
        navigator: DetailNavigator,
        credentials: Arc<dyn CredentialSource>,
        event_tx: broadcast::Sender<LifecycleEvent>,
    ) -> Self {
        Self {
            supervisor,
            speech,
            navigator,
            credentials,
            event_tx,
            last_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Process hotkey events until Exit is pressed or every sender is gone
    pub async fn run(&self, mut hotkey_rx: mpsc::Receiver<HotkeyEvent>) {
        info!("dispatcher started");

        while let Some(event) = hotkey_rx.recv().await {
            match event {
                HotkeyEvent::Pressed(chord) => {
                    let Some(command) = route(&chord) else {
                        debug!(%chord, "unbound chord ignored");
                        continue;
                    };
                    if self.handle(command) == Flow::Exit {
                        break;
                    }
                }
                HotkeyEvent::InputClosed => {
                    info!("hotkey input closed, only IPC key presses remain");
                }
            }
        }

        info!("dispatcher stopped");
    }

    /// Narrate usage instructions, and where the log file is when there
    /// is one
    pub fn greet(&self, log_path: Option<&Path>) {
        self.speech.enqueue(SpeechRequest::summary(INSTRUCTIONS));
        if let Some(path) = log_path {
            self.speech.enqueue(SpeechRequest::summary(format!(
                "Logs are stored in {}.",
                path.display()
            )));
        }
    }

    /// Act on one command without waiting for its effects
    pub fn handle(&self, command: Command) -> Flow {
        info!(%command, "command received");

        // Stop whatever is playing before this command's own narration
        if command.interrupts_first() {
            self.speech.interrupt_all();
        }

        match command {
            Command::StartCapture => match self.supervisor.start(TaskKind::Capture) {
                Ok(handle) => self.track(handle),
                Err(e) => self.narrate_rejection(e),
            },
            Command::StartOrSubmitFollowUp => {
                let press = self.supervisor.press_follow_up(|| self.speech.interrupt_all());
                match press {
                    Ok(FollowUpPress::Started(handle)) => self.track(handle),
                    Ok(FollowUpPress::Forwarded(PressOutcome::Ignored)) => {
                        debug!("follow-up already submitting, press ignored");
                    }
                    Ok(FollowUpPress::Forwarded(outcome)) => {
                        if outcome == PressOutcome::Submitted {
                            self.speech.cue(Cue::SubmitPressed);
                        }
                        debug!(?outcome, phase = %self.supervisor.follow_up_phase(), "follow-up press forwarded");
                    }
                    Err(e) => self.narrate_rejection(e),
                }
            }
            Command::StopSpeech => {
                self.speech.cue(Cue::SpeechStopped);
                debug!(speaking = self.speech.is_speaking(), "speech stopped");
            }
            Command::CancelTask => {
                self.speech.cue(Cue::Cancelled);
                let text = match self.supervisor.cancel() {
                    CancelOutcome::Acknowledged { kind, .. } => {
                        format!("{} task canceled. Ready for next command.", kind_label(kind))
                    }
                    CancelOutcome::NoActiveTask => NO_TASK_MESSAGE.to_string(),
                };
                self.speech.enqueue(SpeechRequest::summary(text));
            }
            Command::NextDetail => {
                let navigation = self.navigator.next();
                self.speech.enqueue(SpeechRequest::detail(navigation.narration()));
            }
            Command::PreviousDetail => {
                let navigation = self.navigator.previous();
                self.speech.enqueue(SpeechRequest::detail(navigation.narration()));
            }
            Command::SetApiKey => {
                self.speech.cue(Cue::KeyReload);
                let this = self.clone();
                tokio::spawn(async move { this.reload_api_key().await });
            }
            Command::Exit => {
                if let CancelOutcome::Acknowledged { id, kind } = self.supervisor.cancel() {
                    info!(task_id = id, %kind, "task cancelled on exit");
                }
                return Flow::Exit;
            }
        }

        Flow::Continue
    }

    /// Stop any task and wait for it to wind down, then narrate the goodbye
    /// and wait for it. Each wait is bounded by `limit`.
    pub async fn farewell(&self, limit: Duration) {
        self.supervisor.cancel();
        let last = lock(&self.last_task).take();
        if let Some(handle) = last {
            let id = handle.id;
            match tokio::time::timeout(limit, handle.wait()).await {
                Ok(Some(report)) => debug!(task_id = id, state = %report.state, "last task settled"),
                Ok(None) => debug!(task_id = id, "last task report dropped"),
                Err(_) => warn!(task_id = id, "last task still running at exit"),
            }
        }

        self.speech.interrupt_all();
        let goodbye = self.speech.say_and_wait(SpeechRequest::system(GOODBYE));
        match tokio::time::timeout(limit, goodbye).await {
            Ok(Ok(())) => debug!("goodbye narrated"),
            Ok(Err(e)) => warn!(error = %e, "goodbye narration failed"),
            Err(_) => warn!(limit_ms = limit.as_millis() as u64, "goodbye narration timed out"),
        }
    }

    fn track(&self, handle: TaskHandle) {
        debug!(task_id = handle.id, kind = %handle.kind, "task started from command");
        *lock(&self.last_task) = Some(handle);
    }

    fn narrate_rejection(&self, error: TaskError) {
        // Anything said now would end up in the recorded question
        let phase = self.supervisor.follow_up_phase();
        if matches!(phase, FollowUpPhase::Prompting | FollowUpPhase::Recording) {
            info!(%phase, error = %error, "rejection not narrated while the microphone is live");
            return;
        }
        self.speech.cue(Cue::Rejected);
        self.speech.enqueue(SpeechRequest::summary(error.user_message()));
    }

    async fn reload_api_key(&self) {
        match self.credentials.reload().await {
            Ok(true) => {
                events::notify(&self.event_tx, LifecycleEvent::ApiKeyUpdated { present: true });
                self.speech.cue(Cue::KeyUpdated);
                self.speech.enqueue(SpeechRequest::summary(KEY_UPDATED_MESSAGE));
            }
            Ok(false) => {
                info!(location = %self.credentials.location(), "API key unchanged");
                self.speech.cue(Cue::Rejected);
                self.speech.enqueue(SpeechRequest::summary(KEY_UNCHANGED_MESSAGE));
            }
            Err(e) => {
                error!(error = %e, "failed to reload API key");
                self.speech.cue(Cue::Failed);
                self.speech.enqueue(SpeechRequest::error(KEY_UNCHANGED_MESSAGE));
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn kind_label(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Capture => "Capture",
        TaskKind::FollowUp => "Follow-up",
    }
}
