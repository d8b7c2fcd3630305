//! Single-active-task supervisor
//!
//! Holds the one optional active-task slot. Starting while the slot is taken
//! is rejected, never queued. Each task body runs on its own tokio task,
//! checks its [`CancelToken`] at every suspension point and reports exactly
//! one terminal state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use crate::events::{self, LifecycleEvent};
use crate::navigator::{text, DetailNavigator};
use crate::services::{AudioBytes, Services};
use crate::speech::{Cue, SpeechCoordinator, SpeechRequest};

use super::followup::{FollowUpPhase, FollowUpSession, PressOutcome, SubmitCause};
use super::{CancelToken, TaskError, TaskId, TaskKind, TaskState};

const DESCRIBE_PROMPT: &str = "Describe this screenshot for a blind user.";

const FOLLOW_UP_PROMPT: &str = "You are assisting a blind user. \
    Answer the user's question, spoken in the attached audio, using only this screenshot. \
    Be clear, concise, and practical.";

const RECORDING_CUE: &str = "Recording mode. Ask your follow-up question after the beep. \
    Press control plus N again to send immediately.";

const NAVIGATION_HINT: &str = "Press control plus right arrow for next detail. \
    Press control plus left arrow for previous detail.";

/// Timing knobs for task bodies
#[derive(Debug, Clone)]
pub struct TaskSettings {
    /// Interval between liveness ticks
    pub tick_interval: Duration,
    /// Text narrated for each tick
    pub tick_text: String,
    /// Hard limit on follow-up recording
    pub max_recording: Duration,
    /// Longest wait for the recording cue to finish playing
    pub cue_timeout: Duration,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1200),
            tick_text: "Working.".to_string(),
            max_recording: Duration::from_secs(30),
            cue_timeout: Duration::from_secs(10),
        }
    }
}

/// Final report for a task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    pub id: TaskId,
    pub kind: TaskKind,
    pub state: TaskState,
    pub duration: Duration,
    pub error: Option<TaskError>,
}

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The active task was told to stop
    Acknowledged { id: TaskId, kind: TaskKind },
    /// Nothing was running
    NoActiveTask,
}

/// Result of the start-or-submit follow-up command
#[derive(Debug)]
pub enum FollowUpPress {
    /// A new follow-up task was started
    Started(TaskHandle),
    /// The press was routed into the running session
    Forwarded(PressOutcome),
}

/// Caller's view of a started task
#[derive(Debug)]
pub struct TaskHandle {
    pub id: TaskId,
    pub kind: TaskKind,
    done: oneshot::Receiver<TaskReport>,
}

impl TaskHandle {
    /// Wait for the task to reach a terminal state
    pub async fn wait(self) -> Option<TaskReport> {
        self.done.await.ok()
    }
}

type CompletionCallback = Box<dyn Fn(&TaskReport) + Send + Sync>;

struct ActiveTask {
    id: TaskId,
    kind: TaskKind,
    token: CancelToken,
    session: Option<Arc<FollowUpSession>>,
}

struct Inner {
    slot: Mutex<Option<ActiveTask>>,
    next_id: AtomicU64,
    services: Services,
    speech: SpeechCoordinator,
    navigator: DetailNavigator,
    event_tx: broadcast::Sender<LifecycleEvent>,
    settings: TaskSettings,
    callbacks: Mutex<Vec<CompletionCallback>>,
}

/// Owner of the single active-task slot. Cheap to clone.
#[derive(Clone)]
pub struct TaskSupervisor {
    inner: Arc<Inner>,
}

impl TaskSupervisor {
    pub fn new(
        services: Services,
        speech: SpeechCoordinator,
        navigator: DetailNavigator,
        event_tx: broadcast::Sender<LifecycleEvent>,
        settings: TaskSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(None),
                next_id: AtomicU64::new(1),
                services,
                speech,
                navigator,
                event_tx,
                settings,
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start a task of `kind`, or reject it if one is already running.
    ///
    /// Must be called from within the tokio runtime; the body is spawned
    /// and this returns immediately.
    pub fn start(&self, kind: TaskKind) -> Result<TaskHandle, TaskError> {
        let mut slot = lock(&self.inner.slot);
        if let Some(active) = slot.as_ref() {
            info!(requested = %kind, running = %active.kind, task_id = active.id, "start rejected");
            events::notify(&self.inner.event_tx, LifecycleEvent::TaskRejected { kind });
            return Err(TaskError::AlreadyRunning);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let token = CancelToken::new();
        let session = match kind {
            TaskKind::FollowUp => Some(Arc::new(FollowUpSession::new(self.inner.event_tx.clone()))),
            TaskKind::Capture => None,
        };

        *slot = Some(ActiveTask {
            id,
            kind,
            token: token.clone(),
            session: session.clone(),
        });
        drop(slot);

        info!(task_id = id, kind = %kind, "task started");
        events::notify(&self.inner.event_tx, LifecycleEvent::TaskStarted { task_id: id, kind });

        let (done_tx, done_rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let report = run_task(&inner, id, kind, token, session).await;
            let _ = done_tx.send(report);
        });

        Ok(TaskHandle {
            id,
            kind,
            done: done_rx,
        })
    }

    /// Handle a press of the follow-up command: route it into the running
    /// session, or start a new follow-up task when nothing is running.
    ///
    /// `preempt` runs after the press has reached a running task, or before
    /// a new task starts. A press that skips the cue therefore lands before
    /// the interrupted cue can move the session on to Recording.
    pub fn press_follow_up(&self, preempt: impl FnOnce()) -> Result<FollowUpPress, TaskError> {
        let routed = {
            let slot = lock(&self.inner.slot);
            slot.as_ref().map(|active| match &active.session {
                Some(session) => Ok(FollowUpPress::Forwarded(session.press())),
                None => {
                    events::notify(
                        &self.inner.event_tx,
                        LifecycleEvent::TaskRejected {
                            kind: TaskKind::FollowUp,
                        },
                    );
                    Err(TaskError::AlreadyRunning)
                }
            })
        };

        preempt();
        match routed {
            Some(routed) => routed,
            None => self.start(TaskKind::FollowUp).map(FollowUpPress::Started),
        }
    }

    /// Request cancellation of the active task. Idempotent.
    pub fn cancel(&self) -> CancelOutcome {
        let slot = lock(&self.inner.slot);
        let Some(active) = slot.as_ref() else {
            debug!("cancel requested with no active task");
            return CancelOutcome::NoActiveTask;
        };

        if !active.token.is_cancelled() {
            info!(task_id = active.id, kind = %active.kind, "cancelling task");
            active.token.cancel();
            if let Some(session) = &active.session {
                session.cancel();
            }
            events::notify(
                &self.inner.event_tx,
                LifecycleEvent::CancelRequested {
                    task_id: active.id,
                    kind: active.kind,
                },
            );
        }

        CancelOutcome::Acknowledged {
            id: active.id,
            kind: active.kind,
        }
    }

    /// Register a callback invoked with every task's final report
    pub fn on_completion(&self, callback: impl Fn(&TaskReport) + Send + Sync + 'static) {
        lock(&self.inner.callbacks).push(Box::new(callback));
    }

    /// The running task, if any
    #[cfg(test)]
    pub fn active(&self) -> Option<(TaskId, TaskKind)> {
        lock(&self.inner.slot).as_ref().map(|active| (active.id, active.kind))
    }

    /// Phase of the running follow-up session, Idle otherwise
    pub fn follow_up_phase(&self) -> FollowUpPhase {
        lock(&self.inner.slot)
            .as_ref()
            .and_then(|active| active.session.as_ref().map(|s| s.phase()))
            .unwrap_or_default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_task(
    inner: &Arc<Inner>,
    id: TaskId,
    kind: TaskKind,
    token: CancelToken,
    session: Option<Arc<FollowUpSession>>,
) -> TaskReport {
    let started_at = Instant::now();
    inner.speech.cue(match kind {
        TaskKind::Capture => Cue::CaptureStarted,
        TaskKind::FollowUp => Cue::FollowUpStarted,
    });
    let ticks = token.child();
    let tick_loop = tokio::spawn(emit_ticks(
        Arc::clone(inner),
        ticks.clone(),
        session.clone(),
    ));

    let result = match &session {
        Some(session) => follow_up_body(inner, &token, session).await,
        None => capture_body(inner, &token).await,
    };

    // Ticks stop the moment the task leaves Running
    ticks.cancel();
    let _ = tick_loop.await;

    let (state, error) = match result {
        Ok(()) => (TaskState::Completed, None),
        Err(TaskError::Cancelled) => (TaskState::Cancelled, None),
        Err(e) => (TaskState::Failed, Some(e)),
    };

    if let Some(e) = &error {
        error!(task_id = id, kind = %kind, error = %e, "task failed");
        inner.speech.cue(Cue::Failed);
        inner.speech.enqueue(SpeechRequest::error(e.user_message()));
    }

    if let Some(session) = &session {
        session.finish();
    }

    {
        let mut slot = lock(&inner.slot);
        if slot.as_ref().map(|active| active.id) == Some(id) {
            *slot = None;
        }
    }

    let duration = started_at.elapsed();
    info!(task_id = id, kind = %kind, state = %state, duration_ms = duration.as_millis() as u64, "task finished");
    events::notify(
        &inner.event_tx,
        LifecycleEvent::TaskFinished {
            task_id: id,
            kind,
            state,
            duration_ms: duration.as_millis() as u64,
            error: error.as_ref().map(|e| e.to_string()),
        },
    );

    let report = TaskReport {
        id,
        kind,
        state,
        duration,
        error,
    };
    for callback in lock(&inner.callbacks).iter() {
        callback(&report);
    }
    report
}

/// Periodic liveness narration while the task runs
async fn emit_ticks(
    inner: Arc<Inner>,
    ticks: CancelToken,
    session: Option<Arc<FollowUpSession>>,
) {
    let mut interval = tokio::time::interval(inner.settings.tick_interval);
    // The first tick of a tokio interval fires immediately
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = ticks.cancelled() => break,
            _ = interval.tick() => {
                if session.as_ref().is_some_and(|s| !s.allows_ticks()) {
                    continue;
                }
                inner.speech.enqueue(SpeechRequest::tick(inner.settings.tick_text.clone()));
            }
        }
    }
}

/// capture -> describe -> load details -> narrate summary
async fn capture_body(inner: &Inner, token: &CancelToken) -> Result<(), TaskError> {
    token.checkpoint()?;
    let image = token.guard(inner.services.capture.capture()).await?;
    debug!(bytes = image.0.len(), "screenshot taken");
    inner.speech.cue(Cue::Processing);

    let description = token
        .guard(inner.services.describer.describe(&image, DESCRIBE_PROMPT))
        .await?;
    info!(chars = description.len(), "description received");

    let details = text::split_details(&description);
    let summary = text::build_summary(&description);
    token.checkpoint()?;

    let total = details.len();
    inner.navigator.load(details);
    events::notify(&inner.event_tx, LifecycleEvent::DetailsLoaded { total });

    inner.speech.cue(Cue::ResultReady);
    inner.speech.enqueue(SpeechRequest::summary(format!("Summary. {}", summary)));
    inner.speech.enqueue(SpeechRequest::summary(NAVIGATION_HINT));
    Ok(())
}

/// cue -> record until pressed or timed out -> capture -> exchange -> narrate
async fn follow_up_body(
    inner: &Inner,
    token: &CancelToken,
    session: &FollowUpSession,
) -> Result<(), TaskError> {
    if !session.begin_prompting() {
        return Err(TaskError::Cancelled);
    }

    let cue = inner.speech.say_and_wait(SpeechRequest::summary(RECORDING_CUE));
    tokio::select! {
        biased;
        _ = token.cancelled() => return Err(TaskError::Cancelled),
        _ = session.prompt_skipped() => debug!("recording cue skipped"),
        _ = tokio::time::timeout(inner.settings.cue_timeout, cue) => {}
    }

    token.checkpoint()?;
    if !session.begin_recording() {
        return Err(TaskError::Cancelled);
    }

    // The microphone opens only after the beep has sounded
    tokio::select! {
        biased;
        _ = token.cancelled() => return Err(TaskError::Cancelled),
        _ = inner.speech.cue_and_wait(Cue::RecordingStarted) => {}
    }

    let audio = record_question(inner, token, session).await?;
    inner.speech.cue(Cue::RecordingStopped);
    token.checkpoint()?;
    if audio.is_empty() {
        return Err(TaskError::NothingRecorded);
    }
    info!(bytes = audio.0.len(), "question recorded");

    let image = token.guard(inner.services.capture.capture()).await?;
    inner.speech.cue(Cue::Processing);
    let answer = token
        .guard(inner.services.describer.exchange(&audio, &image, FOLLOW_UP_PROMPT))
        .await?;
    token.checkpoint()?;

    inner.speech.cue(Cue::ResultReady);
    inner
        .speech
        .enqueue(SpeechRequest::summary(text::normalize_for_speech(&answer)));
    Ok(())
}

/// Run the microphone until a press, the time limit, or the recorder itself
/// ends the recording. The first of those wins the Recording -> Submitting
/// transition.
async fn record_question(
    inner: &Inner,
    token: &CancelToken,
    session: &FollowUpSession,
) -> Result<AudioBytes, TaskError> {
    let stop = token.child();
    let recording = inner
        .services
        .recorder
        .record(inner.settings.max_recording, stop.clone());
    tokio::pin!(recording);

    let (cause, finished) = tokio::select! {
        biased;
        _ = token.cancelled() => {
            // The microphone stops through the child token; its result is discarded
            let _ = recording.await;
            return Err(TaskError::Cancelled);
        }
        _ = session.submit_requested() => (SubmitCause::Pressed, None),
        _ = tokio::time::sleep(inner.settings.max_recording) => (SubmitCause::Timeout, None),
        result = &mut recording => (SubmitCause::RecorderEnded, Some(result)),
    };

    if !session.begin_submitting(cause) {
        stop.cancel();
        if finished.is_none() {
            let _ = recording.await;
        }
        return Err(TaskError::Cancelled);
    }

    stop.cancel();
    match finished {
        Some(result) => result,
        None => recording.await,
    }
    .inspect_err(|e| warn!(error = %e, "recording failed"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::services::fake::{Fakes, RecordedCues, ScriptedBackend};
    use crate::services::ImageBytes;
    use crate::speech::{BackendChain, NarrationBackend};

    struct Harness {
        supervisor: TaskSupervisor,
        fakes: Fakes,
        backend: Arc<ScriptedBackend>,
        cues: Arc<RecordedCues>,
        navigator: DetailNavigator,
        events: broadcast::Receiver<LifecycleEvent>,
    }

    fn harness(settings: TaskSettings) -> Harness {
        harness_with(settings, ScriptedBackend::instant("fake"))
    }

    fn harness_with(settings: TaskSettings, backend: Arc<ScriptedBackend>) -> Harness {
        let (tx, rx) = broadcast::channel(128);
        let cues = RecordedCues::new();
        let speech = SpeechCoordinator::new(
            BackendChain::new(vec![backend.clone() as Arc<dyn NarrationBackend>]),
            cues.clone(),
            tx.clone(),
        );
        tokio::spawn(speech.clone().run());
        let fakes = Fakes::new();
        let navigator = DetailNavigator::new();
        let supervisor =
            TaskSupervisor::new(fakes.services(), speech, navigator.clone(), tx, settings);
        Harness {
            supervisor,
            fakes,
            backend,
            cues,
            navigator,
            events: rx,
        }
    }

    /// Settings whose recording cue holds the session in Prompting
    fn slow_cue_settings() -> TaskSettings {
        TaskSettings {
            cue_timeout: Duration::from_secs(30),
            ..fast_settings()
        }
    }

    fn start_follow_up(supervisor: &TaskSupervisor) -> TaskHandle {
        match supervisor.press_follow_up(|| {}).unwrap() {
            FollowUpPress::Started(handle) => handle,
            other => panic!("unexpected: {:?}", other),
        }
    }

    async fn wait_until(what: &str, condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{} never happened", what));
    }

    fn fast_settings() -> TaskSettings {
        TaskSettings {
            tick_interval: Duration::from_millis(20),
            tick_text: "tick".to_string(),
            max_recording: Duration::from_secs(5),
            cue_timeout: Duration::from_secs(1),
        }
    }

    async fn wait_for_phase(supervisor: &TaskSupervisor, phase: FollowUpPhase) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while supervisor.follow_up_phase() != phase {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("phase was never reached");
    }

    #[tokio::test]
    async fn test_capture_completes_and_loads_details() {
        let h = harness(fast_settings());

        let handle = h.supervisor.start(TaskKind::Capture).unwrap();
        let report = handle.wait().await.unwrap();

        assert_eq!(report.state, TaskState::Completed);
        assert_eq!(h.navigator.total(), 3);
        assert!(h.supervisor.active().is_none());
        let summary = h.backend.wait_spoken_containing("Summary.").await;
        assert_eq!(summary, "Summary. A desktop. Two windows.");

        h.cues.wait_played(Cue::ResultReady).await;
        assert_eq!(
            h.cues.played(),
            vec![Cue::CaptureStarted, Cue::Processing, Cue::ResultReady]
        );
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let h = harness(fast_settings());
        h.fakes.set_describe_delay(Duration::from_millis(200));

        let first = h.supervisor.start(TaskKind::Capture).unwrap();
        let second = h.supervisor.start(TaskKind::Capture);
        let third = h.supervisor.start(TaskKind::FollowUp);

        assert_eq!(second.unwrap_err(), TaskError::AlreadyRunning);
        assert_eq!(third.unwrap_err(), TaskError::AlreadyRunning);
        assert_eq!(first.wait().await.unwrap().state, TaskState::Completed);
        assert_eq!(h.fakes.describer.describe_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_starts_admit_exactly_one() {
        let h = harness(fast_settings());
        h.fakes.set_describe_delay(Duration::from_millis(200));

        let mut joins = Vec::new();
        for _ in 0..16 {
            let supervisor = h.supervisor.clone();
            joins.push(tokio::spawn(async move { supervisor.start(TaskKind::Capture).is_ok() }));
        }
        let mut accepted = 0;
        for join in joins {
            if join.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_describe_keeps_previous_details() {
        let h = harness(fast_settings());
        h.navigator.load(vec!["Old.".to_string()]);
        h.fakes.set_describe_delay(Duration::from_secs(30));

        let handle = h.supervisor.start(TaskKind::Capture).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(
            h.supervisor.cancel(),
            CancelOutcome::Acknowledged { kind: TaskKind::Capture, .. }
        ));

        let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.state, TaskState::Cancelled);
        assert_eq!(h.navigator.total(), 1);
        assert!(h.backend.spoken().iter().all(|t| !t.starts_with("Summary")));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let mut h = harness(fast_settings());
        h.fakes.set_describe_delay(Duration::from_secs(30));

        let handle = h.supervisor.start(TaskKind::Capture).unwrap();
        let first = h.supervisor.cancel();
        let second = h.supervisor.cancel();
        assert_eq!(first, second);
        handle.wait().await.unwrap();

        let mut cancel_events = 0;
        while let Ok(event) = h.events.try_recv() {
            if matches!(event, LifecycleEvent::CancelRequested { .. }) {
                cancel_events += 1;
            }
        }
        assert_eq!(cancel_events, 1);
        assert_eq!(h.supervisor.cancel(), CancelOutcome::NoActiveTask);
    }

    #[tokio::test]
    async fn test_cancel_without_task() {
        let mut h = harness(fast_settings());
        assert_eq!(h.supervisor.cancel(), CancelOutcome::NoActiveTask);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_capture_failure_is_narrated() {
        let h = harness(fast_settings());
        *h.fakes.capture.result.lock().unwrap() =
            Err(TaskError::CaptureFailed("no display".to_string()));

        let report = h.supervisor.start(TaskKind::Capture).unwrap().wait().await.unwrap();

        assert_eq!(report.state, TaskState::Failed);
        assert_eq!(report.error, Some(TaskError::CaptureFailed("no display".to_string())));
        let narrated = h.backend.wait_spoken_containing("no display").await;
        assert!(narrated.starts_with("Failed to take screenshot"));
        h.cues.wait_played(Cue::Failed).await;
        assert!(!h.cues.played().contains(&Cue::Processing));
        assert_eq!(h.fakes.describer.describe_calls.load(Ordering::SeqCst), 0);

        // The supervisor accepts new work after a failure
        *h.fakes.capture.result.lock().unwrap() = Ok(ImageBytes(b"png".to_vec()));
        let report = h.supervisor.start(TaskKind::Capture).unwrap().wait().await.unwrap();
        assert_eq!(report.state, TaskState::Completed);
    }

    #[tokio::test]
    async fn test_ticks_while_running_and_not_after() {
        let h = harness(fast_settings());
        h.fakes.set_describe_delay(Duration::from_millis(150));

        h.supervisor.start(TaskKind::Capture).unwrap().wait().await.unwrap();
        // Let the drain loop render anything queued before the task ended
        tokio::time::sleep(Duration::from_millis(30)).await;
        let ticks_at_end = h.backend.spoken().iter().filter(|t| *t == "tick").count();
        assert!(ticks_at_end >= 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let ticks_later = h.backend.spoken().iter().filter(|t| *t == "tick").count();
        assert_eq!(ticks_at_end, ticks_later);
    }

    #[tokio::test]
    async fn test_completion_callbacks() {
        let h = harness(fast_settings());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        h.supervisor.on_completion(move |report| {
            assert_ne!(report.state, TaskState::Running);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        h.supervisor.start(TaskKind::Capture).unwrap().wait().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_follow_up_double_press_submits_once() {
        let h = harness(fast_settings());

        let handle = match h.supervisor.press_follow_up(|| {}).unwrap() {
            FollowUpPress::Started(handle) => handle,
            other => panic!("unexpected: {:?}", other),
        };
        wait_for_phase(&h.supervisor, FollowUpPhase::Recording).await;

        let first = h.supervisor.press_follow_up(|| {}).unwrap();
        let second = h.supervisor.press_follow_up(|| {}).unwrap();
        assert!(matches!(first, FollowUpPress::Forwarded(PressOutcome::Submitted)));
        assert!(matches!(second, FollowUpPress::Forwarded(PressOutcome::Ignored)));

        let report = handle.wait().await.unwrap();
        assert_eq!(report.state, TaskState::Completed);
        assert_eq!(h.fakes.describer.exchange_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.fakes.recorder.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(h.supervisor.follow_up_phase(), FollowUpPhase::Idle);

        h.cues.wait_played(Cue::ResultReady).await;
        assert_eq!(
            h.cues.played(),
            vec![
                Cue::FollowUpStarted,
                Cue::RecordingStarted,
                Cue::RecordingStopped,
                Cue::Processing,
                Cue::ResultReady,
            ]
        );
    }

    #[tokio::test]
    async fn test_recording_starts_after_its_cue() {
        let h = harness(fast_settings());

        let handle = start_follow_up(&h.supervisor);
        let recorder = Arc::clone(&h.fakes.recorder);
        wait_until("recording", || recorder.calls.load(Ordering::SeqCst) == 1).await;

        assert!(h.cues.played().contains(&Cue::RecordingStarted));
        assert!(h.backend.spoken().iter().any(|t| t.starts_with("Recording mode.")));

        h.supervisor.cancel();
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_follow_up_press_during_prompting_skips_cue() {
        let h = harness_with(
            slow_cue_settings(),
            ScriptedBackend::with_duration("fake", Duration::from_secs(30)),
        );

        let handle = start_follow_up(&h.supervisor);
        wait_for_phase(&h.supervisor, FollowUpPhase::Prompting).await;

        let press = h.supervisor.press_follow_up(|| {}).unwrap();
        assert!(matches!(press, FollowUpPress::Forwarded(PressOutcome::SkippedPrompt)));
        assert_eq!(h.supervisor.follow_up_phase(), FollowUpPhase::Recording);

        // Recording starts without waiting out the thirty second cue
        let recorder = Arc::clone(&h.fakes.recorder);
        wait_until("recording", || recorder.calls.load(Ordering::SeqCst) == 1).await;
        assert_eq!(h.fakes.describer.exchange_calls.load(Ordering::SeqCst), 0);

        let press = h.supervisor.press_follow_up(|| {}).unwrap();
        assert!(matches!(press, FollowUpPress::Forwarded(PressOutcome::Submitted)));
        let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.state, TaskState::Completed);
        assert_eq!(h.fakes.describer.exchange_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_press_reaches_session_before_preempt_runs() {
        let h = harness_with(
            slow_cue_settings(),
            ScriptedBackend::with_duration("fake", Duration::from_secs(30)),
        );

        // Starting: preempt runs while nothing is active yet
        let supervisor = h.supervisor.clone();
        let before_start = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&before_start);
        let handle = match h
            .supervisor
            .press_follow_up(|| *seen.lock().unwrap() = Some(supervisor.active().is_some()))
            .unwrap()
        {
            FollowUpPress::Started(handle) => handle,
            other => panic!("unexpected: {:?}", other),
        };
        assert_eq!(*before_start.lock().unwrap(), Some(false));
        wait_for_phase(&h.supervisor, FollowUpPhase::Prompting).await;

        // Forwarding: preempt runs after the press moved the session on
        let after_press = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&after_press);
        h.supervisor
            .press_follow_up(|| *seen.lock().unwrap() = Some(supervisor.follow_up_phase()))
            .unwrap();
        assert_eq!(*after_press.lock().unwrap(), Some(FollowUpPhase::Recording));

        h.supervisor.cancel();
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_follow_up_cancel_while_prompting() {
        let h = harness_with(
            slow_cue_settings(),
            ScriptedBackend::with_duration("fake", Duration::from_secs(30)),
        );

        let handle = start_follow_up(&h.supervisor);
        wait_for_phase(&h.supervisor, FollowUpPhase::Prompting).await;
        assert!(matches!(
            h.supervisor.cancel(),
            CancelOutcome::Acknowledged { kind: TaskKind::FollowUp, .. }
        ));

        let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.state, TaskState::Cancelled);
        assert_eq!(h.fakes.recorder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.fakes.describer.exchange_calls.load(Ordering::SeqCst), 0);
        assert!(!h.cues.played().contains(&Cue::RecordingStarted));
        assert_eq!(h.supervisor.follow_up_phase(), FollowUpPhase::Idle);
    }

    #[tokio::test]
    async fn test_follow_up_cancel_while_submitting_discards_answer() {
        let h = harness(fast_settings());
        h.fakes.set_describe_delay(Duration::from_secs(30));

        let handle = start_follow_up(&h.supervisor);
        wait_for_phase(&h.supervisor, FollowUpPhase::Recording).await;
        h.supervisor.press_follow_up(|| {}).unwrap();
        wait_for_phase(&h.supervisor, FollowUpPhase::Submitting).await;
        let describer = Arc::clone(&h.fakes.describer);
        wait_until("exchange", || describer.exchange_calls.load(Ordering::SeqCst) == 1).await;

        h.supervisor.cancel();
        let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.state, TaskState::Cancelled);
        assert_eq!(h.fakes.describer.exchange_calls.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(h.backend.spoken().iter().all(|t| !t.contains("A desktop")));
        assert!(!h.cues.played().contains(&Cue::ResultReady));
    }

    #[tokio::test]
    async fn test_follow_up_exchange_failure_is_narrated() {
        let h = harness(TaskSettings {
            max_recording: Duration::from_millis(30),
            ..fast_settings()
        });
        *h.fakes.describer.result.lock().unwrap() =
            Err(TaskError::DescribeFailed("quota exceeded".to_string()));

        let report = start_follow_up(&h.supervisor).wait().await.unwrap();

        assert_eq!(report.state, TaskState::Failed);
        assert_eq!(
            report.error,
            Some(TaskError::DescribeFailed("quota exceeded".to_string()))
        );
        let narrated = h.backend.wait_spoken_containing("quota exceeded").await;
        assert_eq!(narrated, "Error describing the screen: quota exceeded");
        h.cues.wait_played(Cue::Failed).await;
        assert!(!h.cues.played().contains(&Cue::ResultReady));
    }

    #[tokio::test]
    async fn test_follow_up_times_out_into_submit() {
        let h = harness(TaskSettings {
            max_recording: Duration::from_millis(50),
            ..fast_settings()
        });

        let report = match h.supervisor.press_follow_up(|| {}).unwrap() {
            FollowUpPress::Started(handle) => handle.wait().await.unwrap(),
            other => panic!("unexpected: {:?}", other),
        };

        assert_eq!(report.state, TaskState::Completed);
        assert_eq!(h.fakes.describer.exchange_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_follow_up_cancel_while_recording() {
        let h = harness(fast_settings());

        let handle = match h.supervisor.press_follow_up(|| {}).unwrap() {
            FollowUpPress::Started(handle) => handle,
            other => panic!("unexpected: {:?}", other),
        };
        wait_for_phase(&h.supervisor, FollowUpPhase::Recording).await;
        h.supervisor.cancel();

        let report = handle.wait().await.unwrap();
        assert_eq!(report.state, TaskState::Cancelled);
        assert_eq!(h.fakes.recorder.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(h.fakes.describer.exchange_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_follow_up_with_empty_recording_fails() {
        let h = harness(TaskSettings {
            max_recording: Duration::from_millis(30),
            ..fast_settings()
        });
        *h.fakes.recorder.audio.lock().unwrap() = AudioBytes::default();

        let report = match h.supervisor.press_follow_up(|| {}).unwrap() {
            FollowUpPress::Started(handle) => handle.wait().await.unwrap(),
            other => panic!("unexpected: {:?}", other),
        };

        assert_eq!(report.state, TaskState::Failed);
        assert_eq!(report.error, Some(TaskError::NothingRecorded));
        h.backend.wait_spoken_containing("could not understand").await;
    }

    #[tokio::test]
    async fn test_follow_up_press_during_capture_is_rejected() {
        let h = harness(fast_settings());
        h.fakes.set_describe_delay(Duration::from_millis(200));

        let handle = h.supervisor.start(TaskKind::Capture).unwrap();
        let press = h.supervisor.press_follow_up(|| {});

        assert!(matches!(press, Err(TaskError::AlreadyRunning)));
        handle.wait().await.unwrap();
    }
}
