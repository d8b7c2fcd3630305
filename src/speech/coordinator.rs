//! Single-stream narration queue with interruption
//!
//! Producers enqueue from any task; one drain loop renders requests one at a
//! time, so narration never overlaps itself. Cues play in order on a second
//! loop started alongside it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tracing::{debug, error, info, warn};

use crate::events::{self, LifecycleEvent};
use crate::task::CancelToken;

use super::backend::BackendChain;
use super::cue::{Cue, CuePlayer};
use super::request::{Priority, SpeechRequest};
use super::SpeechError;

/// Pending requests plus the utterance currently rendering
#[derive(Default)]
pub(super) struct SpeechQueue {
    pending: VecDeque<SpeechRequest>,
    current: Option<Utterance>,
}

struct Utterance {
    stop: CancelToken,
    interruptible: bool,
}

impl SpeechQueue {
    /// Place a request according to its priority. Returns the request back
    /// when it was dropped.
    fn push(&mut self, request: SpeechRequest) -> Option<SpeechRequest> {
        match request.priority {
            // Ticks only fill silence; anything already queued or playing
            // makes them stale
            Priority::Tick => {
                if self.current.is_some() || !self.pending.is_empty() {
                    return Some(request);
                }
                self.pending.push_back(request);
            }
            Priority::Error => {
                let at = self
                    .pending
                    .iter()
                    .position(|queued| queued.priority == Priority::Tick)
                    .unwrap_or(self.pending.len());
                self.pending.insert(at, request);
            }
            _ => self.pending.push_back(request),
        }
        None
    }

    /// Take the next request to render. Starting any non-tick narration
    /// discards ticks still waiting behind it.
    fn pop(&mut self) -> (Option<SpeechRequest>, Vec<SpeechRequest>) {
        let next = self.pending.pop_front();
        let mut stale = Vec::new();
        if matches!(&next, Some(request) if request.priority != Priority::Tick) {
            let (ticks, rest): (VecDeque<_>, VecDeque<_>) = self
                .pending
                .drain(..)
                .partition(|queued| queued.priority == Priority::Tick);
            self.pending = rest;
            stale.extend(ticks);
        }
        (next, stale)
    }

    /// Drop interruptible pending requests and stop the current utterance
    /// if it may be interrupted
    fn interrupt(&mut self) -> Vec<SpeechRequest> {
        let (dropped, kept): (VecDeque<_>, VecDeque<_>) =
            self.pending.drain(..).partition(|queued| queued.interruptible);
        self.pending = kept;

        if let Some(current) = &self.current {
            if current.interruptible {
                current.stop.cancel();
            }
        }
        dropped.into_iter().collect()
    }

    #[cfg(test)]
    fn texts(&self) -> Vec<&str> {
        self.pending.iter().map(|r| r.text.as_str()).collect()
    }
}

/// A cue waiting to play, with an optional completion signal
struct CueJob {
    cue: Cue,
    done: Option<oneshot::Sender<()>>,
}

struct Inner {
    queue: Mutex<SpeechQueue>,
    wake: Notify,
    backends: BackendChain,
    cues: Arc<dyn CuePlayer>,
    cue_tx: mpsc::UnboundedSender<CueJob>,
    cue_rx: Mutex<Option<mpsc::UnboundedReceiver<CueJob>>>,
    event_tx: broadcast::Sender<LifecycleEvent>,
}

/// Handle to the narration queue. Cheap to clone.
#[derive(Clone)]
pub struct SpeechCoordinator {
    inner: Arc<Inner>,
}

impl SpeechCoordinator {
    pub fn new(
        backends: BackendChain,
        cues: Arc<dyn CuePlayer>,
        event_tx: broadcast::Sender<LifecycleEvent>,
    ) -> Self {
        let (cue_tx, cue_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(SpeechQueue::default()),
                wake: Notify::new(),
                backends,
                cues,
                cue_tx,
                cue_rx: Mutex::new(Some(cue_rx)),
                event_tx,
            }),
        }
    }

    /// Play a cue without waiting for it
    pub fn cue(&self, cue: Cue) {
        if self.inner.cue_tx.send(CueJob { cue, done: None }).is_err() {
            debug!(?cue, "cue player gone, cue skipped");
        }
    }

    /// Play a cue and wait until it has sounded
    pub async fn cue_and_wait(&self, cue: Cue) {
        let (done_tx, done_rx) = oneshot::channel();
        let job = CueJob {
            cue,
            done: Some(done_tx),
        };
        if self.inner.cue_tx.send(job).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Queue a request for narration without waiting for it
    pub fn enqueue(&self, request: SpeechRequest) {
        let dropped = self.lock().push(request);
        match dropped {
            Some(tick) => {
                debug!(text = %tick.text, "stale tick dropped");
                tick.complete(Err(SpeechError::Interrupted));
            }
            None => self.inner.wake.notify_one(),
        }
    }

    /// Queue a request and wait until it has been rendered, interrupted or
    /// discarded
    pub async fn say_and_wait(&self, mut request: SpeechRequest) -> Result<(), SpeechError> {
        let (done_tx, done_rx) = oneshot::channel();
        request.done = Some(done_tx);
        self.enqueue(request);
        done_rx.await.unwrap_or(Err(SpeechError::Interrupted))
    }

    /// Stop the current utterance and clear queued interruptible requests
    pub fn interrupt_all(&self) {
        let dropped = self.lock().interrupt();
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "queued narration cleared");
        }
        for request in dropped {
            request.complete(Err(SpeechError::Interrupted));
        }
    }

    /// Whether an utterance is rendering right now
    pub fn is_speaking(&self) -> bool {
        self.lock().current.is_some()
    }

    /// Drain the queue forever, one utterance at a time
    pub async fn run(self) {
        info!(backends = self.inner.backends.len(), "speech coordinator started");

        let cue_rx = self
            .inner
            .cue_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(cue_rx) = cue_rx {
            tokio::spawn(play_cues(Arc::clone(&self.inner.cues), cue_rx));
        }

        loop {
            let next = {
                let mut queue = self.lock();
                let (next, stale) = queue.pop();
                for tick in stale {
                    tick.complete(Err(SpeechError::Interrupted));
                }
                next.map(|request| {
                    let stop = CancelToken::new();
                    queue.current = Some(Utterance {
                        stop: stop.clone(),
                        interruptible: request.interruptible,
                    });
                    (request, stop)
                })
            };

            let Some((request, stop)) = next else {
                self.inner.wake.notified().await;
                continue;
            };

            debug!(priority = ?request.priority, text = %request.text, "narrating");
            let outcome = self.inner.backends.speak(&request.text, &stop).await;
            self.lock().current = None;

            let outcome = match outcome {
                Ok(_) => Ok(()),
                Err(SpeechError::Interrupted) => {
                    debug!("narration interrupted");
                    Err(SpeechError::Interrupted)
                }
                Err(e) => {
                    error!(error = %e, text = %request.text, "narration failed");
                    events::notify(
                        &self.inner.event_tx,
                        LifecycleEvent::SpeechFailed {
                            reason: e.to_string(),
                        },
                    );
                    Err(e)
                }
            };
            request.complete(outcome);
        }
    }

    fn lock(&self) -> MutexGuard<'_, SpeechQueue> {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn play_cues(player: Arc<dyn CuePlayer>, mut cue_rx: mpsc::UnboundedReceiver<CueJob>) {
    while let Some(job) = cue_rx.recv().await {
        if let Err(e) = player.play(job.cue).await {
            warn!(cue = ?job.cue, error = %e, "cue failed");
        }
        if let Some(done) = job.done {
            let _ = done.send(());
        }
    }
}
