//! Programmable collaborators for tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    AudioBytes, CredentialSource, Describer, ImageBytes, Recorder, ScreenCapture, Services,
};
use crate::speech::{Cue, CuePlayer, NarrationBackend, SpeechError};
use crate::task::{CancelToken, TaskError};

/// Screen capture returning fixed bytes or a fixed error
pub struct FakeCapture {
    pub result: Mutex<Result<ImageBytes, TaskError>>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl ScreenCapture for FakeCapture {
    async fn capture(&self) -> Result<ImageBytes, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.lock().unwrap().clone()
    }
}

/// Describer that answers after a configurable delay
pub struct FakeDescriber {
    pub delay: Mutex<Duration>,
    pub result: Mutex<Result<String, TaskError>>,
    pub describe_calls: AtomicUsize,
    pub exchange_calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeDescriber {
    async fn answer(&self, prompt: &str) -> Result<String, TaskError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let delay = *self.delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.result.lock().unwrap().clone()
    }
}

#[async_trait]
impl Describer for FakeDescriber {
    async fn describe(&self, _image: &ImageBytes, prompt: &str) -> Result<String, TaskError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(prompt).await
    }

    async fn exchange(
        &self,
        _audio: &AudioBytes,
        _image: &ImageBytes,
        prompt: &str,
    ) -> Result<String, TaskError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.answer(prompt).await
    }
}

/// Recorder that "records" until stopped or the limit elapses
pub struct FakeRecorder {
    pub audio: Mutex<AudioBytes>,
    pub calls: AtomicUsize,
    pub stopped: AtomicUsize,
}

#[async_trait]
impl Recorder for FakeRecorder {
    async fn record(
        &self,
        max_duration: Duration,
        stop: CancelToken,
    ) -> Result<AudioBytes, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::select! {
            _ = stop.cancelled() => {
                self.stopped.fetch_add(1, Ordering::SeqCst);
            }
            _ = tokio::time::sleep(max_duration) => {}
        }
        Ok(self.audio.lock().unwrap().clone())
    }
}

/// Credential source with a fixed answer
pub struct FakeCredentials {
    pub found: Mutex<bool>,
    pub reloads: AtomicUsize,
}

#[async_trait]
impl CredentialSource for FakeCredentials {
    async fn reload(&self) -> anyhow::Result<bool> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(*self.found.lock().unwrap())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// All fakes together, with handles kept for assertions
pub struct Fakes {
    pub capture: Arc<FakeCapture>,
    pub describer: Arc<FakeDescriber>,
    pub recorder: Arc<FakeRecorder>,
    pub credentials: Arc<FakeCredentials>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            capture: Arc::new(FakeCapture {
                result: Mutex::new(Ok(ImageBytes(b"png".to_vec()))),
                calls: AtomicUsize::new(0),
            }),
            describer: Arc::new(FakeDescriber {
                delay: Mutex::new(Duration::from_millis(10)),
                result: Mutex::new(Ok("A desktop. Two windows. A clock.".to_string())),
                describe_calls: AtomicUsize::new(0),
                exchange_calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }),
            recorder: Arc::new(FakeRecorder {
                audio: Mutex::new(AudioBytes(b"wav".to_vec())),
                calls: AtomicUsize::new(0),
                stopped: AtomicUsize::new(0),
            }),
            credentials: Arc::new(FakeCredentials {
                found: Mutex::new(true),
                reloads: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_describe_delay(&self, delay: Duration) {
        *self.describer.delay.lock().unwrap() = delay;
    }

    pub fn services(&self) -> Services {
        Services {
            capture: self.capture.clone(),
            describer: self.describer.clone(),
            recorder: self.recorder.clone(),
        }
    }
}

/// Narration backend that logs start/end of each utterance
pub struct ScriptedBackend {
    name: String,
    duration: Duration,
    log: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn instant(name: &str) -> Arc<Self> {
        Self::with_duration(name, Duration::ZERO)
    }

    pub fn with_duration(name: &str, duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            duration,
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Texts whose rendering started
    pub fn spoken(&self) -> Vec<String> {
        self.log()
            .iter()
            .filter_map(|entry| entry.strip_prefix("start:"))
            .map(str::to_string)
            .collect()
    }

    pub async fn wait_started(&self, text: &str) {
        let wanted = format!("start:{}", text);
        while !self.log().contains(&wanted) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn wait_spoken_containing(&self, fragment: &str) -> String {
        loop {
            if let Some(text) = self.spoken().into_iter().find(|t| t.contains(fragment)) {
                return text;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl NarrationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn speak(&self, text: &str, stop: &CancelToken) -> Result<(), SpeechError> {
        self.log.lock().unwrap().push(format!("start:{}", text));
        tokio::select! {
            _ = stop.cancelled() => {
                self.log.lock().unwrap().push(format!("interrupted:{}", text));
                Err(SpeechError::Interrupted)
            }
            _ = tokio::time::sleep(self.duration) => {
                self.log.lock().unwrap().push(format!("end:{}", text));
                Ok(())
            }
        }
    }
}

/// Narration backend that always fails
pub struct FailingBackend {
    name: String,
    attempts: AtomicUsize,
}

impl FailingBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NarrationBackend for FailingBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn speak(&self, _text: &str, _stop: &CancelToken) -> Result<(), SpeechError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SpeechError::BackendFailed {
            backend: self.name.clone(),
            reason: "no audio device".to_string(),
        })
    }
}

/// Cue player that remembers what it played
#[derive(Default)]
pub struct RecordedCues {
    played: Mutex<Vec<Cue>>,
}

impl RecordedCues {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn played(&self) -> Vec<Cue> {
        self.played.lock().unwrap().clone()
    }

    pub async fn wait_played(&self, cue: Cue) {
        while !self.played().contains(&cue) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl CuePlayer for RecordedCues {
    async fn play(&self, cue: Cue) -> Result<(), SpeechError> {
        self.played.lock().unwrap().push(cue);
        Ok(())
    }
}
