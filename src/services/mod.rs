//! External collaborators consumed by the task bodies
//!
//! The core only sees these traits. Concrete implementations shell out to
//! capture/record commands and call the Gemini REST API.

mod capture;
mod credentials;
mod gemini;
pub mod process;
mod recorder;

#[cfg(test)]
pub mod fake;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::task::{CancelToken, TaskError};

pub use capture::CommandCapture;
pub use credentials::{ApiKey, CredentialSource, KeyFileCredentials};
pub use gemini::GeminiClient;
pub use recorder::CommandRecorder;

/// Encoded screenshot (PNG)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageBytes(pub Vec<u8>);

/// Encoded microphone recording (WAV)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioBytes(pub Vec<u8>);

impl AudioBytes {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `Capture() -> ImageBytes | CaptureFailed`
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture(&self) -> Result<ImageBytes, TaskError>;
}

/// The AI request/response collaborator
#[async_trait]
pub trait Describer: Send + Sync {
    /// `Describe(ImageBytes, prompt) -> Text | DescribeFailed`
    async fn describe(&self, image: &ImageBytes, prompt: &str) -> Result<String, TaskError>;

    /// `Exchange(AudioBytes, ImageBytes) -> Text | DescribeFailed`
    async fn exchange(
        &self,
        audio: &AudioBytes,
        image: &ImageBytes,
        prompt: &str,
    ) -> Result<String, TaskError>;
}

/// `RecordAudio(maxDuration, stopSignal) -> AudioBytes`
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Record until `stop` fires or `max_duration` elapses, returning what
    /// was captured up to that point
    async fn record(
        &self,
        max_duration: Duration,
        stop: CancelToken,
    ) -> Result<AudioBytes, TaskError>;
}

/// Bundle of collaborators handed to the supervisor
#[derive(Clone)]
pub struct Services {
    pub capture: Arc<dyn ScreenCapture>,
    pub describer: Arc<dyn Describer>,
    pub recorder: Arc<dyn Recorder>,
}
