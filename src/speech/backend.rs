//! Narration backends and the ordered fallback chain

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::services::process::{run_command, CommandSpec};
use crate::task::CancelToken;

use super::SpeechError;

/// Something that can render text as audio
#[async_trait]
pub trait NarrationBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Render `text`, returning when playback finished or `stop` fired.
    /// A stopped rendering reports [`SpeechError::Interrupted`].
    async fn speak(&self, text: &str, stop: &CancelToken) -> Result<(), SpeechError>;
}

/// Text-to-speech through an external program that reads text on stdin
pub struct CommandBackend {
    name: String,
    command: CommandSpec,
}

impl CommandBackend {
    pub fn new(name: impl Into<String>, command: CommandSpec) -> Self {
        Self {
            name: name.into(),
            command,
        }
    }
}

#[async_trait]
impl NarrationBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn speak(&self, text: &str, stop: &CancelToken) -> Result<(), SpeechError> {
        let output = run_command(&self.command, Some(text.as_bytes().to_vec()), stop)
            .await
            .map_err(|e| SpeechError::BackendFailed {
                backend: self.name.clone(),
                reason: e.to_string(),
            })?;

        if output.stopped {
            return Err(SpeechError::Interrupted);
        }
        if !output.status.success() {
            return Err(SpeechError::BackendFailed {
                backend: self.name.clone(),
                reason: format!("{} ({})", output.status, output.stderr_text()),
            });
        }
        Ok(())
    }
}

/// Last-resort backend that prints narration to the terminal
pub struct ConsoleBackend;

#[async_trait]
impl NarrationBackend for ConsoleBackend {
    fn name(&self) -> &str {
        "console"
    }

    async fn speak(&self, text: &str, stop: &CancelToken) -> Result<(), SpeechError> {
        if stop.is_cancelled() {
            return Err(SpeechError::Interrupted);
        }
        println!("[speech] {}", text);
        Ok(())
    }
}

/// Backends tried in a fixed order until one renders the text
#[derive(Clone, Default)]
pub struct BackendChain {
    backends: Vec<Arc<dyn NarrationBackend>>,
}

impl BackendChain {
    pub fn new(backends: Vec<Arc<dyn NarrationBackend>>) -> Self {
        Self { backends }
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Render `text` with the first backend that succeeds.
    ///
    /// Returns the name of the backend that rendered it. An interruption
    /// stops the chain instead of falling through to the next backend.
    pub async fn speak(&self, text: &str, stop: &CancelToken) -> Result<String, SpeechError> {
        for backend in &self.backends {
            if stop.is_cancelled() {
                return Err(SpeechError::Interrupted);
            }
            match backend.speak(text, stop).await {
                Ok(()) => {
                    debug!(backend = backend.name(), "narration rendered");
                    return Ok(backend.name().to_string());
                }
                Err(SpeechError::Interrupted) => return Err(SpeechError::Interrupted),
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "narration backend failed, trying next");
                }
            }
        }

        if stop.is_cancelled() {
            return Err(SpeechError::Interrupted);
        }
        error!(backends = self.backends.len(), "all narration backends failed");
        Err(SpeechError::AllBackendsFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fake::{FailingBackend, ScriptedBackend};

    #[tokio::test]
    async fn test_falls_back_in_order() {
        let primary = Arc::new(FailingBackend::new("primary"));
        let secondary = ScriptedBackend::instant("secondary");
        let chain = BackendChain::new(vec![
            primary.clone() as Arc<dyn NarrationBackend>,
            secondary.clone(),
        ]);

        let used = chain.speak("hello", &CancelToken::new()).await.unwrap();

        assert_eq!(used, "secondary");
        assert_eq!(primary.attempts(), 1);
        assert_eq!(secondary.spoken(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_all_failed_is_reported() {
        let chain = BackendChain::new(vec![
            Arc::new(FailingBackend::new("a")) as Arc<dyn NarrationBackend>,
            Arc::new(FailingBackend::new("b")),
        ]);
        let result = chain.speak("hello", &CancelToken::new()).await;
        assert_eq!(result, Err(SpeechError::AllBackendsFailed));
    }

    #[tokio::test]
    async fn test_interrupted_chain_does_not_fall_through() {
        let fallback = ScriptedBackend::instant("fallback");
        let chain = BackendChain::new(vec![
            Arc::new(ConsoleBackend) as Arc<dyn NarrationBackend>,
            fallback.clone(),
        ]);
        let stop = CancelToken::new();
        stop.cancel();

        let result = chain.speak("hello", &stop).await;

        assert_eq!(result, Err(SpeechError::Interrupted));
        assert!(fallback.spoken().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_backend_failure_reason() {
        let backend = CommandBackend::new("broken", CommandSpec::new("sh", &["-c", "exit 1"]));
        let result = backend.speak("hi", &CancelToken::new()).await;
        assert!(matches!(result, Err(SpeechError::BackendFailed { .. })));
    }
}
