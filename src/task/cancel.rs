//! Cooperative cancellation shared between the supervisor and a task body
//!
//! A token starts Active and can only move to Cancelled. Task bodies call
//! [`CancelToken::checkpoint`] at every suspension point and race blocking
//! collaborator calls against [`CancelToken::guard`].

use std::future::Future;

use tokio_util::sync::CancellationToken;

use super::TaskError;

/// One-way cancellation flag for a single task lifetime
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    /// Create a fresh, active token
    pub fn new() -> Self {
        Self {
            inner: CancellationToken::new(),
        }
    }

    /// Request cancellation. Repeated calls have no further effect.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }

    /// Fail with [`TaskError::Cancelled`] if cancellation was requested
    pub fn checkpoint(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Race a collaborator call against cancellation.
    ///
    /// The call is dropped as soon as the token fires; whatever it would
    /// have produced is discarded. A call that completes concurrently with
    /// cancellation is still reported as cancelled.
    pub async fn guard<F, T>(&self, call: F) -> Result<T, TaskError>
    where
        F: Future<Output = Result<T, TaskError>>,
    {
        let result = tokio::select! {
            biased;
            _ = self.inner.cancelled() => return Err(TaskError::Cancelled),
            result = call => result,
        };
        self.checkpoint()?;
        result
    }

    /// A child token that is cancelled together with this one
    pub fn child(&self) -> CancelToken {
        CancelToken {
            inner: self.inner.child_token(),
        }
    }
}
