//! Speech coordination
//!
//! All narration flows through one [`SpeechCoordinator`], which renders
//! requests strictly one at a time through an ordered chain of
//! [`NarrationBackend`]s and lets user actions interrupt whatever is playing.
//! Short tone [`Cue`]s mark milestones beside the narration.

mod backend;
mod coordinator;
mod cue;
mod request;

pub use backend::{BackendChain, CommandBackend, ConsoleBackend, NarrationBackend};
pub use coordinator::SpeechCoordinator;
pub use cue::{Cue, CuePlayer, TerminalBell, ToneCommand};
pub use request::SpeechRequest;

/// Errors produced while rendering narration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpeechError {
    #[error("narration backend `{backend}` failed: {reason}")]
    BackendFailed { backend: String, reason: String },

    #[error("narration was interrupted")]
    Interrupted,

    #[error("all narration backends failed")]
    AllBackendsFailed,
}
