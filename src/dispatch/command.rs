//! Command vocabulary and the fixed chord binding table

use serde::{Deserialize, Serialize};

use crate::hotkey::{Key, KeyChord, ModifierState};

/// The complete set of user commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    StartCapture,
    StartOrSubmitFollowUp,
    StopSpeech,
    CancelTask,
    NextDetail,
    PreviousDetail,
    SetApiKey,
    Exit,
}

impl Command {
    /// Whether narration is interrupted before the command acts. A follow-up
    /// press orders its own interruption around the running session.
    pub fn interrupts_first(&self) -> bool {
        !matches!(self, Command::StartOrSubmitFollowUp)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::StartCapture => "start_capture",
            Command::StartOrSubmitFollowUp => "start_or_submit_follow_up",
            Command::StopSpeech => "stop_speech",
            Command::CancelTask => "cancel_task",
            Command::NextDetail => "next_detail",
            Command::PreviousDetail => "previous_detail",
            Command::SetApiKey => "set_api_key",
            Command::Exit => "exit",
        };
        write!(f, "{}", name)
    }
}

const BINDINGS: &[(KeyChord, Command)] = &[
    (KeyChord::new(ModifierState::CONTROL, Key::Char('m')), Command::StartCapture),
    (KeyChord::new(ModifierState::CONTROL, Key::Char('n')), Command::StartOrSubmitFollowUp),
    (KeyChord::new(ModifierState::CONTROL_SHIFT, Key::Char('s')), Command::StopSpeech),
    (KeyChord::new(ModifierState::CONTROL_SHIFT, Key::Char('x')), Command::CancelTask),
    (KeyChord::new(ModifierState::CONTROL, Key::Right), Command::NextDetail),
    (KeyChord::new(ModifierState::CONTROL, Key::Down), Command::NextDetail),
    (KeyChord::new(ModifierState::CONTROL, Key::Left), Command::PreviousDetail),
    (KeyChord::new(ModifierState::CONTROL, Key::Up), Command::PreviousDetail),
    (KeyChord::new(ModifierState::CONTROL_ALT, Key::Char('k')), Command::SetApiKey),
    (KeyChord::new(ModifierState::CONTROL_SHIFT, Key::Char('q')), Command::Exit),
];

/// Map a chord to its command. Unbound chords yield `None`.
pub fn route(chord: &KeyChord) -> Option<Command> {
    BINDINGS
        .iter()
        .find(|(bound, _)| bound == chord)
        .map(|(_, command)| *command)
}
