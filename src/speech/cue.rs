//! Short audio cues
//!
//! Cues are tone patterns that mark task milestones without words. They play
//! on their own ordered stream beside narration, so a cue never waits behind
//! a long utterance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::services::process::{run_command, CommandSpec};
use crate::task::CancelToken;

use super::SpeechError;

/// Silence between the tones of one pattern
const TONE_GAP: Duration = Duration::from_millis(40);

/// One tone of a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tone {
    pub freq_hz: u32,
    pub duration_ms: u32,
}

const fn tone(freq_hz: u32, duration_ms: u32) -> Tone {
    Tone {
        freq_hz,
        duration_ms,
    }
}

/// Task milestones that get a cue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cue {
    /// A command was refused because a task is running
    Rejected,
    CaptureStarted,
    FollowUpStarted,
    /// Screenshot taken, waiting on the describer
    Processing,
    /// A description or answer is about to be narrated
    ResultReady,
    /// The microphone is about to open
    RecordingStarted,
    /// A press asked to send the question
    SubmitPressed,
    /// The microphone closed
    RecordingStopped,
    SpeechStopped,
    Cancelled,
    Failed,
    KeyReload,
    KeyUpdated,
}

impl Cue {
    /// The tone pattern for this cue
    pub fn tones(self) -> &'static [Tone] {
        match self {
            Cue::Rejected => const { &[tone(420, 90), tone(380, 90)] },
            Cue::CaptureStarted => const { &[tone(740, 60), tone(900, 70)] },
            Cue::FollowUpStarted => const { &[tone(760, 60), tone(1040, 80)] },
            Cue::Processing => const { &[tone(1100, 70)] },
            Cue::ResultReady => const { &[tone(1250, 90), tone(1500, 120)] },
            Cue::RecordingStarted => const { &[tone(1320, 140), tone(1560, 170)] },
            Cue::SubmitPressed => const { &[tone(980, 90), tone(1180, 110)] },
            Cue::RecordingStopped => const { &[tone(900, 80), tone(1060, 100)] },
            Cue::SpeechStopped => const { &[tone(500, 70), tone(420, 90)] },
            Cue::Cancelled => const { &[tone(460, 70), tone(390, 90), tone(320, 110)] },
            Cue::Failed => const { &[tone(420, 90), tone(380, 90), tone(340, 90)] },
            Cue::KeyReload => const { &[tone(950, 70), tone(1200, 90)] },
            Cue::KeyUpdated => const { &[tone(1200, 90), tone(1450, 120)] },
        }
    }
}

/// Something that can play a cue
#[async_trait]
pub trait CuePlayer: Send + Sync {
    /// Play `cue`, returning once the whole pattern has sounded
    async fn play(&self, cue: Cue) -> Result<(), SpeechError>;
}

/// Rings the terminal bell once per cue
pub struct TerminalBell;

#[async_trait]
impl CuePlayer for TerminalBell {
    async fn play(&self, cue: Cue) -> Result<(), SpeechError> {
        use std::io::Write;

        let mut stderr = std::io::stderr();
        stderr
            .write_all(b"\x07")
            .and_then(|_| stderr.flush())
            .map_err(|e| SpeechError::BackendFailed {
                backend: "bell".to_string(),
                reason: e.to_string(),
            })?;
        debug!(?cue, "bell rung");
        Ok(())
    }
}

/// Plays each tone through an external synthesizer.
///
/// `{freq}` and `{secs}` in the arguments are replaced per tone, so the sox
/// form is `play -q -n synth {secs} sine {freq}`. If the program cannot be
/// started at all, every later cue rings the terminal bell instead.
pub struct ToneCommand {
    command: CommandSpec,
    unavailable: AtomicBool,
}

impl ToneCommand {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            unavailable: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CuePlayer for ToneCommand {
    async fn play(&self, cue: Cue) -> Result<(), SpeechError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return TerminalBell.play(cue).await;
        }

        for (i, tone) in cue.tones().iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(TONE_GAP).await;
            }
            let spec = tone_command(&self.command, *tone);
            match run_command(&spec, None, &CancelToken::new()).await {
                Ok(output) if output.succeeded() => {}
                Ok(output) => {
                    return Err(SpeechError::BackendFailed {
                        backend: self.command.program.clone(),
                        reason: format!("{} ({})", output.status, output.stderr_text()),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "tone command unavailable, using the terminal bell for cues");
                    self.unavailable.store(true, Ordering::Relaxed);
                    return TerminalBell.play(cue).await;
                }
            }
        }
        Ok(())
    }
}

fn tone_command(template: &CommandSpec, tone: Tone) -> CommandSpec {
    let freq = tone.freq_hz.to_string();
    let secs = format!("{:.3}", f64::from(tone.duration_ms) / 1000.0);
    CommandSpec {
        program: template.program.clone(),
        args: template
            .args
            .iter()
            .map(|arg| arg.replace("{freq}", &freq).replace("{secs}", &secs))
            .collect(),
    }
}
