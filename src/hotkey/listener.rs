//! Line-based hotkey listener
//!
//! Reads one key chord per line (for example `ctrl+m`) from a reader such as
//! stdin. An OS-level hotkey helper can pipe chords into the daemon this
//! way. Runs on a dedicated thread because the reads block.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::keys::KeyChord;

/// Events sent from the hotkey listener to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotkeyEvent {
    /// A chord was pressed
    Pressed(KeyChord),
    /// The input source reached end of file
    InputClosed,
}

/// Hotkey listener that turns input lines into [`HotkeyEvent`]s
pub struct HotkeyListener {
    event_tx: mpsc::Sender<HotkeyEvent>,
    running: Arc<AtomicBool>,
}

impl HotkeyListener {
    /// Create a new hotkey listener
    pub fn new(event_tx: mpsc::Sender<HotkeyEvent>) -> Self {
        Self {
            event_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start listening on stdin
    pub fn start(&self) -> Result<(), HotkeyError> {
        self.start_with(std::io::BufReader::new(std::io::stdin()))
    }

    /// Start listening on an arbitrary line reader.
    ///
    /// This spawns a dedicated thread that runs until the reader is
    /// exhausted, `stop()` is called, or the receiving side goes away.
    pub fn start_with<R>(&self, reader: R) -> Result<(), HotkeyError>
    where
        R: BufRead + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotkeyError::AlreadyRunning);
        }

        let event_tx = self.event_tx.clone();
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");

                if let Err(e) = read_chords(reader, &event_tx, &running) {
                    error!(?e, "hotkey listener error");
                }

                running.store(false, Ordering::SeqCst);
                info!("hotkey listener thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                HotkeyError::ThreadSpawn(e.to_string())
            })?;

        Ok(())
    }

    /// Stop the hotkey listener. A read already in progress finishes first.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Errors that can occur in the hotkey listener
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("failed to read hotkey input: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to send event to channel")]
    ChannelSend,
}

fn read_chords<R: BufRead>(
    reader: R,
    event_tx: &mpsc::Sender<HotkeyEvent>,
    running: &AtomicBool,
) -> Result<(), HotkeyError> {
    for line in reader.lines() {
        if !running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.parse::<KeyChord>() {
            Ok(chord) => {
                debug!(%chord, "chord pressed");
                // Not in an async context, so block on the bounded channel
                event_tx
                    .blocking_send(HotkeyEvent::Pressed(chord))
                    .map_err(|_| HotkeyError::ChannelSend)?;
            }
            Err(e) => {
                warn!(input = line, error = %e, "ignoring malformed chord");
            }
        }
    }

    let _ = event_tx.blocking_send(HotkeyEvent::InputClosed);
    Ok(())
}
