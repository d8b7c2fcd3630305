//! vision-assist-daemon: screen narration assistant for blind and low-vision users
//!
//! This daemon provides:
//! - Key chord commands, read from stdin or injected over IPC
//! - Screen capture described by Gemini, narrated as a summary plus
//!   navigable detail chunks
//! - Spoken follow-up questions answered against the current screen
//! - A single narration stream that user actions can interrupt
//! - IPC server for status queries and lifecycle notifications
//!
//! At most one capture or follow-up task runs at a time; it can be cancelled
//! at any point without blocking the command path.

mod config;
mod dispatch;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod logging;
mod navigator;
mod services;
mod speech;
mod task;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::events::LifecycleEvent;
use crate::hotkey::HotkeyListener;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::navigator::DetailNavigator;
use crate::services::{
    ApiKey, CommandCapture, CommandRecorder, CredentialSource, GeminiClient, KeyFileCredentials,
    Services,
};
use crate::speech::{
    BackendChain, CommandBackend, ConsoleBackend, CuePlayer, NarrationBackend, SpeechCoordinator,
    TerminalBell, ToneCommand,
};
use crate::task::{TaskState, TaskSupervisor};

/// Longest wait for the goodbye narration before the process exits
const FAREWELL_LIMIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging into the data directory
    let data_dir = config::data_dir()?;
    let log_path = logging::init(&data_dir);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "vision-assist-daemon starting"
    );

    // Load configuration
    let config = Config::load(data_dir)?;
    config.ensure_dirs()?;
    info!(
        path = %config.config_path.display(),
        socket = ?config.socket_path,
        model = %config.model,
        "configuration loaded"
    );

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Hotkey listener and IPC key presses -> dispatcher
    let (hotkey_tx, hotkey_rx) = mpsc::channel(32);
    // Supervisor, speech and dispatcher -> IPC subscribers and the event log
    let (event_tx, _event_rx) = broadcast::channel::<LifecycleEvent>(64);

    // Bind first so a second instance fails before it makes any noise
    let server = Server::new(&config.socket_path, event_tx.clone(), hotkey_tx.clone())?;

    let api_key = ApiKey::default();
    let credentials = Arc::new(KeyFileCredentials::new(
        config.api_key_file.clone(),
        api_key.clone(),
    ));
    match credentials.reload().await {
        Ok(true) => {}
        Ok(false) => warn!(
            location = %credentials.location(),
            "no Gemini API key yet, set GEMINI_API_KEY or write the key file and press control alt K"
        ),
        Err(e) => error!(?e, "failed to read API key"),
    }

    let services = Services {
        capture: Arc::new(CommandCapture::new(config.capture_command.clone())),
        describer: Arc::new(GeminiClient::new(config.model.clone(), api_key)?),
        recorder: Arc::new(CommandRecorder::new(config.record_command.clone())),
    };

    // Configured backends first, the console always last
    let mut backends: Vec<Arc<dyn NarrationBackend>> = config
        .speech_backends
        .iter()
        .map(|backend| {
            Arc::new(CommandBackend::new(backend.name.clone(), backend.command.clone()))
                as Arc<dyn NarrationBackend>
        })
        .collect();
    backends.push(Arc::new(ConsoleBackend));

    let cues: Arc<dyn CuePlayer> = match &config.cue_command {
        Some(command) => Arc::new(ToneCommand::new(command.clone())),
        None => Arc::new(TerminalBell),
    };

    let speech = SpeechCoordinator::new(BackendChain::new(backends), cues, event_tx.clone());
    tokio::spawn(speech.clone().run());

    let navigator = DetailNavigator::new();
    let supervisor = TaskSupervisor::new(
        services,
        speech.clone(),
        navigator.clone(),
        event_tx.clone(),
        config.task_settings(),
    );
    supervisor.on_completion(|report| match (&report.state, &report.error) {
        (TaskState::Failed, Some(e)) => warn!(
            task_id = report.id,
            kind = %report.kind,
            error = %e,
            "task failed, user was told"
        ),
        (state, _) => info!(
            task_id = report.id,
            kind = %report.kind,
            %state,
            secs = report.duration.as_secs_f32(),
            "task report"
        ),
    });

    let dispatcher = Dispatcher::new(supervisor, speech, navigator, credentials, event_tx.clone());

    // Create the hotkey listener (runs on dedicated thread)
    let hotkey_listener = HotkeyListener::new(hotkey_tx);
    match hotkey_listener.start() {
        Ok(()) => {
            info!("hotkey listener started");
        }
        Err(e) => {
            error!(?e, "failed to start hotkey listener");
            warn!("continuing with IPC key presses only");
        }
    }

    // Subscribe to lifecycle events for logging and IPC status
    let mut lifecycle_rx = event_tx.subscribe();

    dispatcher.greet(log_path.as_deref());
    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the dispatcher (processes hotkey events until Exit)
        _ = dispatcher.run(hotkey_rx) => {
            info!("exit requested");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Log lifecycle events and keep the IPC status current
        _ = async {
            loop {
                match lifecycle_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "lifecycle event");
                        server.apply_event(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "lifecycle event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("lifecycle event handler exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    hotkey_listener.stop();
    dispatcher.farewell(FAREWELL_LIMIT).await;
    server.shutdown().await;

    info!("vision-assist-daemon stopped");

    Ok(())
}
