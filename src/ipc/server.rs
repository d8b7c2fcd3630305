//! Unix domain socket server for IPC
//!
//! Provides request-response communication, key press injection and push
//! notifications of lifecycle events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::dispatch::route;
use crate::events::LifecycleEvent;
use crate::hotkey::{HotkeyEvent, KeyChord};

use super::protocol::{DaemonStatus, Notification, Request, Response, MAX_FRAME_LEN};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
    /// Source of notifications for subscribed clients
    event_tx: broadcast::Sender<LifecycleEvent>,
    /// Injected key presses go to the dispatcher through this channel
    hotkey_tx: mpsc::Sender<HotkeyEvent>,
}

/// Shared server state
struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
}

impl ServerState {
    fn snapshot(&self) -> DaemonStatus {
        let mut status = self.status.clone();
        status.uptime_secs = self.start_time.elapsed().as_secs();
        status
    }
}

/// Per-client handles cloned out of the server
#[derive(Clone)]
struct ClientContext {
    state: Arc<RwLock<ServerState>>,
    event_tx: broadcast::Sender<LifecycleEvent>,
    hotkey_tx: mpsc::Sender<HotkeyEvent>,
}

impl Server {
    /// Bind the socket. Fails if another daemon is already listening on it;
    /// a stale socket file is removed.
    pub fn new(
        socket_path: &Path,
        event_tx: broadcast::Sender<LifecycleEvent>,
        hotkey_tx: mpsc::Sender<HotkeyEvent>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        if socket_path.exists() {
            if std::os::unix::net::UnixStream::connect(socket_path).is_ok() {
                bail!(
                    "another instance is already running (socket {} is live)",
                    socket_path.display()
                );
            }
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
            debug!(?socket_path, "stale socket removed");
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            status: DaemonStatus::default(),
            start_time: std::time::Instant::now(),
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            state,
            shutdown_tx,
            event_tx,
            hotkey_tx,
        })
    }

    /// Fold a lifecycle event into the status served to clients
    pub async fn apply_event(&self, event: &LifecycleEvent) {
        self.state.write().await.status.apply(event);
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = ClientContext {
                        state: Arc::clone(&self.state),
                        event_tx: self.event_tx.clone(),
                        hotkey_tx: self.hotkey_tx.clone(),
                    };
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Serve one client. Frames are read on a separate task so that a pending
/// read is never torn by a notification being pushed.
async fn handle_client(stream: UnixStream, context: ClientContext) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();
    let (request_tx, mut request_rx) = mpsc::channel::<Result<Request>>(8);

    let read_loop = tokio::spawn(async move {
        loop {
            let frame = match read_frame(&mut reader).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("client disconnected");
                    return;
                }
                Err(e) => {
                    let _ = request_tx.send(Err(e)).await;
                    return;
                }
            };
            let request = serde_json::from_slice(&frame).context("failed to parse request");
            if request_tx.send(request).await.is_err() {
                return;
            }
        }
    });

    let mut notifications: Option<broadcast::Receiver<LifecycleEvent>> = None;

    let result = loop {
        tokio::select! {
            request = request_rx.recv() => {
                let request = match request {
                    Some(Ok(request)) => request,
                    Some(Err(e)) => break Err(e),
                    None => break Ok(()),
                };
                debug!(?request, "received request");

                let response = process_request(request, &context).await;
                if response == Response::Subscribed && notifications.is_none() {
                    debug!("client subscribed to notifications");
                    notifications = Some(context.event_tx.subscribe());
                }
                if let Err(e) = send_message(&mut writer, &response).await {
                    break Err(e);
                }
            }
            event = recv_notification(&mut notifications), if notifications.is_some() => {
                match event {
                    Ok(event) => {
                        let note = Notification::Lifecycle { event };
                        if let Err(e) = send_message(&mut writer, &note).await {
                            break Err(e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        notifications = None;
                    }
                }
            }
        }
    };

    read_loop.abort();
    result
}

async fn recv_notification(
    notifications: &mut Option<broadcast::Receiver<LifecycleEvent>>,
) -> Result<LifecycleEvent, broadcast::error::RecvError> {
    match notifications {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Read one length-prefixed frame. `None` on a clean end of stream.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        bail!("message too large ({} bytes)", len);
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Send a length-prefixed JSON message
async fn send_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

/// Process a request and return a response
async fn process_request(request: Request, context: &ClientContext) -> Response {
    match request {
        Request::Ping => Response::Pong,

        Request::GetStatus => Response::Status(context.state.read().await.snapshot()),

        Request::Subscribe => Response::Subscribed,

        Request::KeyPress { chord } => {
            let chord = match chord.parse::<KeyChord>() {
                Ok(chord) => chord,
                Err(e) => return Response::error("invalid_chord", e.to_string()),
            };
            // Never wait on the dispatcher
            match context.hotkey_tx.try_send(HotkeyEvent::Pressed(chord)) {
                Ok(()) => Response::Accepted {
                    command: route(&chord),
                },
                Err(mpsc::error::TrySendError::Full(_)) => {
                    Response::error("busy", "dispatcher queue is full")
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    Response::error("unavailable", "dispatcher is not running")
                }
            }
        }
    }
}
