//! Unix domain socket server for IPC
//!
//! Provides request-response communication with the voice controller and push
//! notifications of voice events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::lifecycle::ShutdownSignal;
use crate::voice::{ControllerClosed, ControllerHandle, ScopedTask};

use super::protocol::{
    read_frame, write_frame, DaemonStatus, FrameError, Notification, Outgoing, Request, Response,
};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<ServerState>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared server state
struct ServerState {
    start_time: Instant,
    controller: ControllerHandle,
    shutdown: ShutdownSignal,
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        controller: ControllerHandle,
        shutdown: ShutdownSignal,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path)
            .context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(ServerState {
            start_time: Instant::now(),
            controller,
            shutdown,
        });

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref()
            .context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state) => {
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

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, state: Arc<ServerState>) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        // responses and notifications share one writer so frames never interleave
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let _writer = ScopedTask::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = write_frame(&mut writer, &msg).await {
                    debug!(?e, "client write failed");
                    break;
                }
            }
        });
        let mut subscription: Option<ScopedTask> = None;

        loop {
            let request: Request = match read_frame(&mut reader).await {
                Ok(Some(request)) => request,
                Ok(None) => {
                    debug!("client disconnected");
                    return Ok(());
                }
                Err(FrameError::TooLarge(len)) => {
                    warn!(len, "message too large, disconnecting");
                    return Ok(());
                }
                Err(FrameError::Decode(e)) => {
                    warn!(%e, "failed to parse request");
                    let _ = out_tx.send(Outgoing::Response(Response::error(
                        "invalid_request",
                        e.to_string(),
                    )));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            debug!(?request, "received request");

            // Process request
            let (response, subscribe) = Self::process_request(request, &state).await;
            if out_tx.send(Outgoing::Response(response)).is_err() {
                return Ok(());
            }

            // after the ack, so no event frame can precede it
            if subscribe && subscription.is_none() {
                subscription = Some(Self::forward_events(&state.controller, out_tx.clone()));
                debug!("client subscribed to notifications");
            }
        }
    }

    /// Push every voice event to a subscribed client
    fn forward_events(
        controller: &ControllerHandle,
        out_tx: mpsc::UnboundedSender<Outgoing>,
    ) -> ScopedTask {
        let mut events = controller.subscribe();
        ScopedTask::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let msg = Outgoing::Notification(Notification::Event { event });
                        if out_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber lagged behind voice events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(request: Request, state: &ServerState) -> (Response, bool) {
        let controller = &state.controller;
        let response = match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => match controller.snapshot().await {
                Ok(voice) => Response::Status(DaemonStatus::new(
                    state.start_time.elapsed().as_secs(),
                    voice,
                )),
                Err(e) => closed(e),
            },

            Request::Subscribe => return (Response::Subscribed, true),

            Request::StartRecording => ack(controller.start_recording()),
            Request::StopRecording => ack(controller.stop_recording()),
            Request::CancelRecording => ack(controller.cancel_recording()),
            Request::Speak { text } => {
                if text.trim().is_empty() {
                    Response::error("invalid_request", "nothing to speak")
                } else {
                    ack(controller.speak(text))
                }
            }
            Request::StopSpeaking => ack(controller.stop_speaking()),
            Request::SetHandsFree { enabled } => ack(controller.set_hands_free(enabled)),
            Request::SetAutoSend { enabled } => ack(controller.set_auto_send(enabled)),
            Request::SetProcessing { processing } => ack(controller.set_processing(processing)),

            Request::Shutdown => {
                info!("shutdown requested via IPC");
                state.shutdown.trigger();
                Response::Ack
            }
        };
        (response, false)
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

fn ack(result: Result<(), ControllerClosed>) -> Response {
    match result {
        Ok(()) => Response::Ack,
        Err(e) => closed(e),
    }
}

fn closed(e: ControllerClosed) -> Response {
    Response::error("controller_closed", e.to_string())
}
