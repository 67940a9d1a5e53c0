//! voice-loop-daemon: Background daemon for hands-free voice conversations
//!
//! This daemon provides:
//! - Voice capture with silence-countdown turn detection
//! - Hand-off of finished turns to a chat command
//! - Spoken replies, with hands-free re-listening
//! - IPC server for UI clients (commands, status, event push)

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use voice_loop::config::Config;
use voice_loop::engine;
use voice_loop::events::VoiceEvent;
use voice_loop::ipc::Server;
use voice_loop::lifecycle::ShutdownSignal;
use voice_loop::relay::ChatRelay;
use voice_loop::voice::{ControllerHandle, VoiceInteractionController};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "voice-loop-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, language = %config.voice.language, "configuration loaded");

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Controller -> IPC subscribers
    let (event_tx, _event_rx) = broadcast::channel::<VoiceEvent>(256);
    let (handle, inputs) = ControllerHandle::channel(event_tx);

    let engines = engine::resolve(&config.engines);
    let relay = Arc::new(ChatRelay::new(config.engines.chat.clone(), handle.clone()));
    let mut controller =
        VoiceInteractionController::new(config.voice.clone(), engines, relay, &handle);

    let server = Server::new(&config.socket_path, handle, shutdown.clone())?;

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the voice controller (processes commands and engine events)
        _ = controller.run(inputs) => {
            info!("voice controller exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    // releases the microphone, recognition, timers and playback
    drop(controller);
    server.shutdown().await;

    info!("voice-loop-daemon stopped");

    Ok(())
}
