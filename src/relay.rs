//! Hands finished voice turns to a chat command and speaks the reply

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::voice::{ControllerHandle, TurnHandler};

/// Upper bound for one chat round trip
const CHAT_TIMEOUT: Duration = Duration::from_secs(120);

/// Turn handler used by the daemon
pub struct ChatRelay {
    command: Option<Vec<String>>,
    handle: ControllerHandle,
}

impl ChatRelay {
    pub fn new(command: Option<Vec<String>>, handle: ControllerHandle) -> Self {
        Self { command, handle }
    }
}

#[async_trait]
impl TurnHandler for ChatRelay {
    async fn on_auto_send(&self, text: String) -> Result<()> {
        let Some(command) = &self.command else {
            info!(chars = text.len(), "voice turn ready, no chat command configured");
            return Ok(());
        };

        let reply = run_chat(command, &text).await?;
        if reply.is_empty() {
            debug!("chat command returned no reply");
            return Ok(());
        }
        info!(chars = reply.len(), "speaking chat reply");
        // speak() on a busy player only cancels, so clear any playback first
        self.handle.stop_speaking()?;
        self.handle.speak(reply)?;
        Ok(())
    }

    fn on_transcription(&self, text: String) {
        info!(chars = text.len(), "voice turn transcribed for review");
    }
}

/// Run the chat command with `text` on stdin and return its trimmed stdout
async fn run_chat(command: &[String], text: &str) -> Result<String> {
    let (program, args) = command.split_first().context("empty chat command")?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn chat command {}", program))?;

    let mut stdin = child.stdin.take().context("failed to open chat stdin")?;
    let text_owned = text.to_string();
    let write_task = tokio::spawn(async move {
        stdin.write_all(text_owned.as_bytes()).await?;
        stdin.shutdown().await
    });

    let output = tokio::time::timeout(CHAT_TIMEOUT, child.wait_with_output())
        .await
        .with_context(|| {
            format!("chat command timed out after {} seconds", CHAT_TIMEOUT.as_secs())
        })?
        .context("failed to wait for chat command")?;

    if !output.status.success() {
        bail!(
            "chat command failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    write_task
        .await
        .context("chat stdin task failed")?
        .context("failed to write to chat command")?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
