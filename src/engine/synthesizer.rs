//! Speech output through a TTS command
//!
//! One process per utterance: text on stdin, playback finished when the
//! process exits. The child is killed when the `speak` future is dropped.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::voice::{SpeechSynthesizer, VoiceError, VoiceInfo};

/// Maximum text accepted per utterance (64 KiB)
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

pub struct CommandSynthesizer {
    command: Vec<String>,
    voices: Vec<VoiceInfo>,
}

impl CommandSynthesizer {
    pub fn new(command: Vec<String>, voices: Vec<VoiceInfo>) -> Self {
        Self { command, voices }
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    fn voices(&self) -> Vec<VoiceInfo> {
        self.voices.clone()
    }

    async fn speak(
        &self,
        text: &str,
        voice: Option<&VoiceInfo>,
        language: &str,
    ) -> Result<(), VoiceError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Synthesis(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| VoiceError::EngineUnavailable("empty synthesizer command".to_string()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .env("VOICE_LOOP_LANGUAGE", language)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(voice) = voice {
            command.arg("--voice").arg(&voice.name);
        }

        let mut child = command
            .spawn()
            .map_err(|e| VoiceError::Synthesis(format!("failed to spawn {}: {}", program, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Synthesis("failed to open stdin".to_string()))?;
        let text_owned = text.to_string();

        // a long text must not block on a full pipe while nobody waits on the child
        let write_task = tokio::spawn(async move { stdin.write_all(text_owned.as_bytes()).await });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("failed to wait for {}: {}", program, e)))?;

        match write_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(?e, "synthesizer closed stdin early"),
            Err(e) => return Err(VoiceError::Synthesis(format!("stdin task failed: {}", e))),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VoiceError::Synthesis(format!(
                "{} failed: {}",
                program,
                stderr.trim()
            )));
        }
        Ok(())
    }
}
