//! Configuration loading and management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Voice controller tuning
    pub voice: VoiceConfig,

    /// External engine command lines
    pub engines: EngineConfig,
}

/// Timing and behaviour of the voice controller
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    /// BCP-47 tag for recognition and voice selection
    pub language: String,
    /// Hand completed turns to the send callback instead of the transcription callback
    pub auto_send: bool,
    /// Resume listening after a spoken reply finishes
    pub hands_free: bool,
    /// Quiet period after the last final fragment before the countdown starts
    pub idle_delay: Duration,
    /// Countdown length in whole seconds
    pub countdown_seconds: u32,
    /// Delay before restarting recognition after a recoverable error
    pub retry_delay: Duration,
    /// Restarts allowed per session
    pub max_retries: u32,
    /// Delay between a reply finishing and listening again
    pub hands_free_delay: Duration,
    /// Normalised level above which speech counts as present
    pub speech_threshold: f32,
    /// Level sampling period
    pub frame_period: Duration,
    /// How long to wait for the engine to end after a stop request
    pub stop_grace: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            auto_send: true,
            hands_free: false,
            idle_delay: Duration::from_millis(1500),
            countdown_seconds: 2,
            retry_delay: Duration::from_millis(300),
            max_retries: 2,
            hands_free_delay: Duration::from_millis(400),
            speech_threshold: 0.1,
            frame_period: Duration::from_millis(16),
            stop_grace: Duration::from_secs(3),
        }
    }
}

/// Command lines for the process-backed engines; `None` means unavailable
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub microphone: Option<Vec<String>>,
    pub recognizer: Option<Vec<String>>,
    pub synthesizer: Option<Vec<String>>,
    /// Voices offered by the synthesizer, as (name, language)
    pub voices: Vec<(String, String)>,
    pub chat: Option<Vec<String>>,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = lookup("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("voice-loop");

        let socket_path = lookup("VOICE_LOOP_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));

        let defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            language: lookup("VOICE_LOOP_LANGUAGE").unwrap_or(defaults.language),
            auto_send: parse_var(&lookup, "VOICE_LOOP_AUTO_SEND")?.unwrap_or(defaults.auto_send),
            hands_free: parse_var(&lookup, "VOICE_LOOP_HANDS_FREE")?.unwrap_or(defaults.hands_free),
            idle_delay: parse_var(&lookup, "VOICE_LOOP_IDLE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.idle_delay),
            countdown_seconds: parse_var(&lookup, "VOICE_LOOP_COUNTDOWN_SECS")?
                .unwrap_or(defaults.countdown_seconds),
            ..defaults
        };
        if voice.countdown_seconds == 0 {
            return Err(anyhow!("VOICE_LOOP_COUNTDOWN_SECS must be at least 1"));
        }

        let engines = EngineConfig {
            microphone: command_var(&lookup, "VOICE_LOOP_MIC_COMMAND"),
            recognizer: command_var(&lookup, "VOICE_LOOP_STT_COMMAND"),
            synthesizer: command_var(&lookup, "VOICE_LOOP_TTS_COMMAND"),
            voices: lookup("VOICE_LOOP_TTS_VOICES")
                .map(|list| parse_voices(&list))
                .transpose()?
                .unwrap_or_default(),
            chat: command_var(&lookup, "VOICE_LOOP_CHAT_COMMAND"),
        };

        Ok(Self {
            socket_path,
            data_dir,
            voice,
            engines,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("invalid value for {}: {:?} ({})", key, raw, e)),
    }
}

/// Whitespace-split command line; blank means unset
fn command_var<F>(lookup: &F, key: &str) -> Option<Vec<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    let parts: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    (!parts.is_empty()).then_some(parts)
}

/// Parse `name:lang,name:lang`
fn parse_voices(list: &str) -> Result<Vec<(String, String)>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, lang) = entry
                .rsplit_once(':')
                .ok_or_else(|| anyhow!("invalid voice entry {:?}, expected name:lang", entry))?;
            Ok((name.trim().to_string(), lang.trim().to_string()))
        })
        .collect()
}
