//! Events module for voice controller notifications
//!
//! Provides structured event types broadcast by the controller on every
//! status transition, transcript update, countdown step and hand-off.

use serde::{Deserialize, Serialize};

use crate::voice::{ErrorKind, MicPermission, VoiceStatus};

/// Events emitted by the voice controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceEvent {
    /// Status transition
    StatusChanged {
        from: VoiceStatus,
        to: VoiceStatus,
        /// Time spent in the previous status
        duration_ms: u64,
    },

    /// Microphone permission changed
    PermissionChanged { permission: MicPermission },

    /// Running transcript changed
    TranscriptUpdated {
        final_text: String,
        interim_text: String,
    },

    /// Microphone level for the recording indicator
    AudioLevel { level: f32 },

    /// Silence countdown began
    CountdownStarted { seconds: u32 },

    /// One second of the countdown elapsed
    CountdownTick { seconds_remaining: u32 },

    /// Countdown interrupted by speech
    CountdownCancelled,

    /// Informational toast
    Notice { message: String },

    /// Failure toast; the controller is back in idle
    Error { kind: ErrorKind, message: String },

    /// Completed turn handed to the send callback
    AutoSend { text: String },

    /// Completed turn handed to the transcription callback
    Transcription { text: String },

    /// Spoken reply started
    SpeakingStarted { utterance: u64 },

    /// Spoken reply ended
    SpeakingFinished {
        utterance: u64,
        /// False when playback was stopped or failed
        completed: bool,
    },

    /// Hands-free mode toggled
    HandsFreeChanged { enabled: bool },
}

impl std::fmt::Display for VoiceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoiceEvent::StatusChanged { from, to, .. } => {
                write!(f, "STATUS_CHANGED ({} -> {})", from, to)
            }
            VoiceEvent::PermissionChanged { permission } => {
                write!(f, "PERMISSION_CHANGED ({:?})", permission)
            }
            VoiceEvent::TranscriptUpdated { final_text, .. } => {
                write!(f, "TRANSCRIPT_UPDATED ({} chars)", final_text.len())
            }
            VoiceEvent::AudioLevel { level } => write!(f, "AUDIO_LEVEL ({:.2})", level),
            VoiceEvent::CountdownStarted { seconds } => {
                write!(f, "COUNTDOWN_STARTED ({}s)", seconds)
            }
            VoiceEvent::CountdownTick { seconds_remaining } => {
                write!(f, "COUNTDOWN_TICK ({}s)", seconds_remaining)
            }
            VoiceEvent::CountdownCancelled => write!(f, "COUNTDOWN_CANCELLED"),
            VoiceEvent::Notice { message } => write!(f, "NOTICE ({})", message),
            VoiceEvent::Error { kind, message } => write!(f, "ERROR ({:?}: {})", kind, message),
            VoiceEvent::AutoSend { .. } => write!(f, "AUTO_SEND"),
            VoiceEvent::Transcription { .. } => write!(f, "TRANSCRIPTION"),
            VoiceEvent::SpeakingStarted { utterance } => {
                write!(f, "SPEAKING_STARTED (#{})", utterance)
            }
            VoiceEvent::SpeakingFinished {
                utterance,
                completed,
            } => write!(f, "SPEAKING_FINISHED (#{}, completed={})", utterance, completed),
            VoiceEvent::HandsFreeChanged { enabled } => {
                write!(f, "HANDS_FREE_CHANGED ({})", enabled)
            }
        }
    }
}
