//! Voice data model
//!
//! Status and permission enums plus the small value objects the controller
//! exposes to the UI.

use serde::{Deserialize, Serialize};

/// The four statuses of a voice turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceStatus {
    /// No session, ready for the next turn
    #[default]
    Idle,
    /// Microphone and recognition are live
    Listening,
    /// Silence detected, counting down to send
    Countdown,
    /// Recognition stopped, transcript being handed off
    Sending,
}

impl VoiceStatus {
    /// Whether a recognition session may be active in this status
    pub fn is_recording(&self) -> bool {
        matches!(self, VoiceStatus::Listening | VoiceStatus::Countdown)
    }
}

impl std::fmt::Display for VoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoiceStatus::Idle => write!(f, "Idle"),
            VoiceStatus::Listening => write!(f, "Listening"),
            VoiceStatus::Countdown => write!(f, "Countdown"),
            VoiceStatus::Sending => write!(f, "Sending"),
        }
    }
}

/// Microphone permission as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicPermission {
    Granted,
    Denied,
    #[default]
    Prompt,
    Unavailable,
}

impl MicPermission {
    /// Voice controls should be disabled in the UI
    pub fn blocks_input(&self) -> bool {
        matches!(self, MicPermission::Denied | MicPermission::Unavailable)
    }
}

/// Running transcript of the current session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub final_text: String,
    pub interim_text: String,
}

impl Transcript {
    pub fn has_final_text(&self) -> bool {
        !self.final_text.trim().is_empty()
    }
}

/// Countdown progress, present only while counting down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountdownState {
    pub seconds_remaining: u32,
}

/// Recognition restarts used by the current session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub attempts_used: u32,
    pub is_retrying: bool,
}

/// Point-in-time view of the controller for UI rendering
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceSnapshot {
    pub status: VoiceStatus,
    pub permission: MicPermission,
    pub transcript: Transcript,
    pub audio_level: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown: Option<CountdownState>,
    pub retry: RetryState,
    pub hands_free: bool,
    pub auto_send: bool,
    pub speaking: bool,
    pub processing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&VoiceStatus::Countdown).unwrap();
        assert_eq!(json, r#""countdown""#);
    }

    #[test]
    fn test_recording_statuses() {
        assert!(!VoiceStatus::Idle.is_recording());
        assert!(VoiceStatus::Listening.is_recording());
        assert!(VoiceStatus::Countdown.is_recording());
        assert!(!VoiceStatus::Sending.is_recording());
    }

    #[test]
    fn test_permission_blocks_input() {
        assert!(MicPermission::Denied.blocks_input());
        assert!(MicPermission::Unavailable.blocks_input());
        assert!(!MicPermission::Prompt.blocks_input());
        assert!(!MicPermission::Granted.blocks_input());
    }

    #[test]
    fn test_snapshot_omits_inactive_countdown() {
        let json = serde_json::to_string(&VoiceSnapshot::default()).unwrap();
        assert!(!json.contains("countdown"));
        assert!(json.contains(r#""status":"idle""#));
    }
}
