//! Voice error taxonomy
//!
//! Separates what went wrong (`VoiceError`) from how the UI should treat it
//! (`ErrorKind`), and classifies raw recognition engine codes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the voice components and engines
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("microphone unavailable: {0}")]
    MicUnavailable(String),

    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("recognition error ({code}): {message}")]
    Recognition {
        code: RecognitionErrorCode,
        message: String,
    },

    #[error("recognition failed after {attempts} restart attempts ({code})")]
    RetriesExhausted {
        attempts: u32,
        code: RecognitionErrorCode,
    },

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("operation aborted")]
    Aborted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// How the failure is presented to the user
    pub fn kind(&self) -> ErrorKind {
        match self {
            VoiceError::PermissionDenied => ErrorKind::PermissionDenied,
            VoiceError::MicUnavailable(_) | VoiceError::EngineUnavailable(_) => {
                ErrorKind::EngineUnavailable
            }
            VoiceError::Recognition { code, .. } => match code.class() {
                ErrorClass::PermissionDenied => ErrorKind::PermissionDenied,
                ErrorClass::NoSpeech => ErrorKind::NoSpeechDetected,
                ErrorClass::Aborted => ErrorKind::Aborted,
                ErrorClass::Recoverable => ErrorKind::RecoverableCaptureFailure,
                ErrorClass::Fatal => ErrorKind::Fatal,
            },
            VoiceError::Aborted => ErrorKind::Aborted,
            VoiceError::RetriesExhausted { .. } | VoiceError::Synthesis(_) | VoiceError::Io(_) => {
                ErrorKind::Fatal
            }
        }
    }

    /// Message suitable for a transient notification
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::PermissionDenied => {
                "Microphone access was denied. Allow microphone access in your system settings."
                    .to_string()
            }
            ErrorKind::EngineUnavailable => {
                "Voice input is not available here. You can keep typing your messages.".to_string()
            }
            ErrorKind::Aborted => "Recording cancelled".to_string(),
            _ => self.to_string(),
        }
    }
}

/// User-facing classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// User must change browser/OS settings
    PermissionDenied,
    /// Platform lacks the capability; fall back to text input
    EngineUnavailable,
    /// Transient capture failure, retried automatically
    RecoverableCaptureFailure,
    /// Nothing was heard
    NoSpeechDetected,
    /// User cancelled; never shown as an error
    Aborted,
    /// Anything else that ends the session
    Fatal,
}

/// Error codes reported by a speech recognition engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecognitionErrorCode {
    NoSpeech,
    Aborted,
    AudioCapture,
    Network,
    NotAllowed,
    ServiceNotAllowed,
    BadGrammar,
    LanguageNotSupported,
    #[serde(untagged)]
    Other(String),
}

/// How the recognition session reacts to an engine error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Recoverable,
    PermissionDenied,
    NoSpeech,
    Aborted,
    Fatal,
}

impl RecognitionErrorCode {
    pub fn class(&self) -> ErrorClass {
        match self {
            RecognitionErrorCode::AudioCapture | RecognitionErrorCode::Network => {
                ErrorClass::Recoverable
            }
            RecognitionErrorCode::NotAllowed | RecognitionErrorCode::ServiceNotAllowed => {
                ErrorClass::PermissionDenied
            }
            RecognitionErrorCode::NoSpeech => ErrorClass::NoSpeech,
            RecognitionErrorCode::Aborted => ErrorClass::Aborted,
            RecognitionErrorCode::BadGrammar
            | RecognitionErrorCode::LanguageNotSupported
            | RecognitionErrorCode::Other(_) => ErrorClass::Fatal,
        }
    }

    /// Wire name of the code
    pub fn as_str(&self) -> &str {
        match self {
            RecognitionErrorCode::NoSpeech => "no-speech",
            RecognitionErrorCode::Aborted => "aborted",
            RecognitionErrorCode::AudioCapture => "audio-capture",
            RecognitionErrorCode::Network => "network",
            RecognitionErrorCode::NotAllowed => "not-allowed",
            RecognitionErrorCode::ServiceNotAllowed => "service-not-allowed",
            RecognitionErrorCode::BadGrammar => "bad-grammar",
            RecognitionErrorCode::LanguageNotSupported => "language-not-supported",
            RecognitionErrorCode::Other(code) => code,
        }
    }
}

impl std::fmt::Display for RecognitionErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
