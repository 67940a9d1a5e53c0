//! Platform capability interfaces
//!
//! The controller consumes microphone, recognition and synthesis engines only
//! through these traits. Whether a capability exists is resolved once, when
//! the `Engines` bundle is built, so the state machine never probes the
//! platform itself.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::error::{RecognitionErrorCode, VoiceError};
use super::status::MicPermission;
use super::transcript::Fragment;

/// A platform capability that may be missing
pub enum Capability<T: ?Sized> {
    Available(Arc<T>),
    Unavailable { reason: String },
}

impl<T: ?Sized> Capability<T> {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Capability::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Capability::Available(_))
    }

    /// The engine, or `EngineUnavailable` carrying the reason
    pub fn get(&self) -> Result<&Arc<T>, VoiceError> {
        match self {
            Capability::Available(engine) => Ok(engine),
            Capability::Unavailable { reason } => {
                Err(VoiceError::EngineUnavailable(reason.clone()))
            }
        }
    }
}

impl<T: ?Sized> Clone for Capability<T> {
    fn clone(&self) -> Self {
        match self {
            Capability::Available(engine) => Capability::Available(Arc::clone(engine)),
            Capability::Unavailable { reason } => Capability::Unavailable {
                reason: reason.clone(),
            },
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Capability<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Available(_) => write!(f, "Available"),
            Capability::Unavailable { reason } => write!(f, "Unavailable({reason})"),
        }
    }
}

/// Microphone access
#[async_trait]
pub trait AudioInput: Send + Sync {
    /// Acquire an input stream, prompting for permission if needed
    ///
    /// Fails with `PermissionDenied` when the user rejects access and
    /// `MicUnavailable` when there is no usable input device.
    async fn open(&self) -> Result<Box<dyn AudioStream>, VoiceError>;

    /// Current permission without prompting
    fn permission(&self) -> MicPermission {
        MicPermission::Prompt
    }
}

/// An open microphone stream with a frequency analyser attached
pub trait AudioStream: Send {
    /// Fill `bins` with the current magnitude spectrum, one byte per bin
    fn read_frequency_data(&mut self, bins: &mut [u8]);

    /// Release the device and any processing graph
    ///
    /// Some platforms reject closing in certain states; callers log and
    /// continue.
    fn close(&mut self) -> Result<(), VoiceError>;
}

/// Options for one recognition stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionOptions {
    pub language: String,
    pub continuous: bool,
    pub interim_results: bool,
}

impl RecognitionOptions {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            continuous: true,
            interim_results: true,
        }
    }
}

/// Events emitted by a recognition engine, in arrival order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecognitionEvent {
    Start,
    Result { fragments: Vec<Fragment> },
    Error {
        code: RecognitionErrorCode,
        #[serde(default)]
        message: String,
    },
    End,
}

/// A running recognition stream
pub struct RecognitionStream {
    pub events: mpsc::UnboundedReceiver<RecognitionEvent>,
    pub control: Box<dyn RecognitionControl>,
}

/// Control half of a running recognition stream
pub trait RecognitionControl: Send {
    /// Finish gracefully: pending finals are delivered, then `End`
    fn stop(&mut self);

    /// End immediately, discarding pending results
    fn abort(&mut self);
}

/// Speech-to-text engine
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn start(&self, options: &RecognitionOptions) -> Result<RecognitionStream, VoiceError>;
}

/// A voice offered by a synthesis engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub name: String,
    pub lang: String,
}

impl VoiceInfo {
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }
}

/// Text-to-speech engine
///
/// `speak` resolves when playback finishes. Dropping the future must halt
/// playback.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn voices(&self) -> Vec<VoiceInfo>;

    async fn speak(
        &self,
        text: &str,
        voice: Option<&VoiceInfo>,
        language: &str,
    ) -> Result<(), VoiceError>;
}

/// The engines available to one controller
#[derive(Clone, Debug)]
pub struct Engines {
    pub microphone: Capability<dyn AudioInput>,
    pub recognizer: Capability<dyn SpeechRecognizer>,
    pub synthesizer: Capability<dyn SpeechSynthesizer>,
}

impl Engines {
    /// Nothing available; voice paths report `EngineUnavailable`
    pub fn unavailable(reason: &str) -> Self {
        Self {
            microphone: Capability::unavailable(reason),
            recognizer: Capability::unavailable(reason),
            synthesizer: Capability::unavailable(reason),
        }
    }

    /// Voice input needs both a microphone and a recognizer
    pub fn supports_input(&self) -> bool {
        self.microphone.is_available() && self.recognizer.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_capability_reports_reason() {
        let engines = Engines::unavailable("no speech support");
        assert!(!engines.supports_input());

        match engines.recognizer.get() {
            Err(VoiceError::EngineUnavailable(reason)) => assert_eq!(reason, "no speech support"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_recognition_event_wire_format() {
        let json = r#"{"type":"result","fragments":[{"text":"hi","is_final":true}]}"#;
        let event: RecognitionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            RecognitionEvent::Result {
                fragments: vec![Fragment::final_text("hi")]
            }
        );

        let json = r#"{"type":"error","code":"network"}"#;
        let event: RecognitionEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(
            event,
            RecognitionEvent::Error {
                code: RecognitionErrorCode::Network,
                ..
            }
        ));
    }
}
