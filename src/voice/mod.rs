//! Voice interaction
//!
//! Turns microphone input into text turns and speaks replies back. The
//! controller owns every component and is driven from a single input channel.

mod controller;
mod countdown;
mod engine;
mod error;
mod level;
mod recognition;
mod speech;
mod status;
mod task;
mod transcript;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{
    Command, ControllerClosed, ControllerHandle, Input, TurnHandler,
    VoiceInteractionController,
};
pub use countdown::{SilenceCountdownTimer, Tick};
pub use engine::{
    AudioInput, AudioStream, Capability, Engines, RecognitionControl, RecognitionEvent,
    RecognitionOptions, RecognitionStream, SpeechRecognizer, SpeechSynthesizer, VoiceInfo,
};
pub use error::{ErrorClass, ErrorKind, RecognitionErrorCode, VoiceError};
pub use level::{normalized_level, AudioLevelMonitor, LevelSample, FREQUENCY_BINS};
pub use recognition::{ErrorDisposition, RecognitionSession, StopOutcome};
pub use speech::{select_voice, SpeakOutcome, SpeechOutputPlayer};
pub use status::{CountdownState, MicPermission, RetryState, Transcript, VoiceSnapshot, VoiceStatus};
pub use task::ScopedTask;
pub use transcript::{ApplyOutcome, Fragment, TranscriptAccumulator};
