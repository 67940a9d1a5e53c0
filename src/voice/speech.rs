//! Spoken replies
//!
//! Playback runs in a scoped task that reports back through the controller
//! channel. Every utterance gets an id; stopping drops the task and forgets
//! the id, so a completion that races the stop is discarded.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::controller::Input;
use super::engine::{Capability, SpeechSynthesizer, VoiceInfo};
use super::error::VoiceError;
use super::task::ScopedTask;

/// Name fragments of voices that sound natural, best first
const PREFERRED_VOICE_HINTS: &[&str] = &[
    "Natural",
    "Neural",
    "Google",
    "Samantha",
    "Aria",
    "Jenny",
    "Premium",
    "Enhanced",
];

/// Pick a voice for `language`
///
/// Prefers natural-sounding voices in the target language, then any voice in
/// that language. `None` means the engine default, which is always acceptable.
pub fn select_voice<'a>(voices: &'a [VoiceInfo], language: &str) -> Option<&'a VoiceInfo> {
    let base = primary_subtag(language);
    let matches_language = |voice: &&VoiceInfo| {
        voice.lang.eq_ignore_ascii_case(language)
            || primary_subtag(&voice.lang).eq_ignore_ascii_case(base)
    };

    PREFERRED_VOICE_HINTS
        .iter()
        .find_map(|hint| {
            voices
                .iter()
                .filter(matches_language)
                .find(|voice| voice.name.contains(hint))
        })
        .or_else(|| voices.iter().find(matches_language))
}

/// "en" for "en-US" or "en_GB"
fn primary_subtag(tag: &str) -> &str {
    tag.split(|c: char| c == '-' || c == '_').next().unwrap_or(tag)
}

/// What a `speak` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// Playback of a new utterance began
    Started { utterance: u64 },
    /// Something was already playing; it was stopped instead
    Cancelled { utterance: u64 },
}

struct Playback {
    utterance: u64,
    _task: ScopedTask,
}

pub struct SpeechOutputPlayer {
    synthesizer: Capability<dyn SpeechSynthesizer>,
    language: String,
    voice: Option<Option<VoiceInfo>>,
    next_utterance: u64,
    playing: Option<Playback>,
}

impl SpeechOutputPlayer {
    pub fn new(
        synthesizer: Capability<dyn SpeechSynthesizer>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            synthesizer,
            language: language.into(),
            voice: None,
            next_utterance: 1,
            playing: None,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.playing.is_some()
    }

    /// Speak `text`, or stop playback if already speaking
    pub fn speak(
        &mut self,
        text: &str,
        tx: &mpsc::UnboundedSender<Input>,
    ) -> Result<SpeakOutcome, VoiceError> {
        if let Some(utterance) = self.stop() {
            return Ok(SpeakOutcome::Cancelled { utterance });
        }

        let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::clone(self.synthesizer.get()?);
        let voice = self.voice(&synthesizer);

        let utterance = self.next_utterance;
        self.next_utterance += 1;

        let text = text.to_string();
        let language = self.language.clone();
        let tx = tx.clone();
        let task = ScopedTask::spawn(async move {
            let result = synthesizer.speak(&text, voice.as_ref(), &language).await;
            let _ = tx.send(Input::SpeechFinished {
                utterance,
                error: result.err().map(|e| e.to_string()),
            });
        });

        self.playing = Some(Playback {
            utterance,
            _task: task,
        });
        info!(utterance, "speech playback started");
        Ok(SpeakOutcome::Started { utterance })
    }

    /// Halt playback; the cancelled utterance never completes
    ///
    /// Returns the id of the utterance that was stopped.
    pub fn stop(&mut self) -> Option<u64> {
        let playback = self.playing.take()?;
        debug!(utterance = playback.utterance, "speech playback stopped");
        Some(playback.utterance)
    }

    /// Accept a completion report; false if the utterance was stopped
    pub fn finish(&mut self, utterance: u64) -> bool {
        match &self.playing {
            Some(playback) if playback.utterance == utterance => {
                self.playing = None;
                true
            }
            _ => false,
        }
    }

    fn voice(&mut self, synthesizer: &Arc<dyn SpeechSynthesizer>) -> Option<VoiceInfo> {
        let language = &self.language;
        self.voice
            .get_or_insert_with(|| {
                let voices = synthesizer.voices();
                let chosen = select_voice(&voices, language).cloned();
                debug!(voice = ?chosen.as_ref().map(|v| &v.name), "speech voice selected");
                chosen
            })
            .clone()
    }
}
