//! Process-backed voice engines
//!
//! Capabilities are decided once from configuration; an unset command makes
//! the capability unavailable and the controller falls back accordingly.

mod microphone;
mod recognizer;
mod synthesizer;

use std::sync::Arc;

use tracing::{info, warn};

pub use microphone::{CommandMicrophone, SpectrumAnalyser};
pub use recognizer::{parse_line, SidecarRecognizer};
pub use synthesizer::CommandSynthesizer;

use crate::config::EngineConfig;
use crate::voice::{
    AudioInput, Capability, Engines, SpeechRecognizer, SpeechSynthesizer, VoiceInfo,
};

/// Build the engine bundle described by `config`
pub fn resolve(config: &EngineConfig) -> Engines {
    let microphone: Capability<dyn AudioInput> = match &config.microphone {
        Some(command) => Capability::Available(Arc::new(CommandMicrophone::new(command.clone()))),
        None => Capability::unavailable("no capture command configured"),
    };

    let recognizer: Capability<dyn SpeechRecognizer> = match &config.recognizer {
        Some(command) => Capability::Available(Arc::new(SidecarRecognizer::new(command.clone()))),
        None => Capability::unavailable("no recognition sidecar configured"),
    };

    let synthesizer: Capability<dyn SpeechSynthesizer> = match &config.synthesizer {
        Some(command) => {
            let voices = config
                .voices
                .iter()
                .map(|(name, lang)| VoiceInfo::new(name.clone(), lang.clone()))
                .collect();
            Capability::Available(Arc::new(CommandSynthesizer::new(command.clone(), voices)))
        }
        None => Capability::unavailable("no speech output command configured"),
    };

    let engines = Engines {
        microphone,
        recognizer,
        synthesizer,
    };

    if engines.supports_input() {
        info!("voice input available");
    } else {
        warn!("voice input unavailable, clients should fall back to text input");
    }
    engines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_commands_are_unavailable() {
        let engines = resolve(&EngineConfig::default());
        assert!(!engines.supports_input());
        assert!(!engines.synthesizer.is_available());
    }

    #[test]
    fn test_configured_engines_are_available() {
        let config = EngineConfig {
            microphone: Some(vec!["arecord".to_string()]),
            recognizer: Some(vec!["stt-sidecar".to_string()]),
            synthesizer: Some(vec!["say".to_string()]),
            voices: vec![("Samantha".to_string(), "en-US".to_string())],
            chat: None,
        };
        let engines = resolve(&config);
        assert!(engines.supports_input());
        let synthesizer = engines.synthesizer.get().unwrap();
        assert_eq!(synthesizer.voices(), vec![VoiceInfo::new("Samantha", "en-US")]);
    }
}
