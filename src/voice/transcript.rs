//! Transcript accumulation
//!
//! A pure reducer over recognition fragments: finals are appended,
//! interims replace one another.

use serde::{Deserialize, Serialize};

use super::status::Transcript;

/// One piece of a recognition result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
    pub is_final: bool,
}

impl Fragment {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Outcome of applying one recognition result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// At least one non-empty final fragment was appended
    pub final_appended: bool,
}

/// Maintains the running final transcript and the latest interim fragment
#[derive(Debug, Default)]
pub struct TranscriptAccumulator {
    transcript: Transcript,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply fragments in order
    pub fn apply_result(&mut self, fragments: &[Fragment]) -> ApplyOutcome {
        let mut final_appended = false;

        for fragment in fragments {
            let text = fragment.text.trim();
            if fragment.is_final {
                self.transcript.interim_text.clear();
                if text.is_empty() {
                    continue;
                }
                if !self.transcript.final_text.is_empty() {
                    self.transcript.final_text.push(' ');
                }
                self.transcript.final_text.push_str(text);
                final_appended = true;
            } else {
                self.transcript.interim_text = text.to_string();
            }
        }

        ApplyOutcome { final_appended }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn final_text(&self) -> &str {
        &self.transcript.final_text
    }

    pub fn has_final_text(&self) -> bool {
        self.transcript.has_final_text()
    }

    pub fn reset(&mut self) {
        self.transcript = Transcript::default();
    }

    /// Hand off the final text, leaving the accumulator empty
    pub fn take_final(&mut self) -> String {
        let text = std::mem::take(&mut self.transcript.final_text);
        self.transcript.interim_text.clear();
        text
    }
}
