//! Scripted engines for tests

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::controller::TurnHandler;
use super::engine::{
    AudioInput, AudioStream, Capability, Engines, RecognitionControl, RecognitionEvent,
    RecognitionOptions, RecognitionStream, SpeechRecognizer, SpeechSynthesizer, VoiceInfo,
};
use super::error::{RecognitionErrorCode, VoiceError};
use super::transcript::Fragment;

#[derive(Default)]
struct MicState {
    magnitude: AtomicU8,
    opened: AtomicUsize,
    closed: AtomicUsize,
    deny: AtomicBool,
    missing: AtomicBool,
    fail_close: AtomicBool,
}

/// Microphone whose spectrum is a flat, settable magnitude
#[derive(Clone, Default)]
pub struct FakeMicrophone {
    state: Arc<MicState>,
}

impl FakeMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_magnitude(&self, magnitude: u8) {
        self.state.magnitude.store(magnitude, Ordering::SeqCst);
    }

    pub fn deny_permission(&self) {
        self.state.deny.store(true, Ordering::SeqCst);
    }

    pub fn remove_device(&self) {
        self.state.missing.store(true, Ordering::SeqCst);
    }

    pub fn fail_close(&self) {
        self.state.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }
}

struct FakeStream {
    state: Arc<MicState>,
}

impl AudioStream for FakeStream {
    fn read_frequency_data(&mut self, bins: &mut [u8]) {
        let magnitude = self.state.magnitude.load(Ordering::SeqCst);
        bins.iter_mut().for_each(|b| *b = magnitude);
    }

    fn close(&mut self) -> Result<(), VoiceError> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(VoiceError::MicUnavailable("context already closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AudioInput for FakeMicrophone {
    async fn open(&self) -> Result<Box<dyn AudioStream>, VoiceError> {
        if self.state.deny.load(Ordering::SeqCst) {
            return Err(VoiceError::PermissionDenied);
        }
        if self.state.missing.load(Ordering::SeqCst) {
            return Err(VoiceError::MicUnavailable("no input device".into()));
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            state: Arc::clone(&self.state),
        }))
    }
}

#[derive(Default)]
struct RecognizerState {
    current: Option<mpsc::UnboundedSender<RecognitionEvent>>,
    starts: usize,
    stops: usize,
    aborts: usize,
    failing_starts: usize,
    silent_stop: bool,
}

/// Recognizer driven by the test through `emit_*`
#[derive(Clone, Default)]
pub struct FakeRecognizer {
    state: Arc<Mutex<RecognizerState>>,
}

impl FakeRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: RecognitionEvent) {
        let state = self.state.lock().unwrap();
        if let Some(tx) = &state.current {
            let _ = tx.send(event);
        }
    }

    pub fn emit_final(&self, text: &str) {
        self.emit(RecognitionEvent::Result {
            fragments: vec![Fragment::final_text(text)],
        });
    }

    pub fn emit_interim(&self, text: &str) {
        self.emit(RecognitionEvent::Result {
            fragments: vec![Fragment::interim(text)],
        });
    }

    pub fn emit_error(&self, code: RecognitionErrorCode) {
        self.emit(RecognitionEvent::Error {
            code,
            message: String::new(),
        });
    }

    /// Fail the next `count` engine starts
    pub fn fail_starts(&self, count: usize) {
        self.state.lock().unwrap().failing_starts = count;
    }

    /// Ignore `stop()` instead of answering with `End`
    pub fn hang_on_stop(&self) {
        self.state.lock().unwrap().silent_stop = true;
    }

    pub fn starts(&self) -> usize {
        self.state.lock().unwrap().starts
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }

    pub fn aborts(&self) -> usize {
        self.state.lock().unwrap().aborts
    }
}

struct FakeControl {
    tx: mpsc::UnboundedSender<RecognitionEvent>,
    state: Arc<Mutex<RecognizerState>>,
}

impl RecognitionControl for FakeControl {
    fn stop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.stops += 1;
        if !state.silent_stop {
            let _ = self.tx.send(RecognitionEvent::End);
        }
    }

    fn abort(&mut self) {
        self.state.lock().unwrap().aborts += 1;
        let _ = self.tx.send(RecognitionEvent::Error {
            code: RecognitionErrorCode::Aborted,
            message: String::new(),
        });
        let _ = self.tx.send(RecognitionEvent::End);
    }
}

#[async_trait]
impl SpeechRecognizer for FakeRecognizer {
    async fn start(&self, _options: &RecognitionOptions) -> Result<RecognitionStream, VoiceError> {
        let mut state = self.state.lock().unwrap();
        state.starts += 1;
        if state.failing_starts > 0 {
            state.failing_starts -= 1;
            return Err(VoiceError::Recognition {
                code: RecognitionErrorCode::AudioCapture,
                message: "engine refused to start".into(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(RecognitionEvent::Start);
        state.current = Some(tx.clone());
        Ok(RecognitionStream {
            events: rx,
            control: Box::new(FakeControl {
                tx,
                state: Arc::clone(&self.state),
            }),
        })
    }
}

#[derive(Default)]
struct SynthState {
    spoken: Mutex<Vec<String>>,
    completed: AtomicUsize,
    fail: AtomicBool,
}

/// Synthesizer whose playback takes a fixed time
#[derive(Clone)]
pub struct FakeSynthesizer {
    duration: Duration,
    voices: Vec<VoiceInfo>,
    state: Arc<SynthState>,
}

impl FakeSynthesizer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            voices: vec![VoiceInfo::new("Basic", "en-US")],
            state: Arc::default(),
        }
    }

    pub fn fail(&self) {
        self.state.fail.store(true, Ordering::SeqCst);
    }

    pub fn spoken(&self) -> Vec<String> {
        self.state.spoken.lock().unwrap().clone()
    }

    pub fn completed(&self) -> usize {
        self.state.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    fn voices(&self) -> Vec<VoiceInfo> {
        self.voices.clone()
    }

    async fn speak(
        &self,
        text: &str,
        _voice: Option<&VoiceInfo>,
        _language: &str,
    ) -> Result<(), VoiceError> {
        self.state.spoken.lock().unwrap().push(text.to_string());
        tokio::time::sleep(self.duration).await;
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(VoiceError::Synthesis("device busy".into()));
        }
        self.state.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every hand-off from the controller
#[derive(Clone, Default)]
pub struct RecordingHandler {
    sent: Arc<Mutex<Vec<String>>>,
    transcribed: Arc<Mutex<Vec<String>>>,
    fail_sends: Arc<AtomicBool>,
}

impl RecordingHandler {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn transcribed(&self) -> Vec<String> {
        self.transcribed.lock().unwrap().clone()
    }

    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TurnHandler for RecordingHandler {
    async fn on_auto_send(&self, text: String) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(text);
        if self.fail_sends.load(Ordering::SeqCst) {
            anyhow::bail!("chat backend unreachable");
        }
        Ok(())
    }

    fn on_transcription(&self, text: String) {
        self.transcribed.lock().unwrap().push(text);
    }
}

/// All fakes wired into an `Engines` bundle
pub struct FakeEngines {
    pub microphone: FakeMicrophone,
    pub recognizer: FakeRecognizer,
    pub synthesizer: FakeSynthesizer,
}

impl FakeEngines {
    pub fn new() -> Self {
        Self {
            microphone: FakeMicrophone::new(),
            recognizer: FakeRecognizer::new(),
            synthesizer: FakeSynthesizer::new(Duration::from_secs(1)),
        }
    }

    pub fn engines(&self) -> Engines {
        Engines {
            microphone: Capability::Available(Arc::new(self.microphone.clone())),
            recognizer: Capability::Available(Arc::new(self.recognizer.clone())),
            synthesizer: Capability::Available(Arc::new(self.synthesizer.clone())),
        }
    }
}
