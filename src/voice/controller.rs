//! Voice interaction state machine
//!
//! Every asynchronous source (UI commands, recognition engine events, level
//! frames, countdown ticks, retry and hands-free timers, playback completion)
//! is funnelled into one `Input` channel and handled sequentially by
//! `VoiceInteractionController::run`. Transitions happen only in
//! `transition_to`, and every exit path tears the session down before the
//! status changes.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::VoiceConfig;
use crate::events::VoiceEvent;

use super::countdown::{SilenceCountdownTimer, Tick};
use super::engine::{Engines, RecognitionEvent, RecognitionOptions};
use super::error::{ErrorKind, RecognitionErrorCode, VoiceError};
use super::level::AudioLevelMonitor;
use super::recognition::{ErrorDisposition, RecognitionSession, StopOutcome};
use super::speech::{SpeakOutcome, SpeechOutputPlayer};
use super::status::{MicPermission, RetryState, VoiceSnapshot, VoiceStatus};
use super::task::{self, ScopedTask};
use super::transcript::{Fragment, TranscriptAccumulator};

/// Operations requested by the UI layer
#[derive(Debug)]
pub enum Command {
    StartRecording,
    StopRecording,
    CancelRecording,
    Speak(String),
    StopSpeaking,
    SetHandsFree(bool),
    SetAutoSend(bool),
    /// The caller is busy producing a reply
    SetProcessing(bool),
    Snapshot(oneshot::Sender<VoiceSnapshot>),
}

/// Everything the controller reacts to
#[derive(Debug)]
pub enum Input {
    Command(Command),
    Recognition { stream: u64, event: RecognitionEvent },
    Frame { session: u64 },
    IdleElapsed { session: u64, epoch: u64 },
    CountdownTick { session: u64, epoch: u64 },
    RetryDue { session: u64 },
    StopGraceElapsed { session: u64 },
    SendResolved { session: u64, error: Option<String> },
    SpeechFinished { utterance: u64, error: Option<String> },
    ResumeListening { utterance: u64 },
}

/// Receives completed voice turns
///
/// Both callbacks are optional; the defaults drop the text.
#[async_trait]
pub trait TurnHandler: Send + Sync {
    /// Deliver a finished turn to the conversation; the controller stays in
    /// `Sending` until this resolves
    async fn on_auto_send(&self, text: String) -> anyhow::Result<()> {
        debug!(chars = text.len(), "auto-send ignored, no handler");
        Ok(())
    }

    /// Deliver a finished turn for manual review
    fn on_transcription(&self, text: String) {
        debug!(chars = text.len(), "transcription ignored, no handler");
    }
}

#[derive(Debug, thiserror::Error)]
#[error("voice controller is not running")]
pub struct ControllerClosed;

/// Cloneable front door to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<Input>,
    events: broadcast::Sender<VoiceEvent>,
}

impl ControllerHandle {
    /// Create the handle and the input channel the controller will consume
    pub fn channel(
        events: broadcast::Sender<VoiceEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<Input>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, events }, rx)
    }

    fn send(&self, command: Command) -> Result<(), ControllerClosed> {
        self.tx
            .send(Input::Command(command))
            .map_err(|_| ControllerClosed)
    }

    pub fn start_recording(&self) -> Result<(), ControllerClosed> {
        self.send(Command::StartRecording)
    }

    pub fn stop_recording(&self) -> Result<(), ControllerClosed> {
        self.send(Command::StopRecording)
    }

    pub fn cancel_recording(&self) -> Result<(), ControllerClosed> {
        self.send(Command::CancelRecording)
    }

    pub fn speak(&self, text: impl Into<String>) -> Result<(), ControllerClosed> {
        self.send(Command::Speak(text.into()))
    }

    pub fn stop_speaking(&self) -> Result<(), ControllerClosed> {
        self.send(Command::StopSpeaking)
    }

    pub fn set_hands_free(&self, enabled: bool) -> Result<(), ControllerClosed> {
        self.send(Command::SetHandsFree(enabled))
    }

    pub fn set_auto_send(&self, enabled: bool) -> Result<(), ControllerClosed> {
        self.send(Command::SetAutoSend(enabled))
    }

    pub fn set_processing(&self, processing: bool) -> Result<(), ControllerClosed> {
        self.send(Command::SetProcessing(processing))
    }

    pub async fn snapshot(&self) -> Result<VoiceSnapshot, ControllerClosed> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Snapshot(reply_tx))?;
        reply_rx.await.map_err(|_| ControllerClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoiceEvent> {
        self.events.subscribe()
    }
}

struct PendingResume {
    utterance: u64,
    _timer: ScopedTask,
}

/// The top-level voice state machine
pub struct VoiceInteractionController {
    config: VoiceConfig,
    engines: Engines,
    handler: Arc<dyn TurnHandler>,
    tx: mpsc::UnboundedSender<Input>,
    event_tx: broadcast::Sender<VoiceEvent>,

    status: VoiceStatus,
    status_entered_at: Instant,
    permission: MicPermission,
    auto_send: bool,
    hands_free: bool,
    processing: bool,

    /// Incremented per `start_recording`; timer messages carry it
    session: u64,
    transcript: TranscriptAccumulator,
    countdown: SilenceCountdownTimer,
    monitor: AudioLevelMonitor,
    recognition: Option<RecognitionSession>,
    retry: RetryState,
    stop_grace: Option<ScopedTask>,
    send_task: Option<ScopedTask>,
    last_level: f32,

    speech: SpeechOutputPlayer,
    resume: Option<PendingResume>,
}

impl VoiceInteractionController {
    pub fn new(
        config: VoiceConfig,
        engines: Engines,
        handler: Arc<dyn TurnHandler>,
        handle: &ControllerHandle,
    ) -> Self {
        let permission = match engines.microphone.get() {
            Ok(microphone) => microphone.permission(),
            Err(_) => MicPermission::Unavailable,
        };
        let countdown = SilenceCountdownTimer::new(config.idle_delay, config.countdown_seconds);
        let monitor = AudioLevelMonitor::new(config.frame_period, config.speech_threshold);
        let speech = SpeechOutputPlayer::new(engines.synthesizer.clone(), config.language.clone());

        info!(
            microphone = ?engines.microphone,
            recognizer = ?engines.recognizer,
            synthesizer = ?engines.synthesizer,
            "voice capabilities resolved"
        );

        Self {
            auto_send: config.auto_send,
            hands_free: config.hands_free,
            config,
            engines,
            handler,
            tx: handle.tx.clone(),
            event_tx: handle.events.clone(),
            status: VoiceStatus::Idle,
            status_entered_at: Instant::now(),
            permission,
            processing: false,
            session: 0,
            transcript: TranscriptAccumulator::new(),
            countdown,
            monitor,
            recognition: None,
            retry: RetryState::default(),
            stop_grace: None,
            send_task: None,
            last_level: 0.0,
            speech,
            resume: None,
        }
    }

    pub fn status(&self) -> VoiceStatus {
        self.status
    }

    /// Run the controller, processing inputs in arrival order
    pub async fn run(&mut self, mut inputs: mpsc::UnboundedReceiver<Input>) {
        info!("voice controller started in Idle status");

        while let Some(input) = inputs.recv().await {
            self.handle_input(input).await;
        }

        self.teardown_session();
        info!("voice controller stopped");
    }

    async fn handle_input(&mut self, input: Input) {
        match input {
            Input::Command(command) => self.handle_command(command).await,
            Input::Recognition { stream, event } => self.on_recognition_event(stream, event),
            Input::Frame { session } if session == self.session => self.on_frame(),
            Input::Frame { .. } => {}
            Input::IdleElapsed { session, epoch } => self.on_idle_elapsed(session, epoch),
            Input::CountdownTick { session, epoch } => self.on_countdown_tick(session, epoch),
            Input::RetryDue { session } => self.on_retry_due(session).await,
            Input::StopGraceElapsed { session } => self.on_stop_grace(session),
            Input::SendResolved { session, error } => self.on_send_resolved(session, error),
            Input::SpeechFinished { utterance, error } => self.on_speech_finished(utterance, error),
            Input::ResumeListening { utterance } => self.on_resume(utterance).await,
        }
    }

    async fn handle_command(&mut self, command: Command) {
        debug!(?command, "voice command");
        match command {
            Command::StartRecording => self.start_recording().await,
            Command::StopRecording => self.stop_recording(),
            Command::CancelRecording => self.cancel_recording(),
            Command::Speak(text) => self.speak(&text),
            Command::StopSpeaking => self.stop_speaking(),
            Command::SetHandsFree(enabled) => self.set_hands_free(enabled),
            Command::SetAutoSend(enabled) => {
                self.auto_send = enabled;
                info!(enabled, "auto-send updated");
            }
            Command::SetProcessing(processing) => {
                self.processing = processing;
                debug!(processing, "caller processing flag updated");
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    pub fn snapshot(&self) -> VoiceSnapshot {
        VoiceSnapshot {
            status: self.status,
            permission: self.permission,
            transcript: self.transcript.transcript().clone(),
            audio_level: self.monitor.level(),
            countdown: self.countdown.state(),
            retry: self.retry,
            hands_free: self.hands_free,
            auto_send: self.auto_send,
            speaking: self.speech.is_speaking(),
            processing: self.is_processing(),
        }
    }

    fn is_processing(&self) -> bool {
        self.processing || self.status == VoiceStatus::Sending
    }

    /// Acquire the microphone and start a new recognition session
    pub async fn start_recording(&mut self) {
        match self.status {
            VoiceStatus::Sending => {
                debug!("start ignored while a turn is being sent");
                return;
            }
            VoiceStatus::Listening | VoiceStatus::Countdown => {
                info!("restarting recording, aborting active session");
                self.teardown_session();
                self.transition_to(VoiceStatus::Idle);
            }
            VoiceStatus::Idle => {
                if self.recognition.is_some() {
                    self.teardown_session();
                }
            }
        }

        // the microphone must not pick up our own reply
        self.cancel_resume();
        if let Some(utterance) = self.speech.stop() {
            self.emit(VoiceEvent::SpeakingFinished {
                utterance,
                completed: false,
            });
        }

        let microphone = self.engines.microphone.clone();
        let recognizer = self.engines.recognizer.clone();
        let (microphone, recognizer) = match (microphone.get(), recognizer.get()) {
            (Ok(m), Ok(r)) => (Arc::clone(m), Arc::clone(r)),
            (Err(e), _) => {
                self.set_permission(MicPermission::Unavailable);
                self.fail(e);
                return;
            }
            (_, Err(e)) => {
                self.fail(e);
                return;
            }
        };

        self.session += 1;
        let session = self.session;
        self.transcript.reset();
        self.countdown.cancel();
        self.retry = RetryState::default();
        self.last_level = 0.0;
        self.emit_transcript();

        if let Err(e) = self.monitor.start(microphone.as_ref(), session, &self.tx).await {
            match e {
                VoiceError::PermissionDenied => self.set_permission(MicPermission::Denied),
                VoiceError::MicUnavailable(_) => self.set_permission(MicPermission::Unavailable),
                _ => {}
            }
            self.fail(e);
            return;
        }
        self.set_permission(MicPermission::Granted);

        let options = RecognitionOptions::new(self.config.language.clone());
        match RecognitionSession::start(
            recognizer,
            options,
            session,
            self.config.max_retries,
            self.config.retry_delay,
            &self.tx,
        )
        .await
        {
            Ok(recognition) => self.recognition = Some(recognition),
            Err(e) => {
                self.fail(e);
                return;
            }
        }

        self.transition_to(VoiceStatus::Listening);
    }

    /// End recording and hand off whatever was transcribed
    pub fn stop_recording(&mut self) {
        if !self.status.is_recording() {
            debug!(status = %self.status, "stop ignored, not recording");
            return;
        }
        if self.stop_pending() {
            return;
        }

        self.countdown.cancel();
        self.stop_monitor();

        let outcome = match self.recognition.as_mut() {
            Some(recognition) => recognition.stop(),
            None => StopOutcome::Ended,
        };
        if self.transcript.has_final_text() {
            self.transition_to(VoiceStatus::Sending);
        }

        match outcome {
            StopOutcome::Pending => {
                self.stop_grace = Some(task::after(
                    self.config.stop_grace,
                    self.tx.clone(),
                    Input::StopGraceElapsed {
                        session: self.session,
                    },
                ));
            }
            StopOutcome::Ended => self.finalize(),
        }
    }

    /// Abandon the session; nothing is handed off
    pub fn cancel_recording(&mut self) {
        if !self.status.is_recording() && self.recognition.is_none() {
            debug!(status = %self.status, "cancel ignored, not recording");
            return;
        }

        self.teardown_session();
        self.transcript.reset();
        self.retry = RetryState::default();
        self.emit_transcript();
        self.transition_to(VoiceStatus::Idle);
        self.notify(VoiceError::Aborted);
    }

    fn stop_pending(&self) -> bool {
        self.recognition
            .as_ref()
            .is_some_and(|recognition| recognition.stop_requested())
    }

    /// Release recognition, timers and the monitor without handing anything off
    fn teardown_session(&mut self) {
        self.countdown.cancel();
        self.stop_grace = None;
        if let Some(mut recognition) = self.recognition.take() {
            recognition.abort();
        }
        self.stop_monitor();
    }

    fn stop_monitor(&mut self) {
        self.monitor.stop();
        if self.last_level != 0.0 {
            self.last_level = 0.0;
            self.emit(VoiceEvent::AudioLevel { level: 0.0 });
        }
    }

    /// Fatal failure: release everything, return to idle, tell the user
    fn fail(&mut self, error: VoiceError) {
        error!(?error, status = %self.status, "voice session failed");
        self.teardown_session();
        self.transcript.reset();
        self.emit_transcript();
        self.transition_to(VoiceStatus::Idle);
        self.notify(error);
    }

    /// The session ended normally; deliver the transcript if there is one
    fn finalize(&mut self) {
        if let Some(mut recognition) = self.recognition.take() {
            recognition.finish();
        }
        self.stop_grace = None;
        self.countdown.cancel();
        self.stop_monitor();

        let text = self.transcript.take_final().trim().to_string();
        self.emit_transcript();

        if text.is_empty() {
            self.transition_to(VoiceStatus::Idle);
            return;
        }

        if self.auto_send {
            self.transition_to(VoiceStatus::Sending);
            info!(session = self.session, chars = text.len(), "sending voice turn");
            self.emit(VoiceEvent::AutoSend { text: text.clone() });

            let handler = Arc::clone(&self.handler);
            let tx = self.tx.clone();
            let session = self.session;
            self.send_task = Some(ScopedTask::spawn(async move {
                let result = handler.on_auto_send(text).await;
                let _ = tx.send(Input::SendResolved {
                    session,
                    error: result.err().map(|e| format!("{:#}", e)),
                });
            }));
        } else {
            info!(session = self.session, chars = text.len(), "voice turn transcribed");
            self.emit(VoiceEvent::Transcription { text: text.clone() });
            self.handler.on_transcription(text);
            self.transition_to(VoiceStatus::Idle);
        }
    }

    fn on_send_resolved(&mut self, session: u64, error: Option<String>) {
        if session != self.session || self.status != VoiceStatus::Sending {
            return;
        }
        self.send_task = None;
        if let Some(error) = error {
            warn!(%error, "send callback failed");
            self.emit(VoiceEvent::Error {
                kind: ErrorKind::Fatal,
                message: format!("Message could not be sent: {}", error),
            });
        }
        self.transcript.reset();
        self.transition_to(VoiceStatus::Idle);
    }

    fn on_stop_grace(&mut self, session: u64) {
        if session == self.session && self.stop_pending() {
            warn!(session, "recognition did not end after stop, finalizing");
            self.finalize();
        }
    }

    fn on_recognition_event(&mut self, stream: u64, event: RecognitionEvent) {
        let owned = self
            .recognition
            .as_ref()
            .is_some_and(|recognition| recognition.owns_stream(stream));
        if !owned {
            debug!(stream, "stale recognition event dropped");
            return;
        }

        match event {
            RecognitionEvent::Start => debug!(stream, "recognition engine started"),
            RecognitionEvent::Result { fragments } => self.on_result(&fragments),
            RecognitionEvent::Error { code, message } => self.on_recognition_error(code, &message),
            RecognitionEvent::End => {
                debug!(stream, "recognition engine ended");
                self.finalize();
            }
        }
    }

    fn on_result(&mut self, fragments: &[Fragment]) {
        let outcome = self.transcript.apply_result(fragments);
        self.emit_transcript();

        if self.stop_pending() || !self.status.is_recording() {
            return;
        }
        // interim-only updates do not interrupt the countdown
        if outcome.final_appended {
            self.note_activity();
            if self.transcript.has_final_text() {
                self.countdown.schedule_idle(self.session, &self.tx);
            }
        }
    }

    fn on_recognition_error(&mut self, code: RecognitionErrorCode, message: &str) {
        let has_transcript = self.transcript.has_final_text();
        let Some(recognition) = self.recognition.as_mut() else {
            return;
        };
        debug!(%code, message, "recognition error");
        let disposition = recognition.on_error(code, has_transcript);
        self.retry = recognition.retry_state();

        match disposition {
            ErrorDisposition::Retrying { attempt } => {
                debug!(attempt, "recognition restart scheduled");
            }
            ErrorDisposition::PermissionDenied => {
                self.set_permission(MicPermission::Denied);
                self.fail(VoiceError::PermissionDenied);
            }
            ErrorDisposition::Notice(message) => self.emit(VoiceEvent::Notice { message }),
            ErrorDisposition::Ignore => {}
            ErrorDisposition::Fatal(error) => self.fail(error),
        }
    }

    async fn on_retry_due(&mut self, session: u64) {
        if session != self.session {
            return;
        }
        let Some(recognition) = self.recognition.as_mut() else {
            return;
        };
        let result = recognition.restart().await;
        self.retry = recognition.retry_state();

        if let Err(e) = result {
            warn!(?e, "recognition restart failed");
            self.fail(e);
        }
    }

    fn on_frame(&mut self) {
        let Some(sample) = self.monitor.sample() else {
            return;
        };

        if (sample.level - self.last_level).abs() >= 0.01
            || (sample.level == 0.0 && self.last_level != 0.0)
        {
            self.last_level = sample.level;
            self.emit(VoiceEvent::AudioLevel {
                level: sample.level,
            });
        }

        if sample.speech_detected && self.status == VoiceStatus::Countdown {
            self.note_activity();
            if self.transcript.has_final_text() {
                self.countdown.schedule_idle(self.session, &self.tx);
            }
        }
    }

    /// Demote a running countdown back to listening
    fn note_activity(&mut self) {
        if self.countdown.note_activity() {
            self.emit(VoiceEvent::CountdownCancelled);
            self.transition_to(VoiceStatus::Listening);
        }
    }

    fn on_idle_elapsed(&mut self, session: u64, epoch: u64) {
        if session != self.session
            || self.status != VoiceStatus::Listening
            || self.stop_pending()
            || !self.countdown.is_current_idle(epoch)
            || !self.transcript.has_final_text()
        {
            return;
        }
        if self.countdown.arm_if_idle(epoch, session, &self.tx) {
            self.transition_to(VoiceStatus::Countdown);
            self.emit(VoiceEvent::CountdownStarted {
                seconds: self.countdown.length(),
            });
        }
    }

    fn on_countdown_tick(&mut self, session: u64, epoch: u64) {
        if session != self.session {
            return;
        }
        match self.countdown.tick(epoch) {
            Tick::Stale => {}
            Tick::Remaining(seconds_remaining) => {
                self.emit(VoiceEvent::CountdownTick { seconds_remaining })
            }
            Tick::Expired => {
                self.emit(VoiceEvent::CountdownTick {
                    seconds_remaining: 0,
                });
                info!(session, "countdown expired, stopping recognition");
                self.stop_recording();
            }
        }
    }

    /// Speak a reply, or stop the current one if already speaking
    pub fn speak(&mut self, text: &str) {
        match self.speech.speak(text, &self.tx) {
            Ok(SpeakOutcome::Started { utterance }) => {
                self.cancel_resume();
                self.emit(VoiceEvent::SpeakingStarted { utterance });
            }
            Ok(SpeakOutcome::Cancelled { utterance }) => {
                self.cancel_resume();
                self.emit(VoiceEvent::SpeakingFinished {
                    utterance,
                    completed: false,
                });
            }
            Err(e) => {
                warn!(?e, "speech output unavailable");
                self.notify(e);
            }
        }
    }

    pub fn stop_speaking(&mut self) {
        self.cancel_resume();
        if let Some(utterance) = self.speech.stop() {
            self.emit(VoiceEvent::SpeakingFinished {
                utterance,
                completed: false,
            });
        }
    }

    pub fn set_hands_free(&mut self, enabled: bool) {
        if self.hands_free == enabled {
            return;
        }
        self.hands_free = enabled;
        if !enabled {
            self.cancel_resume();
        }
        info!(enabled, "hands-free mode updated");
        self.emit(VoiceEvent::HandsFreeChanged { enabled });
    }

    fn on_speech_finished(&mut self, utterance: u64, error: Option<String>) {
        if !self.speech.finish(utterance) {
            debug!(utterance, "completion for stopped utterance ignored");
            return;
        }
        let completed = error.is_none();
        if let Some(error) = error {
            warn!(utterance, %error, "speech playback failed");
            self.emit(VoiceEvent::Error {
                kind: ErrorKind::Fatal,
                message: format!("Reply could not be spoken: {}", error),
            });
        }
        self.emit(VoiceEvent::SpeakingFinished {
            utterance,
            completed,
        });
        if completed {
            self.schedule_resume(utterance);
        }
    }

    fn schedule_resume(&mut self, utterance: u64) {
        if !self.hands_free {
            return;
        }
        if self.is_processing() || self.status != VoiceStatus::Idle {
            debug!(
                status = %self.status,
                processing = self.processing,
                "hands-free resume skipped"
            );
            return;
        }
        self.resume = Some(PendingResume {
            utterance,
            _timer: task::after(
                self.config.hands_free_delay,
                self.tx.clone(),
                Input::ResumeListening { utterance },
            ),
        });
    }

    fn cancel_resume(&mut self) {
        if self.resume.take().is_some() {
            debug!("pending hands-free resume cancelled");
        }
    }

    async fn on_resume(&mut self, utterance: u64) {
        match self.resume.take() {
            Some(pending) if pending.utterance == utterance => {}
            other => {
                self.resume = other;
                return;
            }
        }
        if !self.hands_free || self.is_processing() || self.status != VoiceStatus::Idle {
            debug!("hands-free resume no longer applicable");
            return;
        }
        info!(utterance, "hands-free: listening again");
        self.start_recording().await;
    }

    fn transition_to(&mut self, new_status: VoiceStatus) {
        let old_status = self.status;
        if old_status == new_status {
            return;
        }
        let duration_ms = self.status_entered_at.elapsed().as_millis() as u64;

        info!(
            from = %old_status,
            to = %new_status,
            duration_ms,
            session = self.session,
            "voice status transition"
        );

        self.status = new_status;
        self.status_entered_at = Instant::now();
        self.emit(VoiceEvent::StatusChanged {
            from: old_status,
            to: new_status,
            duration_ms,
        });
    }

    fn set_permission(&mut self, permission: MicPermission) {
        if self.permission != permission {
            info!(?permission, "microphone permission changed");
            self.permission = permission;
            self.emit(VoiceEvent::PermissionChanged { permission });
        }
    }

    fn emit_transcript(&self) {
        let transcript = self.transcript.transcript();
        self.emit(VoiceEvent::TranscriptUpdated {
            final_text: transcript.final_text.clone(),
            interim_text: transcript.interim_text.clone(),
        });
    }

    /// Surface a failure: expected outcomes as a notice, the rest as an error
    fn notify(&self, error: VoiceError) {
        let kind = error.kind();
        let message = error.user_message();
        match kind {
            ErrorKind::Aborted | ErrorKind::NoSpeechDetected => {
                self.emit(VoiceEvent::Notice { message })
            }
            _ => self.emit(VoiceEvent::Error { kind, message }),
        }
    }

    fn emit(&self, event: VoiceEvent) {
        debug!(%event, "emitting voice event");
        let _ = self.event_tx.send(event);
    }
}
