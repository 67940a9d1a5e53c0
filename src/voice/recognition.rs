//! One recognition session
//!
//! A session spans one `start_recording()` call. Inside it the engine stream
//! may be restarted after recoverable errors; each engine stream gets a fresh
//! stream id so events from a replaced stream are recognisably stale. Engine
//! events are forwarded into the controller channel by a scoped task, which is
//! aborted whenever the stream is detached.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::controller::Input;
use super::engine::{RecognitionControl, RecognitionOptions, RecognitionStream, SpeechRecognizer};
use super::error::{ErrorClass, RecognitionErrorCode, VoiceError};
use super::status::RetryState;
use super::task::{self, ScopedTask};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// What the controller should do about an engine error
#[derive(Debug)]
pub enum ErrorDisposition {
    /// A restart has been scheduled
    Retrying { attempt: u32 },
    /// Permission was refused; the session must end
    PermissionDenied,
    /// Informational notice, the session continues
    Notice(String),
    /// Nothing to do
    Ignore,
    /// The session must end with this error
    Fatal(VoiceError),
}

/// Result of asking the session to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The engine will deliver `End`
    Pending,
    /// No engine stream was running; the session is already over
    Ended,
}

struct ActiveStream {
    id: u64,
    control: Box<dyn RecognitionControl>,
    _forwarder: ScopedTask,
}

pub struct RecognitionSession {
    session: u64,
    recognizer: Arc<dyn SpeechRecognizer>,
    options: RecognitionOptions,
    tx: mpsc::UnboundedSender<Input>,
    stream: Option<ActiveStream>,
    retry: RetryState,
    max_retries: u32,
    retry_delay: Duration,
    retry_timer: Option<ScopedTask>,
    stop_requested: bool,
}

impl RecognitionSession {
    /// Start the engine for a new session
    pub async fn start(
        recognizer: Arc<dyn SpeechRecognizer>,
        options: RecognitionOptions,
        session: u64,
        max_retries: u32,
        retry_delay: Duration,
        tx: &mpsc::UnboundedSender<Input>,
    ) -> Result<Self, VoiceError> {
        let mut this = Self {
            session,
            recognizer,
            options,
            tx: tx.clone(),
            stream: None,
            retry: RetryState::default(),
            max_retries,
            retry_delay,
            retry_timer: None,
            stop_requested: false,
        };
        this.open_stream().await?;
        info!(session, language = %this.options.language, "recognition session started");
        Ok(this)
    }

    async fn open_stream(&mut self) -> Result<(), VoiceError> {
        let RecognitionStream { mut events, control } = self.recognizer.start(&self.options).await?;

        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let tx = self.tx.clone();
        let forwarder = ScopedTask::spawn(async move {
            while let Some(event) = events.recv().await {
                if tx.send(Input::Recognition { stream: id, event }).is_err() {
                    break;
                }
            }
        });

        self.stream = Some(ActiveStream {
            id,
            control,
            _forwarder: forwarder,
        });
        debug!(session = self.session, stream = id, "recognition stream opened");
        Ok(())
    }

    /// Whether events tagged `stream` belong to the running engine stream
    pub fn owns_stream(&self, stream: u64) -> bool {
        self.stream.as_ref().map(|s| s.id) == Some(stream)
    }

    pub fn retry_state(&self) -> RetryState {
        self.retry
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Classify an engine error and act on it
    pub fn on_error(
        &mut self,
        code: RecognitionErrorCode,
        has_transcript: bool,
    ) -> ErrorDisposition {
        match code.class() {
            ErrorClass::Aborted => ErrorDisposition::Ignore,
            ErrorClass::NoSpeech if has_transcript => ErrorDisposition::Ignore,
            ErrorClass::NoSpeech => {
                ErrorDisposition::Notice("No speech was detected. Try speaking again.".to_string())
            }
            ErrorClass::PermissionDenied => ErrorDisposition::PermissionDenied,
            ErrorClass::Fatal => ErrorDisposition::Fatal(VoiceError::Recognition {
                message: format!("recognition failed: {}", code),
                code,
            }),
            ErrorClass::Recoverable if self.stop_requested => {
                // the transcript is going out anyway
                ErrorDisposition::Ignore
            }
            ErrorClass::Recoverable => {
                if self.retry.attempts_used >= self.max_retries {
                    warn!(
                        session = self.session,
                        attempts = self.retry.attempts_used,
                        %code,
                        "recognition retries exhausted"
                    );
                    return ErrorDisposition::Fatal(VoiceError::RetriesExhausted {
                        attempts: self.retry.attempts_used,
                        code,
                    });
                }
                self.detach_stream();
                self.retry.attempts_used += 1;
                self.retry.is_retrying = true;
                self.retry_timer = Some(task::after(
                    self.retry_delay,
                    self.tx.clone(),
                    Input::RetryDue {
                        session: self.session,
                    },
                ));
                info!(
                    session = self.session,
                    attempt = self.retry.attempts_used,
                    %code,
                    "recoverable recognition error, restarting"
                );
                ErrorDisposition::Retrying {
                    attempt: self.retry.attempts_used,
                }
            }
        }
    }

    /// Run a scheduled restart
    ///
    /// Returns `Ok(false)` if no restart was pending.
    pub async fn restart(&mut self) -> Result<bool, VoiceError> {
        if !self.retry.is_retrying || self.stop_requested {
            return Ok(false);
        }
        self.retry_timer = None;
        self.retry.is_retrying = false;
        self.open_stream().await?;
        info!(
            session = self.session,
            attempt = self.retry.attempts_used,
            "recognition restarted"
        );
        Ok(true)
    }

    /// Ask the engine to finish and deliver what it has
    pub fn stop(&mut self) -> StopOutcome {
        self.stop_requested = true;
        self.retry_timer = None;
        self.retry.is_retrying = false;
        match self.stream.as_mut() {
            Some(stream) => {
                stream.control.stop();
                debug!(session = self.session, stream = stream.id, "recognition stop requested");
                StopOutcome::Pending
            }
            None => StopOutcome::Ended,
        }
    }

    /// End immediately; no further events from this session are delivered
    pub fn abort(&mut self) {
        self.retry_timer = None;
        self.retry.is_retrying = false;
        self.detach_stream();
        debug!(session = self.session, "recognition aborted");
    }

    /// The engine ended the stream; drop it without signalling the engine
    pub fn finish(&mut self) {
        self.retry_timer = None;
        self.stream = None;
    }

    /// Drop the engine stream; a failed stream may still hold the device, so
    /// the engine is always told to abort
    fn detach_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.control.abort();
            debug!(stream = stream.id, "recognition stream released");
        }
    }
}

impl Drop for RecognitionSession {
    fn drop(&mut self) {
        if self.stream.is_some() {
            self.abort();
        }
    }
}
