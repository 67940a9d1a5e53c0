//! Microphone backed by a capture command
//!
//! The command writes mono signed 16-bit little-endian PCM to stdout. A reader
//! task keeps the most recent window of samples; the level monitor pulls an
//! analyser-style byte spectrum from it once per frame.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::voice::{AudioInput, AudioStream, ScopedTask, VoiceError};

/// Samples per analysis window; yields `FFT_SIZE / 2` bins
const FFT_SIZE: usize = 256;

/// Decibel range mapped onto `0..=255`
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// How long the capture command may take to produce its first audio
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 4096;

/// Windowed FFT producing a byte spectrum
pub struct SpectrumAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyser {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let window = (0..FFT_SIZE)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (FFT_SIZE - 1) as f32).cos())
            })
            .collect();

        Self {
            fft,
            window,
            buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
        }
    }

    /// Write one byte per bin into `out`; missing samples count as silence
    pub fn byte_spectrum(&mut self, samples: &[f32], out: &mut [u8]) {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = samples.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buffer);

        for (byte, bin) in out.iter_mut().zip(self.buffer.iter().take(FFT_SIZE / 2)) {
            let magnitude = bin.norm() / FFT_SIZE as f32;
            let decibels = 20.0 * magnitude.max(1e-10).log10();
            let scaled =
                ((decibels - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS)).clamp(0.0, 1.0);
            *byte = (scaled * 255.0).round() as u8;
        }
    }
}

impl Default for SpectrumAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolling window of the latest samples
#[derive(Default)]
struct SampleWindow {
    samples: VecDeque<f32>,
    /// Odd trailing byte from the previous read
    pending: Option<u8>,
}

impl SampleWindow {
    fn push_bytes(&mut self, bytes: &[u8]) {
        let mut bytes = bytes.iter().copied();
        if let Some(low) = self.pending.take() {
            match bytes.next() {
                Some(high) => self.push_sample(i16::from_le_bytes([low, high])),
                None => {
                    self.pending = Some(low);
                    return;
                }
            }
        }
        loop {
            match (bytes.next(), bytes.next()) {
                (Some(low), Some(high)) => self.push_sample(i16::from_le_bytes([low, high])),
                (Some(low), None) => {
                    self.pending = Some(low);
                    break;
                }
                _ => break,
            }
        }
    }

    fn push_sample(&mut self, sample: i16) {
        if self.samples.len() == FFT_SIZE {
            self.samples.pop_front();
        }
        self.samples.push_back(sample as f32 / i16::MAX as f32);
    }
}

pub struct CommandMicrophone {
    command: Vec<String>,
}

impl CommandMicrophone {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl AudioInput for CommandMicrophone {
    async fn open(&self) -> Result<Box<dyn AudioStream>, VoiceError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| VoiceError::MicUnavailable("empty capture command".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    VoiceError::MicUnavailable(format!("capture command {} not found", program))
                }
                _ => VoiceError::Io(e),
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| VoiceError::MicUnavailable("capture stdout unavailable".to_string()))?;

        let mut first = vec![0u8; READ_CHUNK];
        let read = match tokio::time::timeout(OPEN_TIMEOUT, stdout.read(&mut first)).await {
            Ok(Ok(n)) if n > 0 => n,
            Ok(_) => return Err(capture_failure(&mut child).await),
            Err(_) => {
                return Err(VoiceError::MicUnavailable(
                    "capture command produced no audio".to_string(),
                ))
            }
        };

        let window = Arc::new(Mutex::new(SampleWindow::default()));
        if let Ok(mut w) = window.lock() {
            w.push_bytes(&first[..read]);
        }
        let reader = ScopedTask::spawn(read_samples(stdout, Arc::clone(&window)));

        info!(program = %program, "microphone capture started");
        Ok(Box::new(CommandStream {
            child,
            window,
            analyser: SpectrumAnalyser::new(),
            scratch: Vec::with_capacity(FFT_SIZE),
            _reader: reader,
        }))
    }
}

async fn read_samples(mut stdout: ChildStdout, window: Arc<Mutex<SampleWindow>>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => {
                debug!("capture stream ended");
                break;
            }
            Ok(n) => {
                if let Ok(mut w) = window.lock() {
                    w.push_bytes(&buf[..n]);
                }
            }
            Err(e) => {
                warn!(?e, "capture read failed");
                break;
            }
        }
    }
}

/// Map an early exit of the capture command to a voice error
async fn capture_failure(child: &mut Child) -> VoiceError {
    let mut message = String::new();
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_string(&mut message).await;
    }
    classify_capture_error(&message)
}

fn classify_capture_error(stderr: &str) -> VoiceError {
    let lower = stderr.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") {
        VoiceError::PermissionDenied
    } else if stderr.trim().is_empty() {
        VoiceError::MicUnavailable("capture command exited".to_string())
    } else {
        VoiceError::MicUnavailable(stderr.trim().to_string())
    }
}

struct CommandStream {
    child: Child,
    window: Arc<Mutex<SampleWindow>>,
    analyser: SpectrumAnalyser,
    scratch: Vec<f32>,
    _reader: ScopedTask,
}

impl AudioStream for CommandStream {
    fn read_frequency_data(&mut self, bins: &mut [u8]) {
        self.scratch.clear();
        if let Ok(w) = self.window.lock() {
            self.scratch.extend(w.samples.iter().copied());
        }
        self.analyser.byte_spectrum(&self.scratch, bins);
    }

    fn close(&mut self) -> Result<(), VoiceError> {
        debug!("stopping microphone capture");
        self.child.start_kill().map_err(VoiceError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::{normalized_level, FREQUENCY_BINS};

    fn sine(bin: usize) -> Vec<f32> {
        (0..FFT_SIZE)
            .map(|i| (2.0 * std::f32::consts::PI * bin as f32 * i as f32 / FFT_SIZE as f32).sin())
            .collect()
    }

    #[test]
    fn test_silence_is_all_zero() {
        let mut analyser = SpectrumAnalyser::new();
        let mut bins = [0xffu8; FREQUENCY_BINS];
        analyser.byte_spectrum(&[0.0; FFT_SIZE], &mut bins);
        assert!(bins.iter().all(|&b| b == 0));
        assert_eq!(normalized_level(&bins), 0.0);
    }

    #[test]
    fn test_tone_lights_its_bin() {
        let mut analyser = SpectrumAnalyser::new();
        let mut bins = [0u8; FREQUENCY_BINS];
        analyser.byte_spectrum(&sine(16), &mut bins);
        assert_eq!(bins[16], 255);
        assert!(bins[60] < 50);
    }

    #[test]
    fn test_sample_window_joins_split_samples() {
        let mut window = SampleWindow::default();
        let bytes = 1000i16.to_le_bytes();
        window.push_bytes(&bytes[..1]);
        assert!(window.samples.is_empty());
        window.push_bytes(&bytes[1..]);
        assert_eq!(window.samples.len(), 1);
        assert!((window.samples[0] - 1000.0 / i16::MAX as f32).abs() < 1e-6);

        window.push_bytes(&vec![0u8; FFT_SIZE * 4]);
        assert_eq!(window.samples.len(), FFT_SIZE);
    }

    #[test]
    fn test_capture_errors_are_classified() {
        assert!(matches!(
            classify_capture_error("arecord: audio open error: Permission denied"),
            VoiceError::PermissionDenied
        ));
        assert!(matches!(
            classify_capture_error("no such device"),
            VoiceError::MicUnavailable(_)
        ));
        assert!(matches!(classify_capture_error(""), VoiceError::MicUnavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_command_is_unavailable() {
        let mic = CommandMicrophone::new(vec!["voice-loop-no-such-capture-tool".to_string()]);
        let err = mic.open().await.err().unwrap();
        assert!(matches!(err, VoiceError::MicUnavailable(_)));
    }

    #[tokio::test]
    async fn test_capture_denied_by_command() {
        let mic = CommandMicrophone::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo 'microphone permission denied' >&2; exit 1".to_string(),
        ]);
        let err = mic.open().await.err().unwrap();
        assert!(matches!(err, VoiceError::PermissionDenied));
    }

    #[tokio::test]
    async fn test_silent_capture_reads_zero_spectrum() {
        let mic = CommandMicrophone::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "head -c 2048 /dev/zero; exec sleep 5".to_string(),
        ]);
        let mut stream = mic.open().await.unwrap();
        let mut bins = [0u8; FREQUENCY_BINS];
        stream.read_frequency_data(&mut bins);
        assert!(bins.iter().all(|&b| b == 0));
        assert!(stream.close().is_ok());
    }
}
