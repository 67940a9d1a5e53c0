//! Microphone level monitoring for the recording indicator
//!
//! The monitor owns the open input stream and a frame ticker. Each tick the
//! controller asks for a sample: the analyser's byte spectrum is averaged and
//! normalised against a fixed ceiling.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::controller::Input;
use super::engine::{AudioInput, AudioStream};
use super::error::VoiceError;
use super::task::{self, ScopedTask};

/// Number of analyser bins sampled per frame
pub const FREQUENCY_BINS: usize = 128;

/// Average bin magnitude that maps to a full-scale level
pub const LEVEL_REFERENCE_CEILING: f32 = 128.0;

/// Normalise a byte spectrum to `[0, 1]`
pub fn normalized_level(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let sum: u32 = bins.iter().map(|&b| b as u32).sum();
    let average = sum as f32 / bins.len() as f32;
    (average / LEVEL_REFERENCE_CEILING).clamp(0.0, 1.0)
}

/// One frame's reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelSample {
    pub level: f32,
    pub speech_detected: bool,
}

pub struct AudioLevelMonitor {
    frame_period: Duration,
    threshold: f32,
    stream: Option<Box<dyn AudioStream>>,
    ticker: Option<ScopedTask>,
    bins: Vec<u8>,
    level: f32,
}

impl AudioLevelMonitor {
    pub fn new(frame_period: Duration, threshold: f32) -> Self {
        Self {
            frame_period,
            threshold,
            stream: None,
            ticker: None,
            bins: vec![0; FREQUENCY_BINS],
            level: 0.0,
        }
    }

    /// Acquire the microphone and start the frame loop for `session`
    pub async fn start(
        &mut self,
        input: &dyn AudioInput,
        session: u64,
        tx: &mpsc::UnboundedSender<Input>,
    ) -> Result<(), VoiceError> {
        self.stop();

        let stream = input.open().await?;
        self.stream = Some(stream);
        self.ticker = Some(task::every(self.frame_period, tx.clone(), move || {
            Input::Frame { session }
        }));
        debug!(session, "level monitor started");
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    /// Read the current level; `None` once stopped
    pub fn sample(&mut self) -> Option<LevelSample> {
        let stream = self.stream.as_mut()?;
        self.bins.iter_mut().for_each(|b| *b = 0);
        stream.read_frequency_data(&mut self.bins);
        self.level = normalized_level(&self.bins);
        Some(LevelSample {
            level: self.level,
            speech_detected: self.level > self.threshold,
        })
    }

    /// Cancel the frame loop and release the stream; safe to call repeatedly
    pub fn stop(&mut self) {
        self.ticker = None;
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close() {
                warn!(?e, "audio stream rejected close, continuing");
            }
            debug!("level monitor stopped");
        }
        self.level = 0.0;
    }
}

impl Drop for AudioLevelMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::testing::FakeMicrophone;

    #[test]
    fn test_normalized_level() {
        assert_eq!(normalized_level(&[]), 0.0);
        assert_eq!(normalized_level(&[0; 64]), 0.0);
        assert!((normalized_level(&[64; 64]) - 0.5).abs() < 1e-6);
        assert_eq!(normalized_level(&[255; 64]), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_and_speech_threshold() {
        let mic = FakeMicrophone::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut monitor = AudioLevelMonitor::new(Duration::from_millis(16), 0.1);

        monitor.start(&mic, 3, &tx).await.unwrap();
        tokio::time::sleep(Duration::from_millis(17)).await;
        assert!(matches!(rx.try_recv(), Ok(Input::Frame { session: 3 })));

        mic.set_magnitude(6);
        let quiet = monitor.sample().unwrap();
        assert!(!quiet.speech_detected);

        mic.set_magnitude(90);
        let loud = monitor.sample().unwrap();
        assert!(loud.speech_detected);
        assert!(loud.level > 0.7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_resets_level() {
        let mic = FakeMicrophone::new();
        mic.set_magnitude(100);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut monitor = AudioLevelMonitor::new(Duration::from_millis(16), 0.1);

        monitor.stop();
        monitor.start(&mic, 1, &tx).await.unwrap();
        monitor.sample();
        assert!(monitor.level() > 0.0);

        monitor.stop();
        monitor.stop();
        assert_eq!(monitor.level(), 0.0);
        assert!(monitor.sample().is_none());
        assert_eq!(mic.closed(), 1);

        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_failure_is_tolerated() {
        let mic = FakeMicrophone::new();
        mic.fail_close();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut monitor = AudioLevelMonitor::new(Duration::from_millis(16), 0.1);

        monitor.start(&mic, 1, &tx).await.unwrap();
        monitor.stop();
        assert!(!monitor.is_active());
    }

    #[tokio::test]
    async fn test_open_failure_leaves_monitor_inactive() {
        let mic = FakeMicrophone::new();
        mic.deny_permission();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut monitor = AudioLevelMonitor::new(Duration::from_millis(16), 0.1);

        let err = monitor.start(&mic, 1, &tx).await.unwrap_err();
        assert!(matches!(err, VoiceError::PermissionDenied));
        assert!(!monitor.is_active());
    }
}
