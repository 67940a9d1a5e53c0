//! Silence countdown
//!
//! Two timers: an idle window that restarts on every final fragment, and a
//! one-second countdown that starts when the idle window elapses. Each
//! scheduled timer carries an epoch; `cancel()` both aborts the timer tasks and
//! bumps the epoch, so a tick already in flight is ignored.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use super::controller::Input;
use super::status::CountdownState;
use super::task::{self, ScopedTask};

/// Result of processing a countdown tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Tick from a cancelled or superseded countdown
    Stale,
    Remaining(u32),
    /// Reached zero; reported exactly once per countdown
    Expired,
}

pub struct SilenceCountdownTimer {
    idle_delay: Duration,
    length: u32,
    seconds_remaining: u32,
    counting: bool,
    epoch: u64,
    idle: Option<ScopedTask>,
    ticker: Option<ScopedTask>,
}

impl SilenceCountdownTimer {
    pub fn new(idle_delay: Duration, length: u32) -> Self {
        Self {
            idle_delay,
            length: length.max(1),
            seconds_remaining: length.max(1),
            counting: false,
            epoch: 0,
            idle: None,
            ticker: None,
        }
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn is_counting(&self) -> bool {
        self.counting
    }

    pub fn state(&self) -> Option<CountdownState> {
        self.counting.then_some(CountdownState {
            seconds_remaining: self.seconds_remaining,
        })
    }

    /// Restart the idle window after a final fragment
    ///
    /// The previous window, if any, is dropped, so arming only happens a full
    /// window after the last fragment.
    pub fn schedule_idle(&mut self, session: u64, tx: &mpsc::UnboundedSender<Input>) {
        self.epoch += 1;
        let epoch = self.epoch;
        self.idle = Some(task::after(
            self.idle_delay,
            tx.clone(),
            Input::IdleElapsed { session, epoch },
        ));
    }

    /// Start counting down if the idle window `epoch` is still current
    ///
    /// The caller only invokes this while listening with non-empty text.
    pub fn arm_if_idle(
        &mut self,
        epoch: u64,
        session: u64,
        tx: &mpsc::UnboundedSender<Input>,
    ) -> bool {
        if epoch != self.epoch || self.counting {
            return false;
        }
        self.idle = None;
        self.epoch += 1;
        let epoch = self.epoch;
        self.counting = true;
        self.seconds_remaining = self.length;
        self.ticker = Some(task::every(Duration::from_secs(1), tx.clone(), move || {
            Input::CountdownTick { session, epoch }
        }));
        debug!(seconds = self.length, "countdown armed");
        true
    }

    /// Whether an idle-window message belongs to the current window
    pub fn is_current_idle(&self, epoch: u64) -> bool {
        epoch == self.epoch && self.idle.is_some()
    }

    /// Process one countdown tick
    pub fn tick(&mut self, epoch: u64) -> Tick {
        if !self.counting || epoch != self.epoch {
            return Tick::Stale;
        }
        self.seconds_remaining = self.seconds_remaining.saturating_sub(1);
        if self.seconds_remaining == 0 {
            self.counting = false;
            self.ticker = None;
            self.epoch += 1;
            Tick::Expired
        } else {
            Tick::Remaining(self.seconds_remaining)
        }
    }

    /// Speech or a new final fragment arrived
    ///
    /// Returns true when a running countdown was cancelled; the caller then
    /// demotes the status back to listening.
    pub fn note_activity(&mut self) -> bool {
        if !self.counting {
            return false;
        }
        self.stop_counting();
        debug!("countdown interrupted by activity");
        true
    }

    /// Cancel both timers; nothing scheduled so far can expire afterwards
    pub fn cancel(&mut self) {
        self.idle = None;
        self.stop_counting();
    }

    fn stop_counting(&mut self) {
        self.counting = false;
        self.ticker = None;
        self.seconds_remaining = self.length;
        self.epoch += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer() -> (
        SilenceCountdownTimer,
        mpsc::UnboundedSender<Input>,
        mpsc::UnboundedReceiver<Input>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SilenceCountdownTimer::new(Duration::from_millis(1500), 2), tx, rx)
    }

    fn idle_epoch(rx: &mut mpsc::UnboundedReceiver<Input>) -> u64 {
        match rx.try_recv() {
            Ok(Input::IdleElapsed { epoch, .. }) => epoch,
            other => panic!("expected idle message, got {:?}", other),
        }
    }

    fn tick_epoch(rx: &mut mpsc::UnboundedReceiver<Input>) -> u64 {
        match rx.try_recv() {
            Ok(Input::CountdownTick { epoch, .. }) => epoch,
            other => panic!("expected tick, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_window_arms_countdown() {
        let (mut countdown, tx, mut rx) = timer();
        countdown.schedule_idle(1, &tx);

        tokio::time::sleep(Duration::from_millis(1501)).await;
        let epoch = idle_epoch(&mut rx);
        assert!(countdown.is_current_idle(epoch));
        assert!(countdown.arm_if_idle(epoch, 1, &tx));
        assert_eq!(countdown.state(), Some(CountdownState { seconds_remaining: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_supersedes_previous_window() {
        let (mut countdown, tx, mut rx) = timer();
        countdown.schedule_idle(1, &tx);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        countdown.schedule_idle(1, &tx);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(501)).await;
        let epoch = idle_epoch(&mut rx);
        assert!(countdown.arm_if_idle(epoch, 1, &tx));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_expires_exactly_once() {
        let (mut countdown, tx, mut rx) = timer();
        countdown.schedule_idle(1, &tx);
        tokio::time::sleep(Duration::from_millis(1501)).await;
        let epoch = idle_epoch(&mut rx);
        countdown.arm_if_idle(epoch, 1, &tx);

        tokio::time::sleep(Duration::from_millis(1001)).await;
        let tick = tick_epoch(&mut rx);
        assert_eq!(countdown.tick(tick), Tick::Remaining(1));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let tick = tick_epoch(&mut rx);
        assert_eq!(countdown.tick(tick), Tick::Expired);
        assert!(!countdown.is_counting());

        // a duplicate delivery of the last tick is stale
        assert_eq!(countdown.tick(tick), Tick::Stale);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_resets_remaining() {
        let (mut countdown, tx, mut rx) = timer();
        countdown.schedule_idle(1, &tx);
        tokio::time::sleep(Duration::from_millis(1501)).await;
        let epoch = idle_epoch(&mut rx);
        countdown.arm_if_idle(epoch, 1, &tx);

        tokio::time::sleep(Duration::from_millis(1001)).await;
        let tick = tick_epoch(&mut rx);
        assert_eq!(countdown.tick(tick), Tick::Remaining(1));

        assert!(countdown.note_activity());
        assert!(!countdown.is_counting());
        assert_eq!(countdown.state(), None);

        // re-arming starts from the full length again
        countdown.schedule_idle(1, &tx);
        tokio::time::sleep(Duration::from_millis(1501)).await;
        let epoch = idle_epoch(&mut rx);
        countdown.arm_if_idle(epoch, 1, &tx);
        assert_eq!(countdown.state(), Some(CountdownState { seconds_remaining: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_without_countdown_is_noop() {
        let (mut countdown, _tx, _rx) = timer();
        assert!(!countdown.note_activity());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_countdown_never_expires() {
        let (mut countdown, tx, mut rx) = timer();
        countdown.schedule_idle(1, &tx);
        tokio::time::sleep(Duration::from_millis(1501)).await;
        let epoch = idle_epoch(&mut rx);
        countdown.arm_if_idle(epoch, 1, &tx);

        tokio::time::sleep(Duration::from_millis(1001)).await;
        let pending = tick_epoch(&mut rx);
        countdown.cancel();

        assert_eq!(countdown.tick(pending), Tick::Stale);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_idle_window_does_not_arm() {
        let (mut countdown, tx, mut rx) = timer();
        countdown.schedule_idle(1, &tx);
        let epoch = countdown.epoch;
        countdown.cancel();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
        assert!(!countdown.is_current_idle(epoch));
        assert!(!countdown.arm_if_idle(epoch, 1, &tx));
    }
}
