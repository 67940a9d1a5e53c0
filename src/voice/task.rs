//! Scoped background tasks
//!
//! Every timer and forwarding loop the controller depends on is a spawned
//! tokio task wrapped in a `ScopedTask`, which aborts the task when dropped.
//! Components hold these as fields, so tearing a component down cancels its
//! event sources.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// A spawned task that is aborted when this handle is dropped
#[derive(Debug)]
pub struct ScopedTask {
    handle: JoinHandle<()>,
}

impl ScopedTask {
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }
}

impl Drop for ScopedTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Deliver `message` once after `delay`
pub fn after<T>(delay: Duration, tx: mpsc::UnboundedSender<T>, message: T) -> ScopedTask
where
    T: Send + 'static,
{
    ScopedTask::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.send(message);
    })
}

/// Deliver `make()` every `period`, starting one period from now
pub fn every<T, F>(period: Duration, tx: mpsc::UnboundedSender<T>, make: F) -> ScopedTask
where
    T: Send + 'static,
    F: Fn() -> T + Send + 'static,
{
    ScopedTask::spawn(async move {
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            if tx.send(make()).is_err() {
                break;
            }
        }
    })
}
