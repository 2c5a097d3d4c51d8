//! Single-slot scheduled tasks.
//!
//! Every timer owned by the connection (reconnect delay, ping interval, pong timeout,
//! health check) lives in its own [`ScheduledTask`]. Scheduling replaces whatever was in
//! the slot, so timers never pile up across rapid connect/disconnect cycles.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};

#[derive(Debug, Default)]
pub(crate) struct ScheduledTask {
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Run `future` in the slot, cancelling the previous occupant.
    pub(crate) fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(future));
    }

    /// Run `future` after `delay`.
    pub(crate) fn schedule<F>(&mut self, delay: Duration, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            sleep(delay).await;
            future.await;
        });
    }

    /// Call `tick` every `period`, starting one period from now, until it returns `false`.
    pub(crate) fn repeat<F>(&mut self, period: Duration, mut tick: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !tick() {
                    break;
                }
            }
        });
    }

    /// Abort the task in the slot. Safe to call when nothing is scheduled.
    pub(crate) fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Whether the slot holds a task that has not finished yet.
    pub(crate) fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
