use std::future::Future;

use super::config::KeepaliveConfig;
use super::task::ScheduledTask;

/// Ping scheduling and pong-timeout detection for one socket.
///
/// The monitor only owns the timers; sending the ping and closing a stale socket is up to
/// the connection, which is notified through the callbacks passed in.
#[derive(Debug)]
pub(crate) struct KeepaliveMonitor {
    config: KeepaliveConfig,
    ping: ScheduledTask,
    pong_timeout: ScheduledTask,
    awaiting_pong: bool,
}

impl KeepaliveMonitor {
    pub(crate) fn new(config: KeepaliveConfig) -> Self {
        Self {
            config,
            ping: ScheduledTask::new(),
            pong_timeout: ScheduledTask::new(),
            awaiting_pong: false,
        }
    }

    pub(crate) fn config(&self) -> KeepaliveConfig {
        self.config
    }

    /// Start the periodic ping timer. `tick` runs every interval until it returns `false`.
    ///
    /// The first ping is not sent by the timer; the connection sends it right after open.
    pub(crate) fn start<F>(&mut self, tick: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.stop();
        self.ping.repeat(self.config.ping_interval, tick);
    }

    /// A ping went out. Arms the pong timeout unless one is already running.
    pub(crate) fn ping_sent<F>(&mut self, on_timeout: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.awaiting_pong = true;
        if !self.pong_timeout.is_pending() {
            self.pong_timeout.schedule(self.config.pong_timeout, on_timeout);
        }
    }

    /// A pong arrived. Returns `false` if none was expected.
    pub(crate) fn pong_received(&mut self) -> bool {
        self.pong_timeout.cancel();
        std::mem::replace(&mut self.awaiting_pong, false)
    }

    /// Whether a fired pong timeout still applies.
    pub(crate) fn is_awaiting_pong(&self) -> bool {
        self.awaiting_pong
    }

    /// Clear every timer.
    pub(crate) fn stop(&mut self) {
        self.ping.cancel();
        self.pong_timeout.cancel();
        self.awaiting_pong = false;
    }

    pub(crate) fn pending_timers(&self) -> usize {
        usize::from(self.ping.is_pending()) + usize::from(self.pong_timeout.is_pending())
    }
}
