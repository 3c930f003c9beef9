//! Round clock

use rvr_core::{RvrError, RvrResult};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Interval, MissedTickBehavior};

/// Resolves once the exit flag is set or its sender is gone
pub async fn wait_for_exit(exit: &mut watch::Receiver<bool>) {
    loop {
        if *exit.borrow_and_update() {
            return;
        }
        if exit.changed().await.is_err() {
            return;
        }
    }
}

/// Ticker of period `round_duration` that doubles as an exit point.
/// Missed ticks are skipped rather than replayed.
pub struct RoundClock {
    interval: Interval,
    exit: watch::Receiver<bool>,
}

impl RoundClock {
    pub fn new(period: Duration, exit: watch::Receiver<bool>) -> Self {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval, exit }
    }

    /// Wait for the next tick, or fail with `Exited` once the node exits
    pub async fn tick(&mut self) -> RvrResult<()> {
        if *self.exit.borrow() {
            return Err(RvrError::Exited);
        }
        tokio::select! {
            biased;
            _ = wait_for_exit(&mut self.exit) => Err(RvrError::Exited),
            _ = self.interval.tick() => Ok(()),
        }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}
