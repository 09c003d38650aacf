//! Transport status ticker.
//!
//! At most one ticker task is alive.  Each tick carries the binding
//! generation it was started for, so a tick that was already queued when the
//! track changed is recognised as stale and dropped.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

pub struct StatusPoller {
    period: Duration,
    tick_tx: mpsc::Sender<u64>,
    ticker: Option<(u64, tokio::task::AbortHandle)>,
}

impl StatusPoller {
    pub fn new(period: Duration, tick_tx: mpsc::Sender<u64>) -> Self {
        Self {
            period,
            tick_tx,
            ticker: None,
        }
    }

    /// Cancel any running ticker, then start one for `generation`.  The
    /// first tick fires one period from now; callers query immediately
    /// themselves.
    pub fn start(&mut self, generation: u64) {
        self.stop();
        let tx = self.tick_tx.clone();
        let period = self.period;
        let task = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if tx.send(generation).await.is_err() {
                    break;
                }
            }
        });
        debug!("poller: started for generation {}", generation);
        self.ticker = Some((generation, task.abort_handle()));
    }

    pub fn stop(&mut self) {
        if let Some((generation, task)) = self.ticker.take() {
            task.abort();
            debug!("poller: stopped generation {}", generation);
        }
    }

    /// True if a tick for `generation` should still be acted on.
    pub fn is_current(&self, generation: u64) -> bool {
        matches!(self.ticker, Some((g, _)) if g == generation)
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
