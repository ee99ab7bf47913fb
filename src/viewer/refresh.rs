//! Local one-second repaint loop.

use tokio::time::{Duration, Instant, Interval, MissedTickBehavior};

/// Periodic repaint trigger that can be switched on and off.
///
/// The underlying [`Interval`] is only created on the first [`tick`](Self::tick)
/// after [`start`](Self::start), so toggling works outside a runtime.
#[derive(Debug)]
pub struct RefreshLoop {
    period: Duration,
    active: bool,
    ticker: Option<Interval>,
}

impl RefreshLoop {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            active: false,
            ticker: None,
        }
    }

    /// Activates the loop. Starting an active loop is a no-op.
    pub fn start(&mut self) {
        if !self.active {
            tracing::trace!("再描画ループを開始します");
            self.active = true;
        }
    }

    /// Deactivates the loop. Stopping a stopped loop is a no-op.
    pub fn stop(&mut self) {
        if self.active {
            tracing::trace!("再描画ループを停止します");
        }
        self.active = false;
        self.ticker = None;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Resolves on the next repaint instant; never resolves while inactive.
    pub async fn tick(&mut self) {
        if !self.active {
            std::future::pending::<()>().await;
        }
        let period = self.period;
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        ticker.tick().await;
    }
}
