use attendance_common::scan::AutoScanInterval;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::state::Trigger;
use super::Core;

/// Periodic scan trigger. Dropping it cancels the timer; scans it already
/// started run to completion.
pub(crate) struct AutoScanTimer {
    handle: JoinHandle<()>,
    interval: AutoScanInterval,
}

impl AutoScanTimer {
    pub fn start(core: Arc<Core>, interval: AutoScanInterval) -> Self {
        let period = interval.period();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                // Drop the tick rather than queue it behind a slow submission.
                if core.is_busy() {
                    debug!(interval_ms = interval.as_millis(), "auto-scan tick dropped, scan in flight");
                    continue;
                }
                let core = core.clone();
                tokio::spawn(async move {
                    core.scan_once(Trigger::Auto).await;
                });
            }
        });
        info!(interval_ms = interval.as_millis(), "auto-scan timer started");
        Self { handle, interval }
    }
}

impl Drop for AutoScanTimer {
    fn drop(&mut self) {
        self.handle.abort();
        info!(interval_ms = self.interval.as_millis(), "auto-scan timer cancelled");
    }
}
