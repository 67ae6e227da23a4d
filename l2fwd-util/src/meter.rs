//! Periodic forwarding-rate logger.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use l2fwd::fwd::{FwdStats, FwdSummary};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Longest the meter sleeps before re-checking its token.
const POLL_STEP: Duration = Duration::from_millis(50);

/// Background thread logging per-interval packet rates.
pub struct Meter {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Meter {
    /// Spawn a meter over the given session counters.
    ///
    /// The meter runs until `token` is cancelled or [`Meter::stop`] is called.
    pub fn spawn(
        stats: Vec<Arc<FwdStats>>,
        interval: Duration,
        token: CancellationToken,
    ) -> io::Result<Self> {
        let meter_token = token.clone();
        let handle = thread::Builder::new()
            .name("l2fwd-meter".to_string())
            .spawn(move || meter_loop(&stats, interval, &meter_token))?;
        Ok(Self { token, handle })
    }

    /// Stop the meter and wait for its thread.
    pub fn stop(self) {
        self.token.cancel();
        if self.handle.join().is_err() {
            debug!("meter thread panicked");
        }
    }
}

fn total(stats: &[Arc<FwdStats>]) -> FwdSummary {
    stats.iter().map(|s| s.snapshot()).sum()
}

fn meter_loop(stats: &[Arc<FwdStats>], interval: Duration, token: &CancellationToken) {
    let mut prev = total(stats);
    let mut last = Instant::now();
    while !token.is_cancelled() {
        thread::sleep(POLL_STEP.min(interval));
        let elapsed = last.elapsed();
        if elapsed < interval {
            continue;
        }
        let cur = total(stats);
        let delta = cur - prev;
        let secs = elapsed.as_secs_f64();
        info!(
            rx_pps = (delta.rx_packets as f64 / secs) as u64,
            tx_pps = (delta.tx_packets as f64 / secs) as u64,
            tx_mbps = (delta.tx_bytes as f64 * 8.0 / secs / 1e6) as u64,
            dropped = delta.dropped,
            "forwarding rate"
        );
        prev = cur;
        last = Instant::now();
    }
}
