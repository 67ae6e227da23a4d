use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicU64, Ordering};

/// Forwarding counters for one session.
///
/// Written by the worker that owns the session, read by anyone (the stats
/// meter, the lifecycle controller).
#[derive(Debug, Default)]
pub struct FwdStats {
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    dropped: AtomicU64,
    runts: AtomicU64,
    empty_polls: AtomicU64,
}

impl FwdStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn bump(counter: &AtomicU64, n: u64) {
        if n != 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_empty_poll(&self) {
        self.empty_polls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_burst(&self, burst: &BurstCounts) {
        Self::bump(&self.rx_packets, burst.rx_packets);
        Self::bump(&self.rx_bytes, burst.rx_bytes);
        Self::bump(&self.tx_packets, burst.tx_packets);
        Self::bump(&self.tx_bytes, burst.tx_bytes);
        Self::bump(&self.dropped, burst.dropped);
        Self::bump(&self.runts, burst.runts);
    }

    pub fn snapshot(&self) -> FwdSummary {
        FwdSummary {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            runts: self.runts.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
        }
    }
}

/// Per-burst tallies, accumulated locally and published once per burst.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct BurstCounts {
    pub(crate) rx_packets: u64,
    pub(crate) rx_bytes: u64,
    pub(crate) tx_packets: u64,
    pub(crate) tx_bytes: u64,
    pub(crate) dropped: u64,
    pub(crate) runts: u64,
}

/// Point-in-time copy of [`FwdStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FwdSummary {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    /// Packets released because the egress queue did not accept them.
    pub dropped: u64,
    /// Frames shorter than an Ethernet header, forwarded untouched.
    pub runts: u64,
    pub empty_polls: u64,
}

impl Add for FwdSummary {
    type Output = FwdSummary;

    fn add(self, rhs: FwdSummary) -> FwdSummary {
        FwdSummary {
            rx_packets: self.rx_packets + rhs.rx_packets,
            rx_bytes: self.rx_bytes + rhs.rx_bytes,
            tx_packets: self.tx_packets + rhs.tx_packets,
            tx_bytes: self.tx_bytes + rhs.tx_bytes,
            dropped: self.dropped + rhs.dropped,
            runts: self.runts + rhs.runts,
            empty_polls: self.empty_polls + rhs.empty_polls,
        }
    }
}

impl Sub for FwdSummary {
    type Output = FwdSummary;

    /// Counter deltas between two snapshots, `self` being the later one.
    fn sub(self, rhs: FwdSummary) -> FwdSummary {
        FwdSummary {
            rx_packets: self.rx_packets.saturating_sub(rhs.rx_packets),
            rx_bytes: self.rx_bytes.saturating_sub(rhs.rx_bytes),
            tx_packets: self.tx_packets.saturating_sub(rhs.tx_packets),
            tx_bytes: self.tx_bytes.saturating_sub(rhs.tx_bytes),
            dropped: self.dropped.saturating_sub(rhs.dropped),
            runts: self.runts.saturating_sub(rhs.runts),
            empty_polls: self.empty_polls.saturating_sub(rhs.empty_polls),
        }
    }
}

impl std::iter::Sum for FwdSummary {
    fn sum<I: Iterator<Item = FwdSummary>>(iter: I) -> FwdSummary {
        iter.fold(FwdSummary::default(), Add::add)
    }
}
