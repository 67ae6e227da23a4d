use std::sync::Arc;
use std::thread;
use std::time::Duration;

use smoltcp::wire::ETHERNET_HEADER_LEN;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::BURST_SIZE;
use super::stats::{BurstCounts, FwdStats, FwdSummary};
use super::transform::Transform;
use crate::api::dev::driver::{Burst, MAX_BURST_SIZE};
use crate::api::dev::eth::{PortId, QueueId};
use crate::api::dev::queue::{RxQueue, TxQueue};

/// State of a [`Forwarder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Not entered yet.
    Idle,
    /// Cycling bursts.
    Running,
    /// Stop observed, finishing the current cycle.
    Draining,
    /// Terminal; no further receive is attempted.
    Stopped,
}

/// What the loop does after a cycle in which no session received anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdlePolicy {
    /// Retry immediately.
    #[default]
    BusyPoll,
    /// Yield the CPU to the scheduler.
    Yield,
    /// Park the thread for a fixed time.
    Sleep(Duration),
}

impl IdlePolicy {
    #[inline]
    fn idle(&self) {
        match *self {
            IdlePolicy::BusyPoll => std::hint::spin_loop(),
            IdlePolicy::Yield => thread::yield_now(),
            IdlePolicy::Sleep(d) => thread::sleep(d),
        }
    }
}

/// One ingress queue paired with one egress queue.
pub struct Session {
    rxq: RxQueue,
    txq: TxQueue,
    transform: Transform,
    stats: Arc<FwdStats>,
}

impl Session {
    pub fn new(rxq: RxQueue, txq: TxQueue, transform: Transform) -> Self {
        Self {
            rxq,
            txq,
            transform,
            stats: Arc::new(FwdStats::new()),
        }
    }

    /// Publish counters into an existing `FwdStats`.
    pub fn with_stats(mut self, stats: Arc<FwdStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<FwdStats> {
        &self.stats
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn ingress(&self) -> (PortId, QueueId) {
        (self.rxq.port_id(), self.rxq.queue_id())
    }

    pub fn egress(&self) -> (PortId, QueueId) {
        (self.txq.port_id(), self.txq.queue_id())
    }

    /// Give the queues back, e.g. to hand them to another loop.
    pub fn into_queues(self) -> (RxQueue, TxQueue) {
        (self.rxq, self.txq)
    }

    /// Run one receive, transform, transmit, release pass.
    ///
    /// `burst` must be empty and is empty again on return: packets the egress
    /// queue does not accept are released to their pool, never resubmitted.
    /// Returns the number of packets received.
    #[inline]
    pub fn forward_burst(&mut self, burst: &mut Burst, burst_size: usize) -> usize {
        debug_assert!(burst.is_empty());
        let nb_rx = self.rxq.rx(burst, burst_size);
        if nb_rx == 0 {
            self.stats.record_empty_poll();
            return 0;
        }

        let mut counts = BurstCounts {
            rx_packets: nb_rx as u64,
            ..Default::default()
        };
        for mbuf in burst.iter_mut() {
            let len = mbuf.data_len();
            counts.rx_bytes += len as u64;
            if len < ETHERNET_HEADER_LEN {
                counts.runts += 1;
                continue;
            }
            self.transform.apply(mbuf.data_mut());
        }

        let nb_tx = self.txq.tx(burst);
        counts.tx_packets = nb_tx as u64;
        counts.tx_bytes = counts.rx_bytes;
        if nb_tx < nb_rx {
            for mbuf in burst.drain(..) {
                counts.tx_bytes -= mbuf.data_len() as u64;
                counts.dropped += 1;
                mbuf.free();
            }
        }
        self.stats.record_burst(&counts);
        nb_rx
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("ingress", &self.ingress())
            .field("egress", &self.egress())
            .field("transform", &self.transform)
            .finish()
    }
}

/// Polling forwarding loop over one or more sessions.
///
/// Each cycle forwards one burst per session, in order. The stop token is
/// checked once per cycle, before any receive.
pub struct Forwarder {
    sessions: Vec<Session>,
    burst: Burst,
    burst_size: usize,
    idle: IdlePolicy,
    state: LoopState,
}

impl Forwarder {
    pub fn new(session: Session) -> Self {
        Self::with_sessions(vec![session])
    }

    pub fn with_sessions(sessions: Vec<Session>) -> Self {
        Self {
            sessions,
            burst: Burst::new(),
            burst_size: BURST_SIZE,
            idle: IdlePolicy::default(),
            state: LoopState::Idle,
        }
    }

    /// Packets requested per receive, clamped to `1..=MAX_BURST_SIZE`.
    pub fn burst_size(mut self, n: usize) -> Self {
        self.burst_size = n.clamp(1, MAX_BURST_SIZE);
        self
    }

    pub fn idle_policy(mut self, policy: IdlePolicy) -> Self {
        self.idle = policy;
        self
    }

    #[inline]
    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn stats(&self) -> Vec<Arc<FwdStats>> {
        self.sessions.iter().map(|s| s.stats.clone()).collect()
    }

    /// Counters summed over all sessions.
    pub fn summary(&self) -> FwdSummary {
        self.sessions.iter().map(|s| s.stats.snapshot()).sum()
    }

    /// Run a single cycle. Returns the number of packets received.
    #[inline]
    pub fn poll_once(&mut self) -> usize {
        let mut received = 0;
        for session in self.sessions.iter_mut() {
            received += session.forward_burst(&mut self.burst, self.burst_size);
        }
        received
    }

    /// Forward until `stop` is cancelled.
    ///
    /// A loop runs once: calling this again after it stopped returns the
    /// final counters without receiving anything.
    pub fn run(&mut self, stop: &CancellationToken) -> FwdSummary {
        if self.state != LoopState::Idle {
            warn!(state = ?self.state, "forwarding loop already ran");
            return self.summary();
        }
        self.state = LoopState::Running;
        info!(
            sessions = self.sessions.len(),
            burst_size = self.burst_size,
            idle = ?self.idle,
            "forwarding loop running"
        );

        while !stop.is_cancelled() {
            if self.poll_once() == 0 {
                self.idle.idle();
            }
        }

        self.state = LoopState::Draining;
        // Cycles always end with an empty burst; release anything left anyway.
        self.burst.drain(..).for_each(|mbuf| mbuf.free());
        self.state = LoopState::Stopped;

        let summary = self.summary();
        info!(
            rx = summary.rx_packets,
            tx = summary.tx_packets,
            dropped = summary.dropped,
            runts = summary.runts,
            "forwarding loop stopped"
        );
        summary
    }

    pub fn into_sessions(self) -> Vec<Session> {
        self.sessions
    }
}
