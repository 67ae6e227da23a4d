//! Application configuration.

use std::time::Duration;

use l2fwd::api::dev::eth::PortId;
use l2fwd::api::dev::pktmbuf::DEFAULT_MBUF_DATA_ROOM_SIZE;
use l2fwd::fwd::{BURST_SIZE, IdlePolicy, TransformMode};

/// Default RX ring size
pub const RX_RING_SIZE: u16 = 1024;

/// Default TX ring size
pub const TX_RING_SIZE: u16 = 1024;

/// Default mbufs per port
pub const NUM_MBUFS: u32 = 8191;

/// Default per-worker mbuf cache size
pub const MBUF_CACHE_SIZE: u32 = 250;

/// Configuration for [`L2FwdApp`](crate::L2FwdApp).
///
/// # Example
///
/// ```
/// use l2fwd::fwd::TransformMode;
/// use l2fwd_util::AppConfig;
///
/// let config = AppConfig::new()
///     .ports(1, 0)
///     .transform(TransformMode::RewriteSource)
///     .burst_size(16);
/// assert_eq!(config.ingress(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub(crate) mempool_name: String,
    pub(crate) num_mbufs: u32,
    pub(crate) cache_size: u32,
    pub(crate) data_room_size: u16,
    pub(crate) rx_desc: u16,
    pub(crate) tx_desc: u16,
    pub(crate) tx_free_thresh: u16,
    pub(crate) mtu: u32,
    pub(crate) promiscuous: bool,
    pub(crate) ingress: PortId,
    pub(crate) egress: PortId,
    pub(crate) transform: TransformMode,
    pub(crate) bidirectional: bool,
    pub(crate) burst_size: usize,
    pub(crate) idle_policy: IdlePolicy,
    pub(crate) lcore: Option<usize>,
    pub(crate) stats_interval: Option<Duration>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mempool_name: "MBUF_POOL".to_string(),
            num_mbufs: NUM_MBUFS,
            cache_size: MBUF_CACHE_SIZE,
            data_room_size: DEFAULT_MBUF_DATA_ROOM_SIZE,
            rx_desc: RX_RING_SIZE,
            tx_desc: TX_RING_SIZE,
            tx_free_thresh: 32,
            mtu: 1500,
            promiscuous: true,
            ingress: 0,
            egress: 1,
            transform: TransformMode::Transparent,
            bidirectional: false,
            burst_size: BURST_SIZE,
            idle_policy: IdlePolicy::BusyPoll,
            lcore: None,
            stats_interval: None,
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mempool_name(mut self, name: impl Into<String>) -> Self {
        self.mempool_name = name.into();
        self
    }

    /// Mbufs per port; the pool holds this many times the number of ports.
    pub fn num_mbufs(mut self, n: u32) -> Self {
        self.num_mbufs = n;
        self
    }

    pub fn cache_size(mut self, n: u32) -> Self {
        self.cache_size = n;
        self
    }

    pub fn data_room_size(mut self, n: u16) -> Self {
        self.data_room_size = n;
        self
    }

    /// Set RX/TX descriptors (default: 1024).
    pub fn descriptors(mut self, rx: u16, tx: u16) -> Self {
        self.rx_desc = rx;
        self.tx_desc = tx;
        self
    }

    pub fn tx_free_thresh(mut self, n: u16) -> Self {
        self.tx_free_thresh = n;
        self
    }

    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn promiscuous(mut self, enable: bool) -> Self {
        self.promiscuous = enable;
        self
    }

    /// Set the ingress and egress ports (default: 0 and 1).
    pub fn ports(mut self, ingress: PortId, egress: PortId) -> Self {
        self.ingress = ingress;
        self.egress = egress;
        self
    }

    pub fn transform(mut self, mode: TransformMode) -> Self {
        self.transform = mode;
        self
    }

    /// Also forward egress to ingress on the same worker.
    pub fn bidirectional(mut self, enable: bool) -> Self {
        self.bidirectional = enable;
        self
    }

    pub fn burst_size(mut self, n: usize) -> Self {
        self.burst_size = n;
        self
    }

    pub fn idle_policy(mut self, policy: IdlePolicy) -> Self {
        self.idle_policy = policy;
        self
    }

    /// Run the forwarding loop on a thread pinned to this CPU.
    pub fn lcore(mut self, cpu: Option<usize>) -> Self {
        self.lcore = cpu;
        self
    }

    /// Log forwarding rates at this interval.
    pub fn stats_interval(mut self, interval: Option<Duration>) -> Self {
        self.stats_interval = interval;
        self
    }

    pub fn ingress(&self) -> PortId {
        self.ingress
    }

    pub fn egress(&self) -> PortId {
        self.egress
    }

    pub fn transform_mode(&self) -> TransformMode {
        self.transform
    }

    pub fn is_bidirectional(&self) -> bool {
        self.bidirectional
    }
}
