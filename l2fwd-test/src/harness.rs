//! Ring-device test harness
//!
//! Provides reusable components for forwarding tests:
//! - `TestConfig` - pool and port settings, with builder setters
//! - `TestContext` - RAII struct holding the ring driver, pool and started ports
//!
//! For end-to-end runs, prefer `L2FwdApp` from `l2fwd-util`.

use std::sync::Arc;

use l2fwd::api::Errno;
use l2fwd::api::dev::driver::EthDriver;
use l2fwd::api::dev::eth::{EthDev, EthDevBuilder, PortId, RxQueueConf, TxQueueConf};
use l2fwd::api::dev::pktmbuf::{DEFAULT_MBUF_DATA_ROOM_SIZE, MemPool, MemPoolConfig};
use l2fwd::api::dev::ring::RingDriver;
use l2fwd::fwd::{Session, Transform, TransformMode};

/// Default number of mbufs in a test pool
pub const DEFAULT_NUM_MBUFS: u32 = 1024;

/// Default per-worker cache size of a test pool
pub const DEFAULT_CACHE_SIZE: u32 = 32;

/// Default number of descriptors per queue
pub const DEFAULT_NB_DESC: u16 = 256;

/// Settings for a [`TestContext`].
///
/// # Example
/// ```
/// use l2fwd_test::harness::TestConfig;
///
/// let ctx = TestConfig::new().nb_ports(2).num_mbufs(64).build().unwrap();
/// assert_eq!(ctx.mempool().capacity(), 64);
/// ```
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub(crate) mempool_name: String,
    pub(crate) nb_ports: u16,
    pub(crate) num_mbufs: u32,
    pub(crate) cache_size: u32,
    pub(crate) data_room_size: u16,
    pub(crate) rx_desc: u16,
    pub(crate) tx_desc: u16,
    pub(crate) tx_free_thresh: u16,
    pub(crate) promiscuous: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfig {
    pub fn new() -> Self {
        Self {
            mempool_name: "test_mempool".to_string(),
            nb_ports: 2,
            num_mbufs: DEFAULT_NUM_MBUFS,
            cache_size: DEFAULT_CACHE_SIZE,
            data_room_size: DEFAULT_MBUF_DATA_ROOM_SIZE,
            rx_desc: DEFAULT_NB_DESC,
            tx_desc: DEFAULT_NB_DESC,
            tx_free_thresh: 0,
            promiscuous: true,
        }
    }

    pub fn mempool_name(mut self, name: impl Into<String>) -> Self {
        self.mempool_name = name.into();
        self
    }

    /// Number of ring ports; all of them are configured and started.
    pub fn nb_ports(mut self, n: u16) -> Self {
        self.nb_ports = n;
        self
    }

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

    /// RX and TX descriptors per queue.
    pub fn nb_desc(mut self, n: u16) -> Self {
        self.rx_desc = n;
        self.tx_desc = n;
        self
    }

    /// TX descriptors per queue, i.e. how many buffers a TX queue holds
    /// before it stops accepting.
    pub fn tx_desc(mut self, n: u16) -> Self {
        self.tx_desc = n;
        self
    }

    /// TX auto-reclaim threshold. 0 (the default here) leaves every
    /// transmitted buffer in flight until [`TestContext::complete_tx`].
    pub fn tx_free_thresh(mut self, n: u16) -> Self {
        self.tx_free_thresh = n;
        self
    }

    pub fn promiscuous(mut self, enable: bool) -> Self {
        self.promiscuous = enable;
        self
    }

    /// Create the pool, then configure and start every port.
    pub fn build(self) -> Result<TestContext, Errno> {
        let ring = Arc::new(RingDriver::new(self.nb_ports));
        let driver: Arc<dyn EthDriver> = ring.clone();

        let pool_config = MemPoolConfig::new()
            .num_mbufs(self.num_mbufs)
            .cache_size(self.cache_size)
            .data_room_size(self.data_room_size);
        let mempool = MemPool::create(self.mempool_name.clone(), &pool_config)?;

        let mut ports = Vec::with_capacity(self.nb_ports as usize);
        for port_id in 0..self.nb_ports {
            let dev = EthDevBuilder::new(port_id)
                .rx_queue_conf(RxQueueConf::new().nb_desc(self.rx_desc))
                .tx_queue_conf(
                    TxQueueConf::new()
                        .nb_desc(self.tx_desc)
                        .free_thresh(self.tx_free_thresh),
                )
                .promiscuous(self.promiscuous)
                .build(&driver, &mempool)
                .map_err(|e| e.errno)?;
            ports.push(dev);
        }

        Ok(TestContext {
            ring,
            driver,
            mempool,
            ports,
        })
    }
}

/// Test context holding all resources needed for a test.
///
/// This is an RAII struct: dropping it stops and closes every port.
pub struct TestContext {
    ring: Arc<RingDriver>,
    driver: Arc<dyn EthDriver>,
    mempool: MemPool,
    ports: Vec<EthDev>,
}

impl TestContext {
    /// The ring driver, for injecting and capturing frames.
    pub fn ring(&self) -> &Arc<RingDriver> {
        &self.ring
    }

    pub fn driver(&self) -> &Arc<dyn EthDriver> {
        &self.driver
    }

    pub fn mempool(&self) -> &MemPool {
        &self.mempool
    }

    /// Panics if `port_id` was not built.
    pub fn eth_dev(&self, port_id: PortId) -> &EthDev {
        &self.ports[port_id as usize]
    }

    pub fn eth_dev_mut(&mut self, port_id: PortId) -> &mut EthDev {
        &mut self.ports[port_id as usize]
    }

    /// Build a session forwarding queue 0 of `from` to queue 0 of `to`.
    pub fn session(&self, from: PortId, to: PortId, mode: TransformMode) -> Result<Session, Errno> {
        let rxq = self.eth_dev(from).rx_queue(0)?;
        let txq = self.eth_dev(to).tx_queue(0)?;
        let mac = self.eth_dev(to).mac_addr()?;
        Ok(Session::new(rxq, txq, Transform::new(mode, mac)))
    }

    /// Inject `frame` on queue 0 of `port_id`.
    pub fn inject(&self, port_id: PortId, frame: &[u8]) -> bool {
        self.ring.inject(port_id, 0, frame)
    }

    /// Drain the frames transmitted on `port_id`.
    pub fn transmitted(&self, port_id: PortId) -> Vec<Vec<u8>> {
        self.ring.take_transmitted(port_id)
    }

    /// Complete every in-flight transmission on queue 0 of `port_id`.
    pub fn complete_tx(&self, port_id: PortId) -> usize {
        self.ring.complete_tx(port_id, 0)
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        for dev in self.ports.iter_mut() {
            if let Err(e) = dev.stop() {
                eprintln!("Warning: Failed to stop port {}: {:?}", dev.port_id(), e);
            }
            if let Err(e) = dev.close() {
                eprintln!("Warning: Failed to close port {}: {:?}", dev.port_id(), e);
            }
        }
    }
}
