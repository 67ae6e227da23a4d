// Ethernet port API
//
// `EthDev` wraps one port of an `EthDriver` and enforces the lifecycle
//   Uninitialized -> Configured -> QueuesReady -> Started -> Stopped -> Closed
// A stopped port must be configured again before it can restart.

use std::fmt;
use std::sync::Arc;

use smoltcp::wire::EthernetAddress;
use tracing::debug;

use super::driver::{DevInfo, EthDriver, EthStats};
use super::pktmbuf::MemPool;
use super::queue::{RxQueue, TxQueue};
use crate::api::{Errno, Result};

/// Ethernet device port ID
pub type PortId = u16;

/// Queue ID for RX/TX queues
pub type QueueId = u16;

/// Ethernet device configuration
#[derive(Debug, Clone)]
pub struct EthConf {
    /// Maximum Transfer Unit
    pub mtu: u32,
}

impl Default for EthConf {
    fn default() -> Self {
        Self { mtu: 1500 }
    }
}

impl EthConf {
    /// Create a simple configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set MTU
    pub fn mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }
}

/// RX queue configuration
#[derive(Debug, Clone)]
pub struct RxQueueConf {
    /// Number of descriptors
    pub nb_desc: u16,
}

impl Default for RxQueueConf {
    fn default() -> Self {
        Self { nb_desc: 1024 }
    }
}

impl RxQueueConf {
    /// Create a new RxQueueConf with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of descriptors for the RX ring.
    pub fn nb_desc(mut self, n: u16) -> Self {
        self.nb_desc = n;
        self
    }
}

/// TX queue configuration
#[derive(Debug, Clone)]
pub struct TxQueueConf {
    /// Number of descriptors
    pub nb_desc: u16,
    /// Reclaim completed descriptors once fewer than this many are free.
    /// 0 leaves reclaiming to explicit `done_cleanup` calls.
    pub free_thresh: u16,
}

impl Default for TxQueueConf {
    fn default() -> Self {
        Self {
            nb_desc: 1024,
            free_thresh: 32,
        }
    }
}

impl TxQueueConf {
    /// Create a new TxQueueConf with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of descriptors for the TX ring.
    pub fn nb_desc(mut self, n: u16) -> Self {
        self.nb_desc = n;
        self
    }

    pub fn free_thresh(mut self, n: u16) -> Self {
        self.free_thresh = n;
        self
    }
}

/// Lifecycle state of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Uninitialized,
    Configured,
    QueuesReady,
    Started,
    Stopped,
    Closed,
}

/// Ethernet device wrapper
pub struct EthDev {
    driver: Arc<dyn EthDriver>,
    port_id: PortId,
    state: PortState,
    rx_ready: Vec<bool>,
    tx_ready: Vec<bool>,
}

impl EthDev {
    /// Create a handle for an existing port
    ///
    /// Does not configure or start the device. Fails with `ENODEV` for an
    /// unknown port.
    pub fn new(driver: Arc<dyn EthDriver>, port_id: PortId) -> Result<Self> {
        if !driver.is_valid_port(port_id) {
            return Err(Errno::ENODEV);
        }
        Ok(Self {
            driver,
            port_id,
            state: PortState::Uninitialized,
            rx_ready: Vec::new(),
            tx_ready: Vec::new(),
        })
    }

    /// Get the port ID
    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    #[inline]
    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn driver(&self) -> &Arc<dyn EthDriver> {
        &self.driver
    }

    /// Get the number of available Ethernet devices
    pub fn count_avail(driver: &dyn EthDriver) -> u16 {
        driver.count_avail()
    }

    pub fn nb_rx_queues(&self) -> u16 {
        self.rx_ready.len() as u16
    }

    pub fn nb_tx_queues(&self) -> u16 {
        self.tx_ready.len() as u16
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == PortState::Closed {
            Err(Errno::ENODEV)
        } else {
            Ok(())
        }
    }

    /// Get device info
    pub fn info(&self) -> Result<DevInfo> {
        self.ensure_open()?;
        self.driver.info(self.port_id)
    }

    /// Get the MAC address
    pub fn mac_addr(&self) -> Result<EthernetAddress> {
        self.ensure_open()?;
        self.driver.mac_addr(self.port_id)
    }

    pub fn set_mac_addr(&self, addr: EthernetAddress) -> Result<()> {
        self.ensure_open()?;
        self.driver.set_mac_addr(self.port_id, addr)
    }

    /// Get device statistics
    pub fn stats(&self) -> Result<EthStats> {
        self.ensure_open()?;
        self.driver.stats(self.port_id)
    }

    /// Configure the device
    ///
    /// Allowed before the first start and after a stop. Queues must be set
    /// up again afterwards.
    pub fn configure(&mut self, nb_rx_queues: u16, nb_tx_queues: u16, conf: &EthConf) -> Result<()> {
        match self.state {
            PortState::Closed => return Err(Errno::ENODEV),
            PortState::Started => return Err(Errno::EBUSY),
            _ => {}
        }
        if nb_rx_queues == 0 || nb_tx_queues == 0 {
            return Err(Errno::EINVAL);
        }
        self.driver
            .configure(self.port_id, nb_rx_queues, nb_tx_queues, conf)?;
        self.rx_ready = vec![false; nb_rx_queues as usize];
        self.tx_ready = vec![false; nb_tx_queues as usize];
        self.state = PortState::Configured;
        debug!(
            port_id = self.port_id,
            nb_rx_queues, nb_tx_queues, mtu = conf.mtu, "port configured"
        );
        Ok(())
    }

    /// Clamp requested descriptor counts to what the device supports.
    pub fn adjust_nb_rx_tx_desc(&self, nb_rx_desc: &mut u16, nb_tx_desc: &mut u16) -> Result<()> {
        let info = self.info()?;
        *nb_rx_desc = info.rx_desc_lim.adjust(*nb_rx_desc);
        *nb_tx_desc = info.tx_desc_lim.adjust(*nb_tx_desc);
        Ok(())
    }

    fn ensure_queue_setup(&self, queue_id: QueueId, nb_queues: usize) -> Result<()> {
        match self.state {
            PortState::Configured | PortState::QueuesReady => {}
            PortState::Closed => return Err(Errno::ENODEV),
            _ => return Err(Errno::EINVAL),
        }
        if queue_id as usize >= nb_queues {
            return Err(Errno::EINVAL);
        }
        Ok(())
    }

    fn update_ready(&mut self) {
        if self.rx_ready.iter().all(|r| *r) && self.tx_ready.iter().all(|r| *r) {
            self.state = PortState::QueuesReady;
        }
    }

    /// Setup an RX queue
    ///
    /// Received buffers are drawn from `mempool`.
    pub fn rx_queue_setup(
        &mut self,
        queue_id: QueueId,
        mempool: &MemPool,
        conf: &RxQueueConf,
    ) -> Result<()> {
        self.ensure_queue_setup(queue_id, self.rx_ready.len())?;
        self.driver
            .rx_queue_setup(self.port_id, queue_id, mempool, conf)?;
        self.rx_ready[queue_id as usize] = true;
        self.update_ready();
        Ok(())
    }

    /// Setup a TX queue
    pub fn tx_queue_setup(&mut self, queue_id: QueueId, conf: &TxQueueConf) -> Result<()> {
        self.ensure_queue_setup(queue_id, self.tx_ready.len())?;
        self.driver.tx_queue_setup(self.port_id, queue_id, conf)?;
        self.tx_ready[queue_id as usize] = true;
        self.update_ready();
        Ok(())
    }

    /// Start the device
    ///
    /// Every configured queue must be set up first.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            PortState::QueuesReady => {}
            PortState::Closed => return Err(Errno::ENODEV),
            _ => return Err(Errno::EINVAL),
        }
        self.driver.start(self.port_id)?;
        self.state = PortState::Started;
        Ok(())
    }

    /// Stop the device
    ///
    /// A no-op unless the port is started.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != PortState::Started {
            return Ok(());
        }
        self.driver.stop(self.port_id)?;
        self.state = PortState::Stopped;
        Ok(())
    }

    /// Close the device
    ///
    /// Fails with `EBUSY` while started. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            PortState::Closed => return Ok(()),
            PortState::Started => return Err(Errno::EBUSY),
            _ => {}
        }
        self.driver.close(self.port_id)?;
        self.state = PortState::Closed;
        Ok(())
    }

    /// Enable promiscuous mode
    pub fn promiscuous_enable(&self) -> Result<()> {
        self.ensure_open()?;
        self.driver.promiscuous_enable(self.port_id)
    }

    /// Disable promiscuous mode
    pub fn promiscuous_disable(&self) -> Result<()> {
        self.ensure_open()?;
        self.driver.promiscuous_disable(self.port_id)
    }

    pub fn is_promiscuous(&self) -> Result<bool> {
        self.ensure_open()?;
        self.driver.promiscuous_get(self.port_id)
    }

    /// Take the receive side of a queue on a started port.
    pub fn rx_queue(&self, queue_id: QueueId) -> Result<RxQueue> {
        self.ensure_started()?;
        let burst = self.driver.rx_queue(self.port_id, queue_id)?;
        Ok(RxQueue::from_burst(self.port_id, queue_id, burst))
    }

    /// Take the transmit side of a queue on a started port.
    pub fn tx_queue(&self, queue_id: QueueId) -> Result<TxQueue> {
        self.ensure_started()?;
        let burst = self.driver.tx_queue(self.port_id, queue_id)?;
        Ok(TxQueue::from_burst(self.port_id, queue_id, burst))
    }

    fn ensure_started(&self) -> Result<()> {
        match self.state {
            PortState::Started => Ok(()),
            PortState::Closed => Err(Errno::ENODEV),
            _ => Err(Errno::EINVAL),
        }
    }
}

impl fmt::Debug for EthDev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EthDev")
            .field("driver", &self.driver.name())
            .field("port_id", &self.port_id)
            .field("state", &self.state)
            .finish()
    }
}

/// Step of [`EthDevBuilder::build`] that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    Open,
    Info,
    Configure,
    RxQueueSetup(QueueId),
    TxQueueSetup(QueueId),
    Promiscuous,
    Start,
}

/// Error returned by [`EthDevBuilder::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupError {
    pub port_id: PortId,
    pub stage: SetupStage,
    pub errno: Errno,
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "port {} setup failed at {:?}: {}",
            self.port_id, self.stage, self.errno
        )
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.errno)
    }
}

/// Builder for configuring and starting an Ethernet device
pub struct EthDevBuilder {
    port_id: PortId,
    eth_conf: EthConf,
    nb_rx_queues: u16,
    nb_tx_queues: u16,
    rx_queue_conf: RxQueueConf,
    tx_queue_conf: TxQueueConf,
    adjust_desc: bool,
    promiscuous: bool,
}

impl EthDevBuilder {
    /// Create a new builder for the given port
    pub fn new(port_id: PortId) -> Self {
        Self {
            port_id,
            eth_conf: EthConf::default(),
            nb_rx_queues: 1,
            nb_tx_queues: 1,
            rx_queue_conf: RxQueueConf::default(),
            tx_queue_conf: TxQueueConf::default(),
            adjust_desc: true,
            promiscuous: false,
        }
    }

    /// Set device configuration
    pub fn eth_conf(mut self, conf: EthConf) -> Self {
        self.eth_conf = conf;
        self
    }

    /// Set number of RX queues
    pub fn nb_rx_queues(mut self, n: u16) -> Self {
        self.nb_rx_queues = n;
        self
    }

    /// Set number of TX queues
    pub fn nb_tx_queues(mut self, n: u16) -> Self {
        self.nb_tx_queues = n;
        self
    }

    /// Set RX queue configuration (applied to all queues)
    pub fn rx_queue_conf(mut self, conf: RxQueueConf) -> Self {
        self.rx_queue_conf = conf;
        self
    }

    /// Set TX queue configuration (applied to all queues)
    pub fn tx_queue_conf(mut self, conf: TxQueueConf) -> Self {
        self.tx_queue_conf = conf;
        self
    }

    /// Whether to clamp descriptor counts to the device limits (default on).
    pub fn adjust_desc(mut self, adjust: bool) -> Self {
        self.adjust_desc = adjust;
        self
    }

    /// Set promiscuous mode
    pub fn promiscuous(mut self, enable: bool) -> Self {
        self.promiscuous = enable;
        self
    }

    /// Build and start the device
    ///
    /// This will:
    /// 1. Configure the device
    /// 2. Adjust descriptor counts (if set)
    /// 3. Setup all RX queues
    /// 4. Setup all TX queues
    /// 5. Enable promiscuous mode (if set)
    /// 6. Start the device
    ///
    /// A failure leaves the port in whatever state the failing step left it.
    pub fn build(
        self,
        driver: &Arc<dyn EthDriver>,
        mempool: &MemPool,
    ) -> std::result::Result<EthDev, SetupError> {
        let port_id = self.port_id;
        let fail = |stage: SetupStage| move |errno: Errno| SetupError {
            port_id,
            stage,
            errno,
        };

        let mut dev = EthDev::new(driver.clone(), port_id).map_err(fail(SetupStage::Open))?;

        dev.configure(self.nb_rx_queues, self.nb_tx_queues, &self.eth_conf)
            .map_err(fail(SetupStage::Configure))?;

        let mut rx_conf = self.rx_queue_conf;
        let mut tx_conf = self.tx_queue_conf;
        if self.adjust_desc {
            dev.adjust_nb_rx_tx_desc(&mut rx_conf.nb_desc, &mut tx_conf.nb_desc)
                .map_err(fail(SetupStage::Info))?;
        }

        for q in 0..self.nb_rx_queues {
            dev.rx_queue_setup(q, mempool, &rx_conf)
                .map_err(fail(SetupStage::RxQueueSetup(q)))?;
        }

        for q in 0..self.nb_tx_queues {
            dev.tx_queue_setup(q, &tx_conf)
                .map_err(fail(SetupStage::TxQueueSetup(q)))?;
        }

        if self.promiscuous {
            dev.promiscuous_enable()
                .map_err(fail(SetupStage::Promiscuous))?;
        }

        dev.start().map_err(fail(SetupStage::Start))?;

        Ok(dev)
    }
}

/// Iterate over available port IDs
pub fn iter_ports(driver: &dyn EthDriver) -> impl Iterator<Item = PortId> {
    0..driver.count_avail()
}

/// Format MAC address as string
pub fn format_mac_addr(addr: &EthernetAddress) -> String {
    let b = addr.as_bytes();
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        b[0], b[1], b[2], b[3], b[4], b[5]
    )
}
