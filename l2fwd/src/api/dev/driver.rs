// Device layer.
//
// A driver owns a set of ports and implements the control operations the
// port state machine in `eth` is built on, plus the per-queue burst objects
// used on the data path.

use std::sync::atomic::{AtomicU64, Ordering};

use arrayvec::ArrayVec;
use smoltcp::wire::EthernetAddress;

use super::eth::{EthConf, PortId, QueueId, RxQueueConf, TxQueueConf};
use super::mbuf::Mbuf;
use super::pktmbuf::MemPool;
use crate::api::Result;

/// Maximum burst size for RX/TX operations
pub const MAX_BURST_SIZE: usize = 64;

/// A burst of packet buffers.
pub type Burst = ArrayVec<Mbuf, MAX_BURST_SIZE>;

/// Descriptor count limits of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescLim {
    pub nb_min: u16,
    pub nb_max: u16,
    /// Descriptor counts must be a multiple of this.
    pub nb_align: u16,
}

impl DescLim {
    /// Clamp `nb` into the limits and round it up to the alignment.
    pub fn adjust(&self, nb: u16) -> u16 {
        let align = self.nb_align.max(1);
        let mut n = nb.clamp(self.nb_min, self.nb_max);
        let rem = n % align;
        if rem != 0 {
            n = n.saturating_add(align - rem);
            if n > self.nb_max {
                n -= align;
            }
        }
        n
    }

    /// Whether `nb` is accepted as is.
    pub fn contains(&self, nb: u16) -> bool {
        nb >= self.nb_min && nb <= self.nb_max && nb % self.nb_align.max(1) == 0
    }
}

/// Device capabilities.
#[derive(Debug, Clone)]
pub struct DevInfo {
    pub driver_name: String,
    pub if_name: Option<String>,
    pub max_rx_queues: u16,
    pub max_tx_queues: u16,
    pub rx_desc_lim: DescLim,
    pub tx_desc_lim: DescLim,
    /// Largest frame the port receives, Ethernet header included.
    pub max_rx_pktlen: u32,
}

/// Port counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EthStats {
    pub ipackets: u64,
    pub opackets: u64,
    pub ibytes: u64,
    pub obytes: u64,
    /// Frames dropped because the RX ring was full.
    pub imissed: u64,
    pub ierrors: u64,
    pub oerrors: u64,
    /// RX allocation failures.
    pub rx_nombuf: u64,
}

/// Lock-free port counters shared between queue objects and the control path.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) ipackets: AtomicU64,
    pub(crate) opackets: AtomicU64,
    pub(crate) ibytes: AtomicU64,
    pub(crate) obytes: AtomicU64,
    pub(crate) imissed: AtomicU64,
    pub(crate) ierrors: AtomicU64,
    pub(crate) oerrors: AtomicU64,
    pub(crate) rx_nombuf: AtomicU64,
}

impl StatsCounters {
    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        if n != 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> EthStats {
        EthStats {
            ipackets: self.ipackets.load(Ordering::Relaxed),
            opackets: self.opackets.load(Ordering::Relaxed),
            ibytes: self.ibytes.load(Ordering::Relaxed),
            obytes: self.obytes.load(Ordering::Relaxed),
            imissed: self.imissed.load(Ordering::Relaxed),
            ierrors: self.ierrors.load(Ordering::Relaxed),
            oerrors: self.oerrors.load(Ordering::Relaxed),
            rx_nombuf: self.rx_nombuf.load(Ordering::Relaxed),
        }
    }
}

/// Driver-side view of a port's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DevState {
    Unconfigured,
    Configured,
    Started,
    Stopped,
    Closed,
}

/// Receive side of a started queue.
///
/// Each queue is handed out to a single owner, so implementations need no
/// locking on this path.
pub trait RxBurst: Send {
    /// Append up to `nb_pkts` received packets to `pkts`.
    ///
    /// Never blocks. Returns the number of packets appended.
    fn rx_burst(&mut self, pkts: &mut Burst, nb_pkts: usize) -> usize;
}

/// Transmit side of a started queue.
pub trait TxBurst: Send {
    /// Hand the leading packets of `pkts` to the device.
    ///
    /// Accepted packets are removed from the front of `pkts`; the rest stay
    /// with the caller. Returns the number accepted.
    fn tx_burst(&mut self, pkts: &mut Burst) -> usize;

    /// Release up to `free_cnt` buffers whose transmission has completed,
    /// or all of them when `free_cnt` is 0. Returns the number released.
    fn done_cleanup(&mut self, free_cnt: usize) -> usize;
}

/// A set of Ethernet ports.
///
/// Control operations take `&self` and may be called from any thread. Port
/// ids are dense, `0..count_avail()`.
pub trait EthDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Number of ports the driver exposes.
    fn count_avail(&self) -> u16;

    fn is_valid_port(&self, port_id: PortId) -> bool {
        port_id < self.count_avail()
    }

    fn info(&self, port_id: PortId) -> Result<DevInfo>;

    fn configure(
        &self,
        port_id: PortId,
        nb_rx_queues: u16,
        nb_tx_queues: u16,
        conf: &EthConf,
    ) -> Result<()>;

    fn rx_queue_setup(
        &self,
        port_id: PortId,
        queue_id: QueueId,
        mempool: &MemPool,
        conf: &RxQueueConf,
    ) -> Result<()>;

    fn tx_queue_setup(&self, port_id: PortId, queue_id: QueueId, conf: &TxQueueConf)
    -> Result<()>;

    fn start(&self, port_id: PortId) -> Result<()>;

    /// Stop the port, releasing buffers still held by its queues.
    fn stop(&self, port_id: PortId) -> Result<()>;

    fn close(&self, port_id: PortId) -> Result<()>;

    fn mac_addr(&self, port_id: PortId) -> Result<EthernetAddress>;

    fn set_mac_addr(&self, port_id: PortId, addr: EthernetAddress) -> Result<()>;

    fn promiscuous_enable(&self, port_id: PortId) -> Result<()>;

    fn promiscuous_disable(&self, port_id: PortId) -> Result<()>;

    fn promiscuous_get(&self, port_id: PortId) -> Result<bool>;

    fn stats(&self, port_id: PortId) -> Result<EthStats>;

    /// Take the receive side of a started queue. Fails with `EBUSY` while
    /// another owner holds it.
    fn rx_queue(&self, port_id: PortId, queue_id: QueueId) -> Result<Box<dyn RxBurst>>;

    /// Take the transmit side of a started queue. Fails with `EBUSY` while
    /// another owner holds it.
    fn tx_queue(&self, port_id: PortId, queue_id: QueueId) -> Result<Box<dyn TxBurst>>;
}
