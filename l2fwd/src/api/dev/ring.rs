// In-memory Ethernet driver.
//
// Every port has one "wire" ring per RX queue that frames are injected into,
// and one descriptor ring per TX queue. Transmitted frames are optionally
// copied to a per-port capture ring where tests and demos can read them.
// Buffers stay on the TX ring until reclaimed, either by `done_cleanup`,
// by the automatic reclaim below `free_thresh`, or by `complete_tx`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use crossbeam::queue::ArrayQueue;
use smoltcp::wire::EthernetAddress;
use tracing::debug;

use super::driver::{
    Burst, DescLim, DevInfo, DevState, EthDriver, EthStats, RxBurst, StatsCounters, TxBurst,
};
use super::eth::{EthConf, PortId, QueueId, RxQueueConf, TxQueueConf};
use super::mbuf::Mbuf;
use super::pktmbuf::{MemPool, MemPoolCache};
use crate::api::{Errno, Result};

const DRIVER_NAME: &str = "net_ring";
const ETHER_HDR_LEN: usize = 14;
const RING_MAX_QUEUES: u16 = 16;
const RING_MAX_RX_PKTLEN: u32 = 9018;
const RING_DESC_LIM: DescLim = DescLim {
    nb_min: 1,
    nb_max: 4096,
    nb_align: 1,
};

/// Default number of transmitted frames kept per port.
pub const DEFAULT_CAPTURE_DEPTH: usize = 4096;

struct RxRing {
    wire: ArrayQueue<Vec<u8>>,
    mempool: MemPool,
    taken: AtomicBool,
}

struct TxRing {
    desc: ArrayQueue<Mbuf>,
    free_thresh: usize,
    taken: AtomicBool,
}

impl TxRing {
    /// Release up to `max` in-flight buffers, all of them when `max` is 0.
    fn reclaim(&self, max: usize) -> usize {
        let limit = if max == 0 { usize::MAX } else { max };
        let mut freed = 0;
        while freed < limit {
            match self.desc.pop() {
                Some(mbuf) => {
                    mbuf.free();
                    freed += 1;
                }
                None => break,
            }
        }
        freed
    }

    #[inline]
    fn free_descs(&self) -> usize {
        self.desc.capacity() - self.desc.len()
    }
}

#[derive(Clone, Default)]
struct QueueTable {
    rx: Vec<Option<Arc<RxRing>>>,
    tx: Vec<Option<Arc<TxRing>>>,
}

impl QueueTable {
    fn is_complete(&self) -> bool {
        self.rx.iter().all(Option::is_some) && self.tx.iter().all(Option::is_some)
    }
}

struct PortShared {
    started: AtomicBool,
    promisc: AtomicBool,
    max_frame_len: AtomicUsize,
    stats: StatsCounters,
    capture: Option<ArrayQueue<Vec<u8>>>,
}

struct PortCtrl {
    state: DevState,
    nb_rx: u16,
    nb_tx: u16,
    mac: EthernetAddress,
}

struct RingPort {
    ctrl: Mutex<PortCtrl>,
    queues: ArcSwap<QueueTable>,
    shared: Arc<PortShared>,
}

impl RingPort {
    fn ctrl(&self) -> MutexGuard<'_, PortCtrl> {
        self.ctrl.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Software Ethernet driver backed by in-memory rings.
pub struct RingDriver {
    ports: Box<[RingPort]>,
}

impl RingDriver {
    /// Create a driver with `nb_ports` ports, capturing up to
    /// [`DEFAULT_CAPTURE_DEPTH`] transmitted frames per port.
    pub fn new(nb_ports: u16) -> Self {
        Self::with_capture_depth(nb_ports, DEFAULT_CAPTURE_DEPTH)
    }

    /// Create a driver keeping the last `depth` transmitted frames per port.
    /// A depth of 0 disables capture.
    pub fn with_capture_depth(nb_ports: u16, depth: usize) -> Self {
        let ports = (0..nb_ports)
            .map(|id| RingPort {
                ctrl: Mutex::new(PortCtrl {
                    state: DevState::Unconfigured,
                    nb_rx: 0,
                    nb_tx: 0,
                    mac: EthernetAddress([0x02, 0, 0, 0, (id >> 8) as u8, id as u8]),
                }),
                queues: ArcSwap::from_pointee(QueueTable::default()),
                shared: Arc::new(PortShared {
                    started: AtomicBool::new(false),
                    promisc: AtomicBool::new(false),
                    max_frame_len: AtomicUsize::new(1500 + ETHER_HDR_LEN),
                    stats: StatsCounters::default(),
                    capture: (depth > 0).then(|| ArrayQueue::new(depth)),
                }),
            })
            .collect();
        Self { ports }
    }

    fn port(&self, port_id: PortId) -> Result<&RingPort> {
        self.ports.get(port_id as usize).ok_or(Errno::ENODEV)
    }

    /// Put a frame on the wire of an RX queue.
    ///
    /// Returns `false` if the frame was not queued: the port is not started,
    /// the queue does not exist, the frame is filtered by MAC address or too
    /// long, or the ring is full. The last two are counted as `ierrors` and
    /// `imissed`.
    pub fn inject(&self, port_id: PortId, queue_id: QueueId, frame: &[u8]) -> bool {
        let Ok(port) = self.port(port_id) else {
            return false;
        };
        let shared = &port.shared;
        if !shared.started.load(Ordering::Acquire) {
            return false;
        }
        let table = port.queues.load();
        let Some(Some(ring)) = table.rx.get(queue_id as usize) else {
            return false;
        };
        if frame.is_empty() || frame.len() > shared.max_frame_len.load(Ordering::Relaxed) {
            StatsCounters::add(&shared.stats.ierrors, 1);
            return false;
        }
        if !shared.promisc.load(Ordering::Relaxed) && frame.len() >= 6 {
            let dst = EthernetAddress::from_bytes(&frame[..6]);
            if !dst.is_multicast() && dst != port.ctrl().mac {
                return false;
            }
        }
        if ring.wire.push(frame.to_vec()).is_err() {
            StatsCounters::add(&shared.stats.imissed, 1);
            return false;
        }
        true
    }

    /// Drain the frames captured on the TX side of a port, oldest first.
    pub fn take_transmitted(&self, port_id: PortId) -> Vec<Vec<u8>> {
        let Ok(port) = self.port(port_id) else {
            return Vec::new();
        };
        let Some(capture) = port.shared.capture.as_ref() else {
            return Vec::new();
        };
        std::iter::from_fn(|| capture.pop()).collect()
    }

    /// Complete every in-flight transmission of a TX queue, returning the
    /// buffers to their pool.
    pub fn complete_tx(&self, port_id: PortId, queue_id: QueueId) -> usize {
        self.tx_ring(port_id, queue_id)
            .map_or(0, |ring| ring.reclaim(0))
    }

    /// Number of buffers held by a TX queue awaiting completion.
    pub fn tx_inflight(&self, port_id: PortId, queue_id: QueueId) -> usize {
        self.tx_ring(port_id, queue_id)
            .map_or(0, |ring| ring.desc.len())
    }

    /// Number of frames waiting on the wire of an RX queue.
    pub fn rx_pending(&self, port_id: PortId, queue_id: QueueId) -> usize {
        let Ok(port) = self.port(port_id) else {
            return 0;
        };
        port.queues
            .load()
            .rx
            .get(queue_id as usize)
            .and_then(Option::as_ref)
            .map_or(0, |ring| ring.wire.len())
    }

    fn tx_ring(&self, port_id: PortId, queue_id: QueueId) -> Option<Arc<TxRing>> {
        let port = self.port(port_id).ok()?;
        port.queues.load().tx.get(queue_id as usize)?.clone()
    }
}

impl std::fmt::Debug for RingDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingDriver")
            .field("nb_ports", &self.ports.len())
            .finish()
    }
}

impl EthDriver for RingDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn count_avail(&self) -> u16 {
        self.ports.len() as u16
    }

    fn info(&self, port_id: PortId) -> Result<DevInfo> {
        self.port(port_id)?;
        Ok(DevInfo {
            driver_name: DRIVER_NAME.to_string(),
            if_name: None,
            max_rx_queues: RING_MAX_QUEUES,
            max_tx_queues: RING_MAX_QUEUES,
            rx_desc_lim: RING_DESC_LIM,
            tx_desc_lim: RING_DESC_LIM,
            max_rx_pktlen: RING_MAX_RX_PKTLEN,
        })
    }

    fn configure(
        &self,
        port_id: PortId,
        nb_rx_queues: u16,
        nb_tx_queues: u16,
        conf: &EthConf,
    ) -> Result<()> {
        let port = self.port(port_id)?;
        let mut ctrl = port.ctrl();
        match ctrl.state {
            DevState::Closed => return Err(Errno::ENODEV),
            DevState::Started => return Err(Errno::EBUSY),
            _ => {}
        }
        if nb_rx_queues == 0
            || nb_tx_queues == 0
            || nb_rx_queues > RING_MAX_QUEUES
            || nb_tx_queues > RING_MAX_QUEUES
        {
            return Err(Errno::EINVAL);
        }
        let max_frame_len = conf.mtu as usize + ETHER_HDR_LEN;
        if max_frame_len > RING_MAX_RX_PKTLEN as usize {
            return Err(Errno::EINVAL);
        }

        port.queues.store(Arc::new(QueueTable {
            rx: vec![None; nb_rx_queues as usize],
            tx: vec![None; nb_tx_queues as usize],
        }));
        port.shared
            .max_frame_len
            .store(max_frame_len, Ordering::Relaxed);
        ctrl.nb_rx = nb_rx_queues;
        ctrl.nb_tx = nb_tx_queues;
        ctrl.state = DevState::Configured;
        Ok(())
    }

    fn rx_queue_setup(
        &self,
        port_id: PortId,
        queue_id: QueueId,
        mempool: &MemPool,
        conf: &RxQueueConf,
    ) -> Result<()> {
        let port = self.port(port_id)?;
        let ctrl = port.ctrl();
        match ctrl.state {
            DevState::Configured => {}
            DevState::Closed => return Err(Errno::ENODEV),
            _ => return Err(Errno::EINVAL),
        }
        if queue_id >= ctrl.nb_rx || !RING_DESC_LIM.contains(conf.nb_desc) {
            return Err(Errno::EINVAL);
        }

        let ring = Arc::new(RxRing {
            wire: ArrayQueue::new(conf.nb_desc as usize),
            mempool: mempool.clone(),
            taken: AtomicBool::new(false),
        });
        let mut table = QueueTable::clone(&port.queues.load());
        table.rx[queue_id as usize] = Some(ring);
        port.queues.store(Arc::new(table));
        Ok(())
    }

    fn tx_queue_setup(
        &self,
        port_id: PortId,
        queue_id: QueueId,
        conf: &TxQueueConf,
    ) -> Result<()> {
        let port = self.port(port_id)?;
        let ctrl = port.ctrl();
        match ctrl.state {
            DevState::Configured => {}
            DevState::Closed => return Err(Errno::ENODEV),
            _ => return Err(Errno::EINVAL),
        }
        if queue_id >= ctrl.nb_tx || !RING_DESC_LIM.contains(conf.nb_desc) {
            return Err(Errno::EINVAL);
        }

        let ring = Arc::new(TxRing {
            desc: ArrayQueue::new(conf.nb_desc as usize),
            free_thresh: conf.free_thresh.min(conf.nb_desc) as usize,
            taken: AtomicBool::new(false),
        });
        let mut table = QueueTable::clone(&port.queues.load());
        table.tx[queue_id as usize] = Some(ring);
        port.queues.store(Arc::new(table));
        Ok(())
    }

    fn start(&self, port_id: PortId) -> Result<()> {
        let port = self.port(port_id)?;
        let mut ctrl = port.ctrl();
        match ctrl.state {
            DevState::Started => return Ok(()),
            DevState::Closed => return Err(Errno::ENODEV),
            DevState::Unconfigured => return Err(Errno::EINVAL),
            DevState::Configured | DevState::Stopped => {}
        }
        if !port.queues.load().is_complete() {
            return Err(Errno::EINVAL);
        }
        port.shared.started.store(true, Ordering::Release);
        ctrl.state = DevState::Started;
        debug!(port_id, "ring port started");
        Ok(())
    }

    fn stop(&self, port_id: PortId) -> Result<()> {
        let port = self.port(port_id)?;
        let mut ctrl = port.ctrl();
        if ctrl.state != DevState::Started {
            return Ok(());
        }
        port.shared.started.store(false, Ordering::Release);

        let table = port.queues.load();
        let mut released = 0;
        for ring in table.tx.iter().flatten() {
            released += ring.reclaim(0);
        }
        for ring in table.rx.iter().flatten() {
            while ring.wire.pop().is_some() {}
        }
        ctrl.state = DevState::Stopped;
        debug!(port_id, released, "ring port stopped");
        Ok(())
    }

    fn close(&self, port_id: PortId) -> Result<()> {
        let port = self.port(port_id)?;
        let mut ctrl = port.ctrl();
        match ctrl.state {
            DevState::Closed => return Ok(()),
            DevState::Started => return Err(Errno::EBUSY),
            _ => {}
        }
        port.queues.store(Arc::new(QueueTable::default()));
        port.shared.promisc.store(false, Ordering::Relaxed);
        ctrl.nb_rx = 0;
        ctrl.nb_tx = 0;
        ctrl.state = DevState::Closed;
        Ok(())
    }

    fn mac_addr(&self, port_id: PortId) -> Result<EthernetAddress> {
        let port = self.port(port_id)?;
        let ctrl = port.ctrl();
        if ctrl.state == DevState::Closed {
            return Err(Errno::ENODEV);
        }
        Ok(ctrl.mac)
    }

    fn set_mac_addr(&self, port_id: PortId, addr: EthernetAddress) -> Result<()> {
        let port = self.port(port_id)?;
        let mut ctrl = port.ctrl();
        if ctrl.state == DevState::Closed {
            return Err(Errno::ENODEV);
        }
        if !addr.is_unicast() {
            return Err(Errno::EINVAL);
        }
        ctrl.mac = addr;
        Ok(())
    }

    fn promiscuous_enable(&self, port_id: PortId) -> Result<()> {
        self.set_promisc(port_id, true)
    }

    fn promiscuous_disable(&self, port_id: PortId) -> Result<()> {
        self.set_promisc(port_id, false)
    }

    fn promiscuous_get(&self, port_id: PortId) -> Result<bool> {
        let port = self.port(port_id)?;
        if port.ctrl().state == DevState::Closed {
            return Err(Errno::ENODEV);
        }
        Ok(port.shared.promisc.load(Ordering::Relaxed))
    }

    fn stats(&self, port_id: PortId) -> Result<EthStats> {
        let port = self.port(port_id)?;
        Ok(port.shared.stats.snapshot())
    }

    fn rx_queue(&self, port_id: PortId, queue_id: QueueId) -> Result<Box<dyn RxBurst>> {
        let port = self.port(port_id)?;
        if !port.shared.started.load(Ordering::Acquire) {
            return Err(Errno::EINVAL);
        }
        let ring = port
            .queues
            .load()
            .rx
            .get(queue_id as usize)
            .cloned()
            .flatten()
            .ok_or(Errno::EINVAL)?;
        if ring.taken.swap(true, Ordering::AcqRel) {
            return Err(Errno::EBUSY);
        }
        let cache = ring.mempool.cache();
        Ok(Box::new(RingRxQueue {
            port: port.shared.clone(),
            ring,
            cache,
        }))
    }

    fn tx_queue(&self, port_id: PortId, queue_id: QueueId) -> Result<Box<dyn TxBurst>> {
        let port = self.port(port_id)?;
        if !port.shared.started.load(Ordering::Acquire) {
            return Err(Errno::EINVAL);
        }
        let ring = port
            .queues
            .load()
            .tx
            .get(queue_id as usize)
            .cloned()
            .flatten()
            .ok_or(Errno::EINVAL)?;
        if ring.taken.swap(true, Ordering::AcqRel) {
            return Err(Errno::EBUSY);
        }
        Ok(Box::new(RingTxQueue {
            port: port.shared.clone(),
            ring,
        }))
    }
}

impl RingDriver {
    fn set_promisc(&self, port_id: PortId, enable: bool) -> Result<()> {
        let port = self.port(port_id)?;
        if port.ctrl().state == DevState::Closed {
            return Err(Errno::ENODEV);
        }
        port.shared.promisc.store(enable, Ordering::Relaxed);
        Ok(())
    }
}

struct RingRxQueue {
    port: Arc<PortShared>,
    ring: Arc<RxRing>,
    cache: MemPoolCache,
}

impl RxBurst for RingRxQueue {
    fn rx_burst(&mut self, pkts: &mut Burst, nb_pkts: usize) -> usize {
        if !self.port.started.load(Ordering::Acquire) {
            return 0;
        }
        let stats = &self.port.stats;
        let mut received = 0;
        let mut bytes = 0;
        let mut errors = 0;
        while received < nb_pkts && !self.ring.wire.is_empty() {
            let Some(mut mbuf) = self.cache.alloc() else {
                StatsCounters::add(&stats.rx_nombuf, 1);
                break;
            };
            let Some(frame) = self.ring.wire.pop() else {
                self.cache.free(mbuf);
                break;
            };
            if !mbuf.copy_from_slice(&frame) {
                errors += 1;
                self.cache.free(mbuf);
                continue;
            }
            bytes += frame.len() as u64;
            if let Err(e) = pkts.try_push(mbuf) {
                self.cache.free(e.element());
                break;
            }
            received += 1;
        }
        StatsCounters::add(&stats.ipackets, received as u64);
        StatsCounters::add(&stats.ibytes, bytes);
        StatsCounters::add(&stats.ierrors, errors);
        received
    }
}

impl Drop for RingRxQueue {
    fn drop(&mut self) {
        self.ring.taken.store(false, Ordering::Release);
    }
}

struct RingTxQueue {
    port: Arc<PortShared>,
    ring: Arc<TxRing>,
}

impl TxBurst for RingTxQueue {
    fn tx_burst(&mut self, pkts: &mut Burst) -> usize {
        if !self.port.started.load(Ordering::Acquire) {
            return 0;
        }
        let ring = &self.ring;
        if ring.free_thresh > 0 && ring.free_descs() < ring.free_thresh {
            ring.reclaim(0);
        }
        let accepted = pkts.len().min(ring.free_descs());
        let stats = &self.port.stats;
        let mut bytes = 0;
        for mbuf in pkts.drain(..accepted) {
            bytes += mbuf.data_len() as u64;
            if let Some(capture) = self.port.capture.as_ref() {
                capture.force_push(mbuf.data().to_vec());
            }
            // This queue is the only producer, so the free count above holds.
            if let Err(mbuf) = ring.desc.push(mbuf) {
                StatsCounters::add(&stats.oerrors, 1);
                mbuf.free();
            }
        }
        StatsCounters::add(&stats.opackets, accepted as u64);
        StatsCounters::add(&stats.obytes, bytes);
        accepted
    }

    fn done_cleanup(&mut self, free_cnt: usize) -> usize {
        self.ring.reclaim(free_cnt)
    }
}

impl Drop for RingTxQueue {
    fn drop(&mut self) {
        self.ring.taken.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::dev::eth::{EthDev, EthDevBuilder};
    use crate::api::dev::pktmbuf::MemPoolConfig;

    fn started(nb_desc: u16, free_thresh: u16) -> (Arc<RingDriver>, MemPool, EthDev) {
        let ring = Arc::new(RingDriver::new(2));
        let driver: Arc<dyn EthDriver> = ring.clone();
        let config = MemPoolConfig::new().num_mbufs(256).cache_size(8);
        let pool = MemPool::create("ring_test", &config).unwrap();
        let dev = EthDevBuilder::new(0)
            .rx_queue_conf(RxQueueConf::new().nb_desc(nb_desc))
            .tx_queue_conf(TxQueueConf::new().nb_desc(nb_desc).free_thresh(free_thresh))
            .promiscuous(true)
            .build(&driver, &pool)
            .unwrap();
        (ring, pool, dev)
    }

    #[test]
    fn test_inject_requires_started_port() {
        let ring = RingDriver::new(1);
        assert!(!ring.inject(0, 0, &[0u8; 60]));
        assert!(!ring.inject(5, 0, &[0u8; 60]));
    }

    #[test]
    fn test_wire_overflow_counts_imissed() {
        let (ring, _pool, dev) = started(4, 0);
        for _ in 0..4 {
            assert!(ring.inject(0, 0, &[0xffu8; 60]));
        }
        assert!(!ring.inject(0, 0, &[0xffu8; 60]));
        assert_eq!(ring.rx_pending(0, 0), 4);
        assert_eq!(dev.stats().unwrap().imissed, 1);
    }

    #[test]
    fn test_rx_tx_roundtrip_through_rings() {
        let (ring, pool, dev) = started(16, 0);
        let frame: Vec<u8> = (0..64u8).collect();
        assert!(ring.inject(0, 0, &frame));

        let mut rxq = dev.rx_queue(0).unwrap();
        let mut txq = dev.tx_queue(0).unwrap();
        let mut burst = Burst::new();
        assert_eq!(rxq.rx(&mut burst, 32), 1);
        assert_eq!(burst[0].data(), frame.as_slice());

        assert_eq!(txq.tx(&mut burst), 1);
        assert!(burst.is_empty());
        assert_eq!(ring.tx_inflight(0, 0), 1);
        assert_eq!(ring.take_transmitted(0), vec![frame.clone()]);

        assert_eq!(txq.done_cleanup(0), 1);
        assert_eq!(ring.tx_inflight(0, 0), 0);
        drop(rxq);
        assert!(pool.is_full());

        let stats = dev.stats().unwrap();
        assert_eq!(stats.ipackets, 1);
        assert_eq!(stats.opackets, 1);
        assert_eq!(stats.obytes, 64);
    }

    #[test]
    fn test_tx_ring_full_accepts_prefix() {
        let (ring, pool, dev) = started(4, 0);
        let mut txq = dev.tx_queue(0).unwrap();
        let mut burst = Burst::new();
        pool.alloc_bulk(&mut burst, 6);
        assert_eq!(txq.tx(&mut burst), 4);
        assert_eq!(burst.len(), 2);
        assert_eq!(txq.tx(&mut burst), 0);

        assert_eq!(ring.complete_tx(0, 0), 4);
        assert_eq!(txq.tx(&mut burst), 2);
        burst.clear();
        assert_eq!(pool.in_use_count(), 2);
    }

    #[test]
    fn test_tx_auto_reclaim_below_free_thresh() {
        let (ring, pool, dev) = started(8, 4);
        let mut txq = dev.tx_queue(0).unwrap();
        for _ in 0..3 {
            let mut burst = Burst::new();
            pool.alloc_bulk(&mut burst, 3);
            assert_eq!(txq.tx(&mut burst), 3);
        }
        // The third burst found only 2 free descriptors and reclaimed first.
        assert_eq!(ring.tx_inflight(0, 0), 3);
        assert_eq!(pool.in_use_count(), 3);
    }

    #[test]
    fn test_stop_releases_inflight_buffers() {
        let (ring, pool, mut dev) = started(8, 0);
        {
            let mut txq = dev.tx_queue(0).unwrap();
            let mut burst = Burst::new();
            pool.alloc_bulk(&mut burst, 5);
            assert_eq!(txq.tx(&mut burst), 5);
        }
        assert!(ring.inject(0, 0, &[0xffu8; 60]));
        assert_eq!(pool.in_use_count(), 5);
        dev.stop().unwrap();
        assert!(pool.is_full());
        assert_eq!(ring.rx_pending(0, 0), 0);
        assert!(!ring.inject(0, 0, &[0xffu8; 60]));
    }

    #[test]
    fn test_queue_handed_out_once() {
        let (_ring, _pool, dev) = started(8, 0);
        let txq = dev.tx_queue(0).unwrap();
        assert_eq!(dev.tx_queue(0).err(), Some(Errno::EBUSY));
        drop(txq);
        assert!(dev.tx_queue(0).is_ok());
    }

    #[test]
    fn test_mac_filter_without_promiscuous() {
        let (ring, _pool, dev) = started(8, 0);
        dev.promiscuous_disable().unwrap();
        let mac = dev.mac_addr().unwrap();

        let mut other = [0u8; 60];
        other[..6].copy_from_slice(&[0x02, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert!(!ring.inject(0, 0, &other));

        let mut mine = [0u8; 60];
        mine[..6].copy_from_slice(mac.as_bytes());
        assert!(ring.inject(0, 0, &mine));
        assert!(ring.inject(0, 0, &[0xffu8; 60]));
    }

    #[test]
    fn test_oversize_frame_counts_ierrors() {
        let (ring, _pool, dev) = started(8, 0);
        assert!(!ring.inject(0, 0, &vec![0xffu8; 1515]));
        assert!(ring.inject(0, 0, &vec![0xffu8; 1514]));
        assert_eq!(dev.stats().unwrap().ierrors, 1);
    }

    #[test]
    fn test_set_mac_rejects_multicast() {
        let ring = RingDriver::new(1);
        let bcast = EthernetAddress::BROADCAST;
        assert_eq!(ring.set_mac_addr(0, bcast), Err(Errno::EINVAL));
        let mac = EthernetAddress([0x02, 0, 0, 0, 0, 0x42]);
        ring.set_mac_addr(0, mac).unwrap();
        assert_eq!(ring.mac_addr(0).unwrap(), mac);
    }
}
