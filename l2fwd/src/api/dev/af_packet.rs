// Linux AF_PACKET driver.
//
// Each port binds one raw packet socket to a network interface. Ports have a
// single RX and a single TX queue; the kernel copies frames on send, so TX
// buffers complete as soon as they are accepted.

use std::mem::{MaybeUninit, size_of};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nix::libc;
use smoltcp::wire::EthernetAddress;
use socket2::{Domain, Protocol, SockAddr, SockAddrStorage, Socket, Type};
use tracing::{debug, info};

use super::driver::{
    Burst, DescLim, DevInfo, DevState, EthDriver, EthStats, RxBurst, StatsCounters, TxBurst,
};
use super::eth::{EthConf, PortId, QueueId, RxQueueConf, TxQueueConf};
use super::pktmbuf::{MemPool, MemPoolCache};
use crate::api::{Errno, Result, check_success, io_errno};

const DRIVER_NAME: &str = "net_af_packet";
const ETHER_HDR_LEN: usize = 14;
const PACKET_MAX_RX_PKTLEN: u32 = 9018;
const PACKET_DESC_LIM: DescLim = DescLim {
    nb_min: 1,
    nb_max: 4096,
    nb_align: 1,
};

fn eth_p_all() -> u16 {
    (libc::ETH_P_ALL as u16).to_be()
}

/// `sockaddr_ll` naming every protocol on `ifindex`.
fn link_addr(ifindex: u32) -> SockAddr {
    let mut storage = SockAddrStorage::zeroed();
    let len = size_of::<libc::sockaddr_ll>() as libc::socklen_t;
    // SAFETY: sockaddr_storage is large and aligned enough for sockaddr_ll.
    let sll = unsafe { storage.view_as::<libc::sockaddr_ll>() };
    sll.sll_family = libc::AF_PACKET as libc::c_ushort;
    sll.sll_protocol = eth_p_all();
    sll.sll_ifindex = ifindex as libc::c_int;
    // SAFETY: the storage holds an initialized sockaddr_ll of `len` bytes.
    unsafe { SockAddr::new(storage, len) }
}

/// Whether `addr` is the kernel echoing a frame this host sent.
fn is_outgoing(addr: &SockAddr) -> bool {
    if addr.family() != libc::AF_PACKET as libc::sa_family_t {
        return false;
    }
    // SAFETY: an AF_PACKET address from recvfrom is a sockaddr_ll, and the
    // storage behind `as_ptr` is a full sockaddr_storage.
    let sll = unsafe { &*(addr.as_ptr() as *const libc::sockaddr_ll) };
    sll.sll_pkttype == libc::PACKET_OUTGOING as libc::c_uchar
}

fn open_socket(ifindex: u32) -> Result<Socket> {
    let protocol = Protocol::from(i32::from(eth_p_all()));
    let sock = Socket::new(Domain::PACKET, Type::RAW, Some(protocol)).map_err(|e| io_errno(&e))?;
    sock.set_nonblocking(true).map_err(|e| io_errno(&e))?;
    sock.bind(&link_addr(ifindex)).map_err(|e| io_errno(&e))?;
    Ok(sock)
}

fn set_membership(sock: &Socket, ifindex: u32, enable: bool) -> Result<()> {
    let mreq = libc::packet_mreq {
        mr_ifindex: ifindex as libc::c_int,
        mr_type: libc::PACKET_MR_PROMISC as libc::c_ushort,
        mr_alen: 0,
        mr_address: [0; 8],
    };
    let opt = if enable {
        libc::PACKET_ADD_MEMBERSHIP
    } else {
        libc::PACKET_DROP_MEMBERSHIP
    };
    // socket2 has no packet membership option.
    let ret = unsafe {
        libc::setsockopt(
            sock.as_raw_fd(),
            libc::SOL_PACKET,
            opt,
            &mreq as *const libc::packet_mreq as *const libc::c_void,
            size_of::<libc::packet_mreq>() as libc::socklen_t,
        )
    };
    check_success(ret)
}

/// View an initialized byte buffer as a receive buffer.
fn as_uninit(buf: &mut [u8]) -> &mut [MaybeUninit<u8>] {
    // SAFETY: MaybeUninit<u8> has the layout of u8, and recv only writes
    // initialized bytes into the slice.
    unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) }
}

struct PortShared {
    started: AtomicBool,
    max_frame_len: AtomicUsize,
    stats: StatsCounters,
    rx_taken: AtomicBool,
    tx_taken: AtomicBool,
}

struct PortCtrl {
    state: DevState,
    promisc: bool,
    mempool: Option<MemPool>,
    rx_ready: bool,
    tx_ready: bool,
    sock: Option<Arc<Socket>>,
}

struct PacketPort {
    if_name: String,
    ifindex: u32,
    ctrl: Mutex<PortCtrl>,
    shared: Arc<PortShared>,
}

impl PacketPort {
    fn ctrl(&self) -> MutexGuard<'_, PortCtrl> {
        self.ctrl.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ethernet driver over Linux packet sockets, one port per interface.
///
/// Opening raw sockets needs `CAP_NET_RAW`.
pub struct PacketDriver {
    ports: Box<[PacketPort]>,
}

impl PacketDriver {
    /// Create ports for the named interfaces, in order.
    ///
    /// Fails with `ENODEV` if an interface does not exist.
    pub fn new<S: AsRef<str>>(if_names: &[S]) -> Result<Self> {
        let mut ports = Vec::with_capacity(if_names.len());
        for name in if_names {
            let name = name.as_ref();
            let ifindex = nix::net::if_::if_nametoindex(name).map_err(|_| Errno::ENODEV)?;
            info!(if_name = name, ifindex, "af_packet port");
            ports.push(PacketPort {
                if_name: name.to_string(),
                ifindex,
                ctrl: Mutex::new(PortCtrl {
                    state: DevState::Unconfigured,
                    promisc: false,
                    mempool: None,
                    rx_ready: false,
                    tx_ready: false,
                    sock: None,
                }),
                shared: Arc::new(PortShared {
                    started: AtomicBool::new(false),
                    max_frame_len: AtomicUsize::new(1500 + ETHER_HDR_LEN),
                    stats: StatsCounters::default(),
                    rx_taken: AtomicBool::new(false),
                    tx_taken: AtomicBool::new(false),
                }),
            });
        }
        Ok(Self {
            ports: ports.into_boxed_slice(),
        })
    }

    fn port(&self, port_id: PortId) -> Result<&PacketPort> {
        self.ports.get(port_id as usize).ok_or(Errno::ENODEV)
    }

    fn started_sock(&self, port_id: PortId, queue_id: QueueId) -> Result<(&PacketPort, Arc<Socket>)> {
        let port = self.port(port_id)?;
        if queue_id != 0 {
            return Err(Errno::EINVAL);
        }
        let ctrl = port.ctrl();
        match (&ctrl.state, &ctrl.sock) {
            (DevState::Started, Some(sock)) => Ok((port, sock.clone())),
            _ => Err(Errno::EINVAL),
        }
    }
}

impl std::fmt::Debug for PacketDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.ports.iter().map(|p| p.if_name.as_str()).collect();
        f.debug_struct("PacketDriver").field("ports", &names).finish()
    }
}

impl EthDriver for PacketDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn count_avail(&self) -> u16 {
        self.ports.len() as u16
    }

    fn info(&self, port_id: PortId) -> Result<DevInfo> {
        let port = self.port(port_id)?;
        Ok(DevInfo {
            driver_name: DRIVER_NAME.to_string(),
            if_name: Some(port.if_name.clone()),
            max_rx_queues: 1,
            max_tx_queues: 1,
            rx_desc_lim: PACKET_DESC_LIM,
            tx_desc_lim: PACKET_DESC_LIM,
            max_rx_pktlen: PACKET_MAX_RX_PKTLEN,
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
        if nb_rx_queues != 1 || nb_tx_queues != 1 {
            return Err(Errno::EINVAL);
        }
        let max_frame_len = conf.mtu as usize + ETHER_HDR_LEN;
        if max_frame_len > PACKET_MAX_RX_PKTLEN as usize {
            return Err(Errno::EINVAL);
        }
        port.shared
            .max_frame_len
            .store(max_frame_len, Ordering::Relaxed);
        ctrl.rx_ready = false;
        ctrl.tx_ready = false;
        ctrl.mempool = None;
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
        let mut ctrl = port.ctrl();
        if ctrl.state != DevState::Configured {
            return Err(Errno::EINVAL);
        }
        if queue_id != 0 || !PACKET_DESC_LIM.contains(conf.nb_desc) {
            return Err(Errno::EINVAL);
        }
        ctrl.mempool = Some(mempool.clone());
        ctrl.rx_ready = true;
        Ok(())
    }

    fn tx_queue_setup(
        &self,
        port_id: PortId,
        queue_id: QueueId,
        conf: &TxQueueConf,
    ) -> Result<()> {
        let port = self.port(port_id)?;
        let mut ctrl = port.ctrl();
        if ctrl.state != DevState::Configured {
            return Err(Errno::EINVAL);
        }
        if queue_id != 0 || !PACKET_DESC_LIM.contains(conf.nb_desc) {
            return Err(Errno::EINVAL);
        }
        ctrl.tx_ready = true;
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
        if !ctrl.rx_ready || !ctrl.tx_ready {
            return Err(Errno::EINVAL);
        }
        let sock = open_socket(port.ifindex)?;
        if ctrl.promisc {
            set_membership(&sock, port.ifindex, true)?;
        }
        ctrl.sock = Some(Arc::new(sock));
        ctrl.state = DevState::Started;
        port.shared.started.store(true, Ordering::Release);
        debug!(port_id, if_name = %port.if_name, "af_packet port started");
        Ok(())
    }

    fn stop(&self, port_id: PortId) -> Result<()> {
        let port = self.port(port_id)?;
        let mut ctrl = port.ctrl();
        if ctrl.state != DevState::Started {
            return Ok(());
        }
        port.shared.started.store(false, Ordering::Release);
        // The queues keep their own reference until dropped.
        ctrl.sock = None;
        ctrl.state = DevState::Stopped;
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
        ctrl.mempool = None;
        ctrl.sock = None;
        ctrl.state = DevState::Closed;
        Ok(())
    }

    fn mac_addr(&self, port_id: PortId) -> Result<EthernetAddress> {
        let port = self.port(port_id)?;
        let addrs = nix::ifaddrs::getifaddrs()?;
        for ifa in addrs {
            if ifa.interface_name != port.if_name {
                continue;
            }
            let mac = ifa
                .address
                .as_ref()
                .and_then(|addr| addr.as_link_addr())
                .and_then(|link| link.addr());
            if let Some(mac) = mac {
                return Ok(EthernetAddress(mac));
            }
        }
        Err(Errno::EADDRNOTAVAIL)
    }

    fn set_mac_addr(&self, port_id: PortId, _addr: EthernetAddress) -> Result<()> {
        self.port(port_id)?;
        Err(Errno::ENOTSUP)
    }

    fn promiscuous_enable(&self, port_id: PortId) -> Result<()> {
        let port = self.port(port_id)?;
        let mut ctrl = port.ctrl();
        if let Some(sock) = ctrl.sock.as_ref() {
            set_membership(sock, port.ifindex, true)?;
        }
        ctrl.promisc = true;
        Ok(())
    }

    fn promiscuous_disable(&self, port_id: PortId) -> Result<()> {
        let port = self.port(port_id)?;
        let mut ctrl = port.ctrl();
        if let Some(sock) = ctrl.sock.as_ref() {
            set_membership(sock, port.ifindex, false)?;
        }
        ctrl.promisc = false;
        Ok(())
    }

    fn promiscuous_get(&self, port_id: PortId) -> Result<bool> {
        Ok(self.port(port_id)?.ctrl().promisc)
    }

    fn stats(&self, port_id: PortId) -> Result<EthStats> {
        Ok(self.port(port_id)?.shared.stats.snapshot())
    }

    fn rx_queue(&self, port_id: PortId, queue_id: QueueId) -> Result<Box<dyn RxBurst>> {
        let (port, sock) = self.started_sock(port_id, queue_id)?;
        let mempool = port.ctrl().mempool.clone().ok_or(Errno::EINVAL)?;
        if port.shared.rx_taken.swap(true, Ordering::AcqRel) {
            return Err(Errno::EBUSY);
        }
        Ok(Box::new(PacketRxQueue {
            port: port.shared.clone(),
            sock,
            cache: mempool.cache(),
        }))
    }

    fn tx_queue(&self, port_id: PortId, queue_id: QueueId) -> Result<Box<dyn TxBurst>> {
        let (port, sock) = self.started_sock(port_id, queue_id)?;
        if port.shared.tx_taken.swap(true, Ordering::AcqRel) {
            return Err(Errno::EBUSY);
        }
        Ok(Box::new(PacketTxQueue {
            port: port.shared.clone(),
            sock,
        }))
    }
}

struct PacketRxQueue {
    port: Arc<PortShared>,
    sock: Arc<Socket>,
    cache: MemPoolCache,
}

impl RxBurst for PacketRxQueue {
    fn rx_burst(&mut self, pkts: &mut Burst, nb_pkts: usize) -> usize {
        if !self.port.started.load(Ordering::Acquire) {
            return 0;
        }
        let stats = &self.port.stats;
        let max_len = self.port.max_frame_len.load(Ordering::Relaxed);
        let mut received = 0;
        let mut bytes = 0;
        while received < nb_pkts {
            let Some(mut mbuf) = self.cache.alloc() else {
                StatsCounters::add(&stats.rx_nombuf, 1);
                break;
            };
            let room = mbuf.tailroom();
            let Some(buf) = mbuf.append(room) else {
                self.cache.free(mbuf);
                break;
            };
            let ret = self.sock.recv_from_with_flags(as_uninit(buf), libc::MSG_TRUNC);
            match ret.map_err(|e| io_errno(&e)) {
                Ok((n, addr)) => {
                    if is_outgoing(&addr) {
                        self.cache.free(mbuf);
                        continue;
                    }
                    if n > room || n > max_len {
                        StatsCounters::add(&stats.ierrors, 1);
                        self.cache.free(mbuf);
                        continue;
                    }
                    mbuf.trim(room - n);
                    bytes += n as u64;
                    if let Err(e) = pkts.try_push(mbuf) {
                        self.cache.free(e.element());
                        break;
                    }
                    received += 1;
                }
                Err(Errno::EAGAIN) | Err(Errno::EINTR) => {
                    self.cache.free(mbuf);
                    break;
                }
                Err(_) => {
                    StatsCounters::add(&stats.ierrors, 1);
                    self.cache.free(mbuf);
                    break;
                }
            }
        }
        StatsCounters::add(&stats.ipackets, received as u64);
        StatsCounters::add(&stats.ibytes, bytes);
        received
    }
}

impl Drop for PacketRxQueue {
    fn drop(&mut self) {
        self.port.rx_taken.store(false, Ordering::Release);
    }
}

struct PacketTxQueue {
    port: Arc<PortShared>,
    sock: Arc<Socket>,
}

impl TxBurst for PacketTxQueue {
    fn tx_burst(&mut self, pkts: &mut Burst) -> usize {
        if !self.port.started.load(Ordering::Acquire) {
            return 0;
        }
        let stats = &self.port.stats;
        let mut sent = 0;
        let mut bytes = 0;
        for mbuf in pkts.iter() {
            let data = mbuf.data();
            match self.sock.send(data).map_err(|e| io_errno(&e)) {
                Ok(_) => {
                    sent += 1;
                    bytes += data.len() as u64;
                }
                Err(Errno::EAGAIN) | Err(Errno::ENOBUFS) | Err(Errno::EINTR) => break,
                Err(_) => {
                    StatsCounters::add(&stats.oerrors, 1);
                    break;
                }
            }
        }
        // The kernel copied the frames, so they complete right away.
        pkts.drain(..sent).for_each(|mbuf| mbuf.free());
        StatsCounters::add(&stats.opackets, sent as u64);
        StatsCounters::add(&stats.obytes, bytes);
        sent
    }

    fn done_cleanup(&mut self, _free_cnt: usize) -> usize {
        0
    }
}

impl Drop for PacketTxQueue {
    fn drop(&mut self) {
        self.port.tx_taken.store(false, Ordering::Release);
    }
}
