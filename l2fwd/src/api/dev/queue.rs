// RX/TX queue handles
//
// A handle owns one direction of one queue of a started port. Handles are
// `Send` but not shared: the worker that polls a queue owns it outright.

use std::fmt;

use super::driver::{Burst, RxBurst, TxBurst};
use super::eth::{PortId, QueueId};
use super::mbuf::Mbuf;

pub use super::driver::MAX_BURST_SIZE;

/// RX Queue handle for receiving packets
pub struct RxQueue {
    port_id: PortId,
    queue_id: QueueId,
    inner: Box<dyn RxBurst>,
}

impl RxQueue {
    /// Wrap a driver receive object.
    ///
    /// Normally obtained through `EthDev::rx_queue()`.
    pub fn from_burst(port_id: PortId, queue_id: QueueId, inner: Box<dyn RxBurst>) -> Self {
        Self {
            port_id,
            queue_id,
            inner,
        }
    }

    /// Get the port ID
    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// Get the queue ID
    #[inline]
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Receive up to `nb_pkts` packets into the provided buffer.
    ///
    /// Returns the number of packets received.
    /// Packets are appended to `mbufs` (up to its remaining capacity).
    #[inline]
    pub fn rx(&mut self, mbufs: &mut Burst, nb_pkts: usize) -> usize {
        let max_pkts = nb_pkts.min(mbufs.remaining_capacity());
        if max_pkts == 0 {
            return 0;
        }
        let before = mbufs.len();
        let received = self.inner.rx_burst(mbufs, max_pkts);
        debug_assert_eq!(mbufs.len(), before + received);
        received
    }

    /// Receive a burst of packets, returning them as a new Burst.
    #[inline]
    pub fn rx_burst(&mut self) -> Burst {
        let mut mbufs = Burst::new();
        self.rx(&mut mbufs, MAX_BURST_SIZE);
        mbufs
    }
}

impl fmt::Debug for RxQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxQueue")
            .field("port_id", &self.port_id)
            .field("queue_id", &self.queue_id)
            .finish()
    }
}

/// TX Queue handle for transmitting packets
pub struct TxQueue {
    port_id: PortId,
    queue_id: QueueId,
    inner: Box<dyn TxBurst>,
}

impl TxQueue {
    /// Wrap a driver transmit object.
    ///
    /// Normally obtained through `EthDev::tx_queue()`.
    pub fn from_burst(port_id: PortId, queue_id: QueueId, inner: Box<dyn TxBurst>) -> Self {
        Self {
            port_id,
            queue_id,
            inner,
        }
    }

    /// Get the port ID
    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    /// Get the queue ID
    #[inline]
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    /// Transmit a burst of packets from the provided buffer.
    ///
    /// Successfully transmitted packets are removed from the front of `mbufs`.
    /// Returns the number of packets transmitted.
    ///
    /// Packets that fail to transmit remain in the buffer (caller must handle).
    #[inline]
    pub fn tx(&mut self, mbufs: &mut Burst) -> usize {
        if mbufs.is_empty() {
            return 0;
        }
        let before = mbufs.len();
        let sent = self.inner.tx_burst(mbufs);
        debug_assert!(sent <= before && mbufs.len() == before - sent);
        sent
    }

    /// Transmit a single packet.
    ///
    /// On success, the mbuf is consumed by the device and `None` returned.
    /// On failure, the mbuf is handed back.
    #[inline]
    pub fn tx_one(&mut self, mbuf: Mbuf) -> Option<Mbuf> {
        let mut mbufs = Burst::new();
        mbufs.push(mbuf);
        if self.tx(&mut mbufs) == 1 {
            None
        } else {
            mbufs.pop()
        }
    }

    /// Release buffers whose transmission has completed.
    ///
    /// `free_cnt` bounds how many are released; 0 releases all of them.
    #[inline]
    pub fn done_cleanup(&mut self, free_cnt: usize) -> usize {
        self.inner.done_cleanup(free_cnt)
    }
}

impl fmt::Debug for TxQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxQueue")
            .field("port_id", &self.port_id)
            .field("queue_id", &self.queue_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::dev::pktmbuf::{MemPool, MemPoolConfig};

    struct Refuse;

    impl TxBurst for Refuse {
        fn tx_burst(&mut self, _pkts: &mut Burst) -> usize {
            0
        }

        fn done_cleanup(&mut self, _free_cnt: usize) -> usize {
            0
        }
    }

    struct Counting(MemPool);

    impl RxBurst for Counting {
        fn rx_burst(&mut self, pkts: &mut Burst, nb_pkts: usize) -> usize {
            self.0.alloc_bulk(pkts, nb_pkts)
        }
    }

    #[test]
    fn test_queue_creation() {
        let rxq = RxQueue::from_burst(0, 1, Box::new(Counting(MemPool::create_default("q", 4).unwrap())));
        assert_eq!(rxq.port_id(), 0);
        assert_eq!(rxq.queue_id(), 1);

        let txq = TxQueue::from_burst(2, 3, Box::new(Refuse));
        assert_eq!(txq.port_id(), 2);
        assert_eq!(txq.queue_id(), 3);
    }

    #[test]
    fn test_rx_bounded_by_request_and_capacity() {
        let config = MemPoolConfig::new().num_mbufs(128).cache_size(0);
        let pool = MemPool::create("q", &config).unwrap();
        let mut rxq = RxQueue::from_burst(0, 0, Box::new(Counting(pool.clone())));

        let mut burst = Burst::new();
        assert_eq!(rxq.rx(&mut burst, 8), 8);
        assert_eq!(rxq.rx(&mut burst, 0), 0);
        assert_eq!(rxq.rx(&mut burst, 1000), MAX_BURST_SIZE - 8);
        assert_eq!(rxq.rx(&mut burst, 1), 0);
        drop(burst);
        assert!(pool.is_full());
    }

    #[test]
    fn test_tx_one_returns_refused_mbuf() {
        let pool = MemPool::create_default("q", 4).unwrap();
        let mut txq = TxQueue::from_burst(0, 0, Box::new(Refuse));
        let m = pool.try_alloc().unwrap();
        let back = txq.tx_one(m).expect("refused mbuf is handed back");
        assert_eq!(pool.in_use_count(), 1);
        back.free();
        assert!(pool.is_full());
    }
}
