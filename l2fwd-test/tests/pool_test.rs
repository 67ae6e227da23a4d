//! Buffer pool ownership and capacity properties.

use std::collections::HashSet;

use l2fwd::api::dev::driver::{Burst, MAX_BURST_SIZE};
use l2fwd::api::dev::mbuf::Mbuf;
use l2fwd::api::dev::pktmbuf::{MemPool, MemPoolConfig};
use l2fwd::fwd::{BURST_SIZE, TransformMode};
use l2fwd_test::frames::UdpFrame;
use l2fwd_test::harness::{TestConfig, TestContext};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    /// Bulk-allocate up to n buffers from the shared ring.
    Alloc(usize),
    /// Allocate up to n buffers through the worker cache.
    CacheAlloc(usize),
    /// Release the held buffer at index i (modulo the held count).
    Release(usize),
    /// Free the held buffer at index i through the worker cache.
    CacheFree(usize),
    /// Hand the held buffer at index i to a second owner and back.
    Transfer(usize),
    Flush,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..40).prop_map(Op::Alloc),
        (0usize..40).prop_map(Op::CacheAlloc),
        any::<usize>().prop_map(Op::Release),
        any::<usize>().prop_map(Op::CacheFree),
        any::<usize>().prop_map(Op::Transfer),
        Just(Op::Flush),
    ]
}

fn pool(capacity: u32, cache: u32) -> MemPool {
    let config = MemPoolConfig::new()
        .num_mbufs(capacity)
        .cache_size(cache)
        .data_room_size(128 + 64);
    MemPool::create("pool_prop", &config).unwrap()
}

/// Every held id is distinct, and the pool agrees on how many are held.
fn check_owners(pool: &MemPool, held: &[Mbuf]) {
    let ids: HashSet<u32> = held.iter().map(Mbuf::id).collect();
    assert_eq!(ids.len(), held.len(), "buffer id with two owners");
    assert_eq!(pool.in_use_count(), held.len());
    assert!(pool.in_use_count() <= pool.capacity() as usize);
    assert_eq!(
        pool.avail_count() as usize + held.len(),
        pool.capacity() as usize
    );
}

/// Steps that move buffers between the pool, the device and the caller.
#[derive(Debug, Clone)]
enum QueueOp {
    /// Put n frames on port 0's RX wire.
    Inject(usize),
    /// Receive up to n frames from port 0 into the caller's hands.
    Receive(usize),
    /// Hand up to n held buffers to port 1's TX queue; the refused tail is
    /// released.
    Transmit(usize),
    /// Complete every in-flight transmission on port 1.
    Complete,
    /// Release the held buffer at index i.
    Release(usize),
    /// Inject n frames on port 2 and run one forwarding pass to port 3.
    Forward(usize),
    /// Complete every in-flight transmission on port 3.
    CompleteForwarded,
}

fn queue_op() -> impl Strategy<Value = QueueOp> {
    prop_oneof![
        (0usize..40).prop_map(QueueOp::Inject),
        (0usize..40).prop_map(QueueOp::Receive),
        (0usize..40).prop_map(QueueOp::Transmit),
        Just(QueueOp::Complete),
        any::<usize>().prop_map(QueueOp::Release),
        (0usize..40).prop_map(QueueOp::Forward),
        Just(QueueOp::CompleteForwarded),
    ]
}

/// Buffers are either held by the caller, in flight on a TX ring, or free.
fn check_device_owners(ctx: &TestContext, held: &[Mbuf]) {
    let pool = ctx.mempool();
    let ids: HashSet<u32> = held.iter().map(Mbuf::id).collect();
    assert_eq!(ids.len(), held.len(), "buffer id with two owners");
    let inflight = ctx.ring().tx_inflight(1, 0) + ctx.ring().tx_inflight(3, 0);
    assert_eq!(pool.in_use_count(), held.len() + inflight);
    assert_eq!(
        pool.avail_count() as usize + pool.in_use_count(),
        pool.capacity() as usize
    );
}

proptest! {
    #[test]
    fn prop_no_double_ownership_through_queues(
        num_mbufs in 24u32..96,
        cache in prop_oneof![Just(0u32), Just(4u32)],
        tx_desc in 1u16..16,
        ops in prop::collection::vec(queue_op(), 0..120),
    ) {
        let ctx = TestConfig::new()
            .nb_ports(4)
            .num_mbufs(num_mbufs)
            .cache_size(cache)
            .nb_desc(64)
            .tx_desc(tx_desc)
            .build()
            .unwrap();
        let pool = ctx.mempool().clone();
        let mut rxq = ctx.eth_dev(0).rx_queue(0).unwrap();
        let mut txq = ctx.eth_dev(1).tx_queue(0).unwrap();
        let mut session = ctx.session(2, 3, TransformMode::RewriteSource).unwrap();
        let tmpl = UdpFrame::new();
        let mut held: Vec<Mbuf> = Vec::new();
        let mut seq = 0u32;
        let mut accepted = 0usize;
        let mut captured = 0usize;

        for op in ops {
            match op {
                QueueOp::Inject(n) => {
                    for _ in 0..n {
                        ctx.inject(0, &tmpl.build(seq));
                        seq += 1;
                    }
                }
                QueueOp::Receive(n) => {
                    let mut burst = Burst::new();
                    let got = rxq.rx(&mut burst, n);
                    prop_assert_eq!(got, burst.len());
                    held.extend(burst);
                }
                QueueOp::Transmit(n) => {
                    let n = n.min(held.len()).min(MAX_BURST_SIZE);
                    let mut burst: Burst = held.drain(held.len() - n..).collect();
                    let room = tx_desc as usize - ctx.ring().tx_inflight(1, 0);
                    let sent = txq.tx(&mut burst);
                    prop_assert_eq!(sent, n.min(room));
                    prop_assert_eq!(burst.len(), n - sent);
                    accepted += sent;
                    burst.drain(..).for_each(|m| pool.release(m));
                }
                QueueOp::Complete => {
                    let inflight = ctx.ring().tx_inflight(1, 0);
                    prop_assert_eq!(ctx.complete_tx(1), inflight);
                    prop_assert_eq!(ctx.ring().tx_inflight(1, 0), 0);
                }
                QueueOp::Release(i) if !held.is_empty() => {
                    let m = held.swap_remove(i % held.len());
                    pool.release(m);
                }
                QueueOp::Forward(n) => {
                    for _ in 0..n {
                        ctx.inject(2, &tmpl.build(seq));
                        seq += 1;
                    }
                    let mut burst = Burst::new();
                    session.forward_burst(&mut burst, BURST_SIZE);
                    prop_assert!(burst.is_empty());
                }
                QueueOp::CompleteForwarded => {
                    ctx.complete_tx(3);
                }
                _ => {}
            }
            check_device_owners(&ctx, &held);
            // Nothing is transmitted twice.
            captured += ctx.ring().take_transmitted(1).len();
            prop_assert_eq!(captured, accepted);
            ctx.ring().take_transmitted(3);
        }

        drop(held);
        drop(rxq);
        drop(txq);
        drop(session);
        drop(ctx);
        prop_assert!(pool.is_full());
    }

    #[test]
    fn prop_no_double_ownership(
        capacity in 1u32..96,
        cache in prop_oneof![Just(0u32), Just(4u32), Just(16u32)],
        ops in prop::collection::vec(op(), 0..200),
    ) {
        let capacity = capacity.max(cache * 3 / 2);
        let pool = pool(capacity, cache);
        let mut cache = pool.cache();
        let mut held: Vec<Mbuf> = Vec::new();

        for op in ops {
            match op {
                Op::Alloc(n) => {
                    let mut batch = Burst::new();
                    let before = pool.in_use_count();
                    let got = pool.alloc_bulk(&mut batch, n);
                    prop_assert_eq!(got, batch.len());
                    prop_assert!(got <= n);
                    prop_assert_eq!(pool.in_use_count(), before + got);
                    held.extend(batch);
                }
                Op::CacheAlloc(n) => {
                    let mut batch = Burst::new();
                    cache.alloc_bulk(&mut batch, n);
                    held.extend(batch);
                }
                Op::Release(i) if !held.is_empty() => {
                    let m = held.swap_remove(i % held.len());
                    pool.release(m);
                }
                Op::CacheFree(i) if !held.is_empty() => {
                    let m = held.swap_remove(i % held.len());
                    cache.free(m);
                }
                Op::Transfer(i) if !held.is_empty() => {
                    let m = held.swap_remove(i % held.len());
                    let id = m.id();
                    let second_owner = vec![m];
                    prop_assert!(held.iter().all(|h| h.id() != id));
                    prop_assert_eq!(pool.in_use_count(), held.len() + second_owner.len());
                    held.extend(second_owner);
                }
                Op::Flush => cache.flush(),
                _ => {}
            }
            check_owners(&pool, &held);
        }

        drop(held);
        drop(cache);
        prop_assert!(pool.is_full());
    }

    #[test]
    fn prop_empty_pool_yields_empty_batch(capacity in 1u32..64, extra in 1usize..32) {
        let pool = pool(capacity, 0);
        let mut all = Burst::new();
        prop_assert_eq!(pool.alloc_bulk(&mut all, capacity as usize), capacity as usize);
        prop_assert_eq!(pool.avail_count(), 0);

        let mut more = Burst::new();
        prop_assert_eq!(pool.alloc_bulk(&mut more, extra), 0);
        prop_assert!(more.is_empty());
        prop_assert!(pool.try_alloc().is_none());
        prop_assert_eq!(pool.in_use_count(), capacity as usize);

        drop(all);
        prop_assert!(pool.is_full());
    }
}

#[test]
fn test_drop_returns_buffer_once() {
    let pool = pool(2, 0);
    let a = pool.try_alloc().unwrap();
    let b = pool.try_alloc().unwrap();
    assert_ne!(a.id(), b.id());
    assert!(pool.try_alloc().is_none());
    drop(a);
    assert_eq!(pool.avail_count(), 1);
    b.free();
    assert!(pool.is_full());
    // Each buffer comes back exactly once.
    let ids: HashSet<u32> = [pool.try_alloc().unwrap(), pool.try_alloc().unwrap()]
        .iter()
        .map(Mbuf::id)
        .collect();
    assert_eq!(ids.len(), 2);
}

#[test]
fn test_cached_buffers_count_as_available() {
    let pool = pool(32, 8);
    let mut cache = pool.cache();
    let m = cache.alloc().unwrap();
    // The refill pulled a whole chunk, but only one is in use.
    assert_eq!(cache.len(), 7);
    assert_eq!(pool.in_use_count(), 1);
    cache.free(m);
    assert!(pool.is_full());
    drop(cache);
    assert_eq!(pool.avail_count(), 32);
}
